// pst/src/aws/mod.rs
//! AWS collaborators: SSO-backed sessions, RDS topology and SSM secrets.
//!
//! Each capability is a trait so the sync loop can run against in-memory
//! doubles; the `Sso*`, `Rds*` and `Ssm*` types are the real implementations.

pub(crate) mod rds;
pub(crate) mod ssm;

use anyhow::Context;
use async_trait::async_trait;
use aws_config::{BehaviorVersion, SdkConfig};
use aws_credential_types::provider::ProvideCredentials;
use std::path::PathBuf;
use std::process::Command;
use tracing::{debug, info, warn};
use which::which;

use crate::errors::{Result, SyncError};

pub use rds::{RdsTopologyResolver, Topology, TopologyResolver};
pub use ssm::{SecretProvider, SsmSecretProvider};

/// Authenticated handle for one profile. Handed to the resolvers for the
/// duration of a single cluster and then dropped.
#[derive(Debug, Clone)]
pub struct Session {
    profile: String,
    sdk_config: SdkConfig,
}

impl Session {
    pub fn new(profile: impl Into<String>, sdk_config: SdkConfig) -> Self {
        Self {
            profile: profile.into(),
            sdk_config,
        }
    }

    pub fn profile(&self) -> &str {
        &self.profile
    }

    pub fn sdk_config(&self) -> &SdkConfig {
        &self.sdk_config
    }
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Establishes credentials for `profile`. Calling it again for the same
    /// profile has no further effect beyond refreshing the session.
    async fn authenticate(&mut self, profile: &str) -> Result<()>;

    /// Session for the profile last passed to `authenticate`.
    fn session(&self) -> Result<Session>;
}

/// Resolves named profiles from the shared AWS config, falling back to an
/// interactive `aws sso login` when the cached SSO token is missing or stale.
pub struct SsoIdentityProvider {
    sso_login: bool,
    current: Option<Session>,
}

impl SsoIdentityProvider {
    pub fn new(sso_login: bool) -> Self {
        Self {
            sso_login,
            current: None,
        }
    }
}

#[async_trait]
impl IdentityProvider for SsoIdentityProvider {
    async fn authenticate(&mut self, profile: &str) -> Result<()> {
        self.current = None;

        let mut sdk_config = load_profile(profile).await;
        if let Err(reason) = verify_credentials(&sdk_config).await {
            if !self.sso_login {
                return Err(SyncError::Authentication {
                    profile: profile.to_string(),
                    reason,
                });
            }
            warn!(profile, %reason, "no usable credentials, starting aws sso login");
            run_sso_login(profile).map_err(|e| SyncError::Authentication {
                profile: profile.to_string(),
                reason: format!("{:#}", e),
            })?;

            sdk_config = load_profile(profile).await;
            verify_credentials(&sdk_config)
                .await
                .map_err(|reason| SyncError::Authentication {
                    profile: profile.to_string(),
                    reason,
                })?;
        }

        info!(profile, "🔐 Authenticated");
        self.current = Some(Session::new(profile, sdk_config));
        Ok(())
    }

    fn session(&self) -> Result<Session> {
        self.current.clone().ok_or(SyncError::SessionUnavailable)
    }
}

async fn load_profile(profile: &str) -> SdkConfig {
    debug!(profile, "loading shared AWS config");
    aws_config::defaults(BehaviorVersion::latest())
        .profile_name(profile)
        .load()
        .await
}

/// Resolves credentials once so a broken profile surfaces here rather than
/// as an opaque failure on the first RDS call.
async fn verify_credentials(sdk_config: &SdkConfig) -> std::result::Result<(), String> {
    let provider = sdk_config
        .credentials_provider()
        .ok_or_else(|| "no credentials provider configured".to_string())?;
    provider
        .provide_credentials()
        .await
        .map(|_| ())
        .map_err(|e| e.to_string())
}

fn find_aws_cli_executable() -> anyhow::Result<PathBuf> {
    which("aws").context("aws executable not found in PATH. Please install the AWS CLI v2 to log in with SSO.")
}

fn run_sso_login(profile: &str) -> anyhow::Result<()> {
    let aws_path = find_aws_cli_executable()?;
    let status = Command::new(aws_path)
        .args(["sso", "login", "--profile", profile])
        .status()
        .with_context(|| format!("Failed to execute aws sso login for profile {}", profile))?;

    if !status.success() {
        anyhow::bail!("aws sso login for profile {} exited with status: {}", profile, status);
    }
    Ok(())
}
