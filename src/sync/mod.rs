// pst/src/sync/mod.rs
pub(crate) mod logic;

use anyhow::{Context, Result};
use std::fmt;

use crate::aws::{RdsTopologyResolver, SsmSecretProvider, SsoIdentityProvider};
use crate::config::AppConfig;

pub use logic::SyncOrchestrator;

pub const ALL_ENVIRONMENTS: &str = "all";

/// Which environments one pass covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvironmentSelector {
    One(String),
    All,
}

impl EnvironmentSelector {
    pub fn parse(input: &str) -> Self {
        let input = input.trim();
        if input == ALL_ENVIRONMENTS {
            EnvironmentSelector::All
        } else {
            EnvironmentSelector::One(input.to_string())
        }
    }
}

impl fmt::Display for EnvironmentSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvironmentSelector::One(name) => f.write_str(name),
            EnvironmentSelector::All => f.write_str(ALL_ENVIRONMENTS),
        }
    }
}

/// Outcome of one environment within a pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvironmentReport {
    pub environment: String,
    pub clusters_resolved: usize,
    pub clusters_not_found: usize,
    pub clusters_failed: usize,
    pub entries_appended: usize,
    pub entries_present: usize,
    /// `cluster/role` pairs that had no usable credentials.
    pub roles_skipped: Vec<String>,
    pub descriptor_saved: bool,
    /// Set when the environment as a whole could not be processed.
    pub error: Option<String>,
}

impl EnvironmentReport {
    pub fn new(environment: &str) -> Self {
        Self {
            environment: environment.to_string(),
            ..Default::default()
        }
    }

    pub fn failed(environment: &str, error: impl fmt::Display) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::new(environment)
        }
    }
}

impl fmt::Display for EnvironmentReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(error) = &self.error {
            return write!(f, "❌ {}: {}", self.environment, error);
        }
        write!(
            f,
            "✓ {}: {} resolved, {} not found, {} failed; pgpass {} added, {} unchanged",
            self.environment,
            self.clusters_resolved,
            self.clusters_not_found,
            self.clusters_failed,
            self.entries_appended,
            self.entries_present
        )?;
        if !self.roles_skipped.is_empty() {
            write!(f, "; no credentials for {}", self.roles_skipped.join(", "))?;
        }
        if self.descriptor_saved {
            write!(f, "; descriptor updated")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub environments: Vec<EnvironmentReport>,
}

impl SyncReport {
    /// True if any environment could not be processed at all.
    pub fn has_failures(&self) -> bool {
        self.environments.iter().any(|e| e.error.is_some())
    }
}

/// Public entry point for the sync process, wired to the real AWS collaborators.
pub async fn run_sync_flow(app_config: &AppConfig, selector: &EnvironmentSelector) -> Result<SyncReport> {
    let mut orchestrator = SyncOrchestrator::new(
        app_config.clone(),
        Box::new(SsoIdentityProvider::new(app_config.sso_login)),
        Box::new(RdsTopologyResolver),
        Box::new(SsmSecretProvider),
    );

    orchestrator
        .sync(selector)
        .await
        .with_context(|| format!("Failed to synchronize environment selection '{}'", selector))
}
