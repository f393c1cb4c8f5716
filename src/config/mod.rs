// pst/src/config/mod.rs
pub mod store;

use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub use store::{ClusterDescriptor, ConfigStore, EnvironmentDescriptor, RoleInfo};

const DEFAULT_PROFILE_ROLE: &str = "AdministratorAccess";
const DEFAULT_LOCAL_ENVIRONMENT: &str = "local";
const DEFAULT_LOCAL_USERNAME: &str = "postgres";
const DEFAULT_LOCAL_PASSWORD: &str = "password";

// Structs for deserializing ~/.pst/pst.json
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawJsonConfig {
    pub config_dir: Option<PathBuf>,
    pub pgpass_path: Option<PathBuf>,
    pub profile_role: Option<String>,
    pub local_environment: Option<String>,
    pub local_username: Option<String>,
    pub local_password: Option<String>,
    pub sso_login: Option<bool>,
}

/// Resolved settings for one invocation.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Directory holding the `{env}.env.yaml` descriptors.
    pub config_dir: PathBuf,
    /// Credential file consumed by libpq (`PGPASSFILE`).
    pub pgpass_path: PathBuf,
    /// Permission-set half of the SSO profile name, `{account}.{profile_role}`.
    pub profile_role: String,
    /// Environment whose roles are defined locally and never touch AWS.
    pub local_environment: String,
    pub local_username: String,
    pub local_password: String,
    /// Run `aws sso login` once when a profile has no usable credentials.
    pub sso_login: bool,
}

impl AppConfig {
    /// Loads defaults, then `~/.pst/pst.json` if present, then environment overrides.
    pub fn load() -> Result<Self> {
        let home = home::home_dir().context("Could not determine the home directory")?;
        let settings_path = home.join(".pst").join("pst.json");
        let mut config = if settings_path.exists() {
            Self::load_from_json(&settings_path, &home)?
        } else {
            Self::from_raw(RawJsonConfig::default(), &home)
        };
        config.apply_overrides(|key| env::var(key).ok());
        Ok(config)
    }

    pub fn load_from_json(config_path: &Path, home: &Path) -> Result<Self> {
        let config_content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read settings file at {}", config_path.display()))?;
        let raw: RawJsonConfig = serde_json::from_str(&config_content).with_context(|| {
            format!(
                "Failed to parse JSON from settings file at {}",
                config_path.display()
            )
        })?;
        Ok(Self::from_raw(raw, home))
    }

    fn from_raw(raw: RawJsonConfig, home: &Path) -> Self {
        let pst_dir = home.join(".pst");
        AppConfig {
            config_dir: raw
                .config_dir
                .map(|p| expand_home(&p, home))
                .unwrap_or_else(|| pst_dir.join("config")),
            pgpass_path: raw
                .pgpass_path
                .map(|p| expand_home(&p, home))
                .unwrap_or_else(|| home.join(".pgpass")),
            profile_role: non_empty(raw.profile_role).unwrap_or_else(|| DEFAULT_PROFILE_ROLE.to_string()),
            local_environment: non_empty(raw.local_environment)
                .unwrap_or_else(|| DEFAULT_LOCAL_ENVIRONMENT.to_string()),
            local_username: non_empty(raw.local_username)
                .unwrap_or_else(|| DEFAULT_LOCAL_USERNAME.to_string()),
            local_password: non_empty(raw.local_password)
                .unwrap_or_else(|| DEFAULT_LOCAL_PASSWORD.to_string()),
            sso_login: raw.sso_login.unwrap_or(true),
        }
    }

    /// Applies `PST_*`/`PGPASSFILE` overrides. `lookup` is `env::var` outside tests.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(dir) = get("PST_CONFIG_DIR") {
            self.config_dir = PathBuf::from(dir);
        }
        if let Some(path) = get("PGPASSFILE") {
            self.pgpass_path = PathBuf::from(path);
        }
        if let Some(role) = get("PST_PROFILE_ROLE") {
            self.profile_role = role;
        }
        if let Some(name) = get("PST_LOCAL_ENVIRONMENT") {
            self.local_environment = name;
        }
        if let Some(flag) = get("PST_SSO_LOGIN") {
            self.sso_login = !matches!(flag.trim().to_ascii_lowercase().as_str(), "0" | "false" | "no" | "off");
        }
    }

    /// SSO profile used for a cluster living in `aws_account_name`.
    pub fn profile_name(&self, aws_account_name: &str) -> String {
        format!("{}.{}", aws_account_name, self.profile_role)
    }

    pub fn is_local(&self, environment: &str) -> bool {
        environment == self.local_environment
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

fn expand_home(path: &Path, home: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => home.join(rest),
        Err(_) => path.to_path_buf(),
    }
}
