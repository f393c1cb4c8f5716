// pst/src/config/store.rs
//! Environment descriptors (`{env}.env.yaml`) and their on-disk store.
//!
//! Keys we do not model are carried through `extra` maps so that a save only
//! ever changes the `roles` subtree of the clusters resolved in a pass.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use tracing::debug;

use crate::errors::{Result, SyncError};

pub const DESCRIPTOR_SUFFIX: &str = ".env.yaml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentDescriptor {
    #[serde(default)]
    pub clusters: IndexMap<String, ClusterDescriptor>,
    #[serde(flatten)]
    pub extra: IndexMap<String, serde_yaml::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws_account_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws_region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment_name: Option<String>,
    /// `None` when the file has no `roles` key; it stays absent on save.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roles: Option<IndexMap<String, RoleInfo>>,
    #[serde(flatten)]
    pub extra: IndexMap<String, serde_yaml::Value>,
}

/// Connection info for one role of a cluster.
///
/// Cloud roles carry `instance_name`; local roles carry `port`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoleInfo {
    pub endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(flatten)]
    pub extra: IndexMap<String, serde_yaml::Value>,
}

impl ClusterDescriptor {
    pub fn role(&self, name: &str) -> Option<&RoleInfo> {
        self.roles.as_ref().and_then(|roles| roles.get(name))
    }

    /// Roles in file order; empty when the cluster has none yet.
    pub fn role_entries(&self) -> impl Iterator<Item = (&String, &RoleInfo)> {
        self.roles.iter().flatten()
    }

    /// Returns a required cloud field or `InvalidCluster`.
    pub fn require<'a>(
        &'a self,
        cluster: &str,
        field: &'static str,
    ) -> Result<&'a str> {
        let value = match field {
            "aws_account_name" => self.aws_account_name.as_deref(),
            "aws_region" => self.aws_region.as_deref(),
            "environment_name" => self.environment_name.as_deref(),
            _ => None,
        };
        value
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| SyncError::InvalidCluster {
                cluster: cluster.to_string(),
                field,
            })
    }
}

/// Reads and writes descriptors inside one configuration directory.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    config_dir: PathBuf,
}

impl ConfigStore {
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
        }
    }

    pub fn descriptor_path(&self, environment: &str) -> PathBuf {
        self.config_dir
            .join(format!("{}{}", environment, DESCRIPTOR_SUFFIX))
    }

    /// Environment names with a descriptor in the directory, sorted.
    pub fn list_environments(&self) -> Result<Vec<String>> {
        let entries = fs::read_dir(&self.config_dir).map_err(|e| match e.kind() {
            ErrorKind::NotFound => SyncError::ConfigNotFound {
                environment: "*".to_string(),
                path: self.config_dir.clone(),
            },
            _ => SyncError::Io(e),
        })?;

        let mut environments = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let file_name = entry.file_name();
            if let Some(env) = file_name
                .to_str()
                .and_then(|name| name.strip_suffix(DESCRIPTOR_SUFFIX))
                .filter(|env| !env.is_empty())
            {
                environments.push(env.to_string());
            }
        }
        environments.sort();
        Ok(environments)
    }

    pub fn load(&self, environment: &str) -> Result<EnvironmentDescriptor> {
        let path = self.descriptor_path(environment);
        let content = fs::read_to_string(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => SyncError::ConfigNotFound {
                environment: environment.to_string(),
                path: path.clone(),
            },
            _ => SyncError::Io(e),
        })?;

        // An empty file is a descriptor with no clusters.
        if content.trim().is_empty() {
            return Ok(EnvironmentDescriptor::default());
        }

        serde_yaml::from_str(&content).map_err(|source| SyncError::ConfigParse { path, source })
    }

    /// Overwrites the descriptor file with `descriptor`.
    ///
    /// The document is written to a sibling temp file first and renamed into
    /// place, so readers never observe a half-written descriptor.
    pub fn save(&self, environment: &str, descriptor: &EnvironmentDescriptor) -> Result<()> {
        let path = self.descriptor_path(environment);
        let rendered = serde_yaml::to_string(descriptor).map_err(|e| SyncError::ConfigWrite {
            path: path.clone(),
            reason: e.to_string(),
        })?;

        let tmp_path = path.with_extension("yaml.tmp");
        fs::write(&tmp_path, rendered).map_err(|e| SyncError::ConfigWrite {
            path: tmp_path.clone(),
            reason: e.to_string(),
        })?;
        // The rename would otherwise replace the user's mode with the umask default.
        if let Ok(metadata) = fs::metadata(&path) {
            fs::set_permissions(&tmp_path, metadata.permissions()).map_err(|e| SyncError::ConfigWrite {
                path: tmp_path.clone(),
                reason: e.to_string(),
            })?;
        }
        fs::rename(&tmp_path, &path).map_err(|e| SyncError::ConfigWrite {
            path: path.clone(),
            reason: e.to_string(),
        })?;

        debug!(environment, path = %path.display(), "descriptor written");
        Ok(())
    }
}
