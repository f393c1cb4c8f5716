use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("No environment descriptor found for '{environment}' at {}", path.display())]
    ConfigNotFound { environment: String, path: PathBuf },

    #[error("Malformed environment descriptor {}: {source}", path.display())]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Failed to write environment descriptor {}: {reason}", path.display())]
    ConfigWrite { path: PathBuf, reason: String },

    #[error("Authentication failed for profile '{profile}': {reason}")]
    Authentication { profile: String, reason: String },

    #[error("No authenticated session; call authenticate first")]
    SessionUnavailable,

    #[error("Topology query for '{instance}' failed: {reason}")]
    TopologyQuery { instance: String, reason: String },

    #[error("Secret query for '{path}' failed: {reason}")]
    SecretQuery { path: String, reason: String },

    #[error("Cluster '{cluster}' is missing required field '{field}'")]
    InvalidCluster { cluster: String, field: &'static str },

    #[error("Credential store {} error: {source}", path.display())]
    CredentialStore {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SyncError>;
