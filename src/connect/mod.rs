// pst/src/connect/mod.rs
//! `pst pg`: open psql against a role recorded in an environment descriptor.

use anyhow::{Context, Result};
use std::process::Command;
use tracing::debug;

use crate::config::{AppConfig, ConfigStore, EnvironmentDescriptor};
use crate::pgpass::DEFAULT_PORT;
use crate::utils::find_psql_executable;
use crate::utils::prompt::prompt_selection;

const PSQL_DATABASE: &str = "postgres";
const PSQL_USER: &str = "postgres";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectTarget {
    pub cluster: String,
    pub role: String,
    pub endpoint: String,
    pub port: u16,
    /// Shown in the psql prompt.
    pub label: String,
}

impl ConnectTarget {
    /// Looks up `cluster`/`role` in `descriptor`. Local roles use their stored
    /// port; cloud roles always use the default.
    pub fn resolve(
        app_config: &AppConfig,
        environment: &str,
        descriptor: &EnvironmentDescriptor,
        cluster: &str,
        role: &str,
    ) -> Result<Self> {
        let cluster_config = descriptor
            .clusters
            .get(cluster)
            .with_context(|| format!("Cluster '{}' not found in environment '{}'", cluster, environment))?;
        let role_info = cluster_config
            .role(role)
            .with_context(|| format!("Role '{}' not found in cluster '{}'", role, cluster))?;

        let port = if app_config.is_local(environment) {
            role_info.port.unwrap_or(DEFAULT_PORT)
        } else {
            DEFAULT_PORT
        };

        Ok(Self {
            cluster: cluster.to_string(),
            role: role.to_string(),
            endpoint: role_info.endpoint.clone(),
            port,
            label: role_info
                .instance_name
                .clone()
                .unwrap_or_else(|| role.to_string()),
        })
    }

    pub fn psql_args(&self) -> Vec<String> {
        vec![
            "-h".to_string(),
            self.endpoint.clone(),
            "-d".to_string(),
            PSQL_DATABASE.to_string(),
            "-p".to_string(),
            self.port.to_string(),
            "-U".to_string(),
            PSQL_USER.to_string(),
            "-v".to_string(),
            format!("PROMPT1={} %/=> ", self.label),
        ]
    }
}

/// Public entry point for the connect flow. Missing arguments are chosen
/// from numbered menus.
pub fn run_connect_flow(
    app_config: &AppConfig,
    environment: Option<String>,
    cluster: Option<String>,
    role: Option<String>,
) -> Result<()> {
    let store = ConfigStore::new(&app_config.config_dir);
    let interactive = environment.is_none() || cluster.is_none() || role.is_none();

    let environment = match environment {
        Some(env) => env,
        None => {
            let environments = store
                .list_environments()
                .context("Failed to list environments")?;
            prompt_selection(&environments, "Available environments", "Select an environment (enter the number): ")?
        }
    };
    let descriptor = store
        .load(&environment)
        .with_context(|| format!("Failed to load environment '{}'", environment))?;

    let cluster = match cluster {
        Some(cluster) => cluster,
        None => {
            let clusters: Vec<String> = descriptor.clusters.keys().cloned().collect();
            prompt_selection(&clusters, "Available clusters", "Select a cluster (enter the number): ")?
        }
    };
    let role = match role {
        Some(role) => role,
        None => {
            let roles: Vec<String> = descriptor
                .clusters
                .get(&cluster)
                .map(|c| c.role_entries().map(|(name, _)| name.clone()).collect())
                .unwrap_or_default();
            prompt_selection(&roles, "Available roles", "Select a role (enter the number): ")?
        }
    };

    let target = ConnectTarget::resolve(app_config, &environment, &descriptor, &cluster, &role)?;
    if interactive {
        println!("\nCommand for next time: pst pg {} {} {}\n", environment, cluster, role);
    }

    let psql_path = find_psql_executable()?;
    debug!(psql = %psql_path.display(), endpoint = %target.endpoint, port = target.port, "starting psql");
    let status = Command::new(psql_path)
        .args(target.psql_args())
        .env("PGPASSFILE", &app_config.pgpass_path)
        .status()
        .with_context(|| format!("Failed to execute psql for {}/{}", target.cluster, target.role))?;

    if !status.success() {
        anyhow::bail!("Error connecting to the database: psql exited with status: {}", status);
    }
    Ok(())
}
