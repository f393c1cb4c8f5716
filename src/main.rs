//! Platform Storage Tools
//!
//! Keeps `~/.pgpass` and the per-environment descriptors in `~/.pst/config`
//! in step with the RDS clusters of each environment, and opens psql against
//! any recorded role.

// pst/src/main.rs
mod aws;
mod config;
mod connect;
mod errors;
mod pgpass;
mod sync;
mod utils;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::{AppConfig, ConfigStore};
use std::process::ExitCode;
use sync::{ALL_ENVIRONMENTS, EnvironmentSelector};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pst")]
#[command(about = "PostgreSQL environment sync and connect tool", long_about = None)]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Refresh descriptors and ~/.pgpass from AWS
    Config {
        /// Environment to synchronize, or "all"
        environment: Option<String>,
    },
    /// Connect to a cluster role with psql
    Pg {
        /// Environment name
        environment: Option<String>,
        /// Cluster name
        cluster: Option<String>,
        /// Role name
        role: Option<String>,
    },
}

/// Main entry point
#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run_app(cli).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("❌ Error: {:?}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

async fn run_app(cli: Cli) -> Result<()> {
    let app_config = AppConfig::load().context("Failed to load application configuration")?;

    match cli.command {
        Commands::Config { environment } => {
            let selector = match environment {
                Some(env) => EnvironmentSelector::parse(&env),
                None => prompt_environment_selector(&app_config)?,
            };
            println!("🚀 Starting Sync Process for {}...", selector);
            let report = sync::run_sync_flow(&app_config, &selector).await?;

            for env_report in &report.environments {
                println!("{}", env_report);
            }
            if report.has_failures() {
                anyhow::bail!("One or more environments could not be synchronized");
            }
            println!("✅ Operation completed successfully.");
        }
        Commands::Pg {
            environment,
            cluster,
            role,
        } => {
            connect::run_connect_flow(&app_config, environment, cluster, role)
                .context("Connect process failed")?;
        }
    }
    Ok(())
}

fn prompt_environment_selector(app_config: &AppConfig) -> Result<EnvironmentSelector> {
    let mut environments = ConfigStore::new(&app_config.config_dir)
        .list_environments()
        .context("Failed to list environments")?;
    environments.push(ALL_ENVIRONMENTS.to_string());

    let choice = utils::prompt::prompt_selection(
        &environments,
        "Available environments",
        "Select an environment (enter the number): ",
    )?;
    Ok(EnvironmentSelector::parse(&choice))
}
