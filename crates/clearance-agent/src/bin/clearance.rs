//! Operator CLI for the clearance service
//!
//! Runs maintenance against the configured journal and inspects a user's
//! permissions from the static directory.

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use clearance_agent::{ClearanceConfig, ClearanceRuntime, ClearanceRuntimeBuilder, StaticDirectory};
use clearance_core::{AccessFilter, UserId};
use clearance_retrieval::{DocumentCandidate, SearchError, VectorSearchEffects};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "clearance")]
#[command(about = "Clearance - access-controlled retrieval service", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file path
    #[arg(short, long, global = true, default_value = "clearance.toml")]
    config: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the maintenance sweep once
    Sweep,

    /// Run maintenance periodically until interrupted
    Run,

    /// Print a user's permission summary as JSON
    Summary {
        /// User id
        user: u64,
    },

    /// Load and validate the configuration
    CheckConfig,
}

/// The CLI never answers queries.
struct DisabledSearch;

#[async_trait]
impl VectorSearchEffects for DisabledSearch {
    async fn search(
        &self,
        _query: &str,
        _k: usize,
        _filter: &AccessFilter,
    ) -> std::result::Result<Vec<DocumentCandidate>, SearchError> {
        Err(SearchError::Unavailable(
            "vector search is not available from the CLI".to_string(),
        ))
    }
}

async fn load_config(path: &Path) -> Result<ClearanceConfig> {
    if tokio::fs::try_exists(path).await.unwrap_or(false) {
        ClearanceConfig::load(path)
            .await
            .with_context(|| format!("loading {}", path.display()))
    } else {
        tracing::warn!(path = %path.display(), "Config file not found, using defaults");
        Ok(ClearanceConfig::default())
    }
}

async fn build_runtime(config: ClearanceConfig) -> Result<ClearanceRuntime> {
    let directory = match &config.directory.path {
        Some(path) => StaticDirectory::load(path).await?,
        None => {
            tracing::warn!("No directory configured; every user resolves to no access");
            StaticDirectory::default()
        }
    };
    let runtime = ClearanceRuntimeBuilder::new(config)
        .with_identity(Arc::new(directory))
        .with_search(Arc::new(DisabledSearch))
        .build()
        .await?;
    Ok(runtime)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = load_config(&cli.config).await?;

    match cli.command {
        Commands::CheckConfig => {
            config.validate()?;
            println!("{}: ok", cli.config.display());
        }
        Commands::Sweep => {
            let runtime = build_runtime(config).await?;
            let report = runtime.sweep().run_once().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Run => {
            let runtime = build_runtime(config).await?;
            runtime.start_maintenance();
            tokio::signal::ctrl_c()
                .await
                .context("waiting for interrupt")?;
            runtime.shutdown().await;
        }
        Commands::Summary { user } => {
            let runtime = build_runtime(config).await?;
            let summary = runtime.service().permission_summary(UserId(user)).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }

    Ok(())
}
