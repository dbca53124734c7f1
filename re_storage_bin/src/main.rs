use anyhow::{Context, Result};
use clap::Parser;
use re_storage::config::StorageEngineConfig;
use re_storage::storage::StorageBuilder;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "re-storage")]
#[command(version)]
#[command(about = "CAS and Action Cache storage engine", long_about = None)]
struct Cli {
    #[arg(short, long, value_name = "FILE")]
    config: PathBuf,

    /// Build the storage trees, print them and exit.
    #[arg(long)]
    check: bool,

    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.verbose);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let config = StorageEngineConfig::from_file(&cli.config)
        .with_context(|| format!("Invalid configuration in {}", cli.config.display()))?;

    tracing::info!("Initializing storage...");
    let stacks = StorageBuilder::new(&config)
        .build()
        .await
        .context("Failed to build storage trees")?;

    if cli.check {
        println!("cas: {}", config.cas.describe());
        println!("action_cache: {}", config.action_cache.describe());
        return Ok(());
    }

    if let Some(meter) = &stacks.meter {
        tracing::info!("Starting metering flush loop");
        meter.start().await;
    }

    tracing::info!("Storage engine ready");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    tracing::info!("Shutting down");
    if let Some(meter) = &stacks.meter {
        let summary = meter.shutdown().await;
        tracing::info!(
            emitted = summary.emitted,
            deferred = summary.deferred,
            "Final metering window flushed"
        );
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        "re_storage=debug,re_storage_bin=debug"
    } else {
        "re_storage=info,re_storage_bin=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
