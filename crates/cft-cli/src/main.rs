use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use cft_storage::PgRecordStore;
use cft_sync::{CollectConfig, CollectPipeline};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "cft-cli")]
#[command(about = "Climate Funding Tracker command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one collection pass over the configured sources.
    Collect {
        /// Fuzzy-title duplicate threshold in (0, 1].
        #[arg(long)]
        similarity_threshold: Option<f64>,
        /// Bypass duplicate matching entirely.
        #[arg(long)]
        force_import: bool,
        /// Match and report without writing anything.
        #[arg(long)]
        dry_run: bool,
        /// Leave the global climate-funds listing out of this pass.
        #[arg(long)]
        skip_climate_funds: bool,
        /// Collect only the global climate-funds listing.
        #[arg(long)]
        climate_funds_only: bool,
        /// Comma-separated summary notification recipients.
        #[arg(long)]
        email_recipients: Option<String>,
        /// Source registry file.
        #[arg(long, default_value = "sources.yaml")]
        sources: PathBuf,
    },
    /// Start the cron-driven collection scheduler and wait.
    Schedule {
        #[arg(long, default_value = "sources.yaml")]
        sources: PathBuf,
    },
    /// Create the record and notification tables when absent.
    InitSchema,
    /// Print a digest of the most recent collection runs.
    Report {
        #[arg(long, default_value_t = 3)]
        runs: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    match cli.command.unwrap_or(Commands::Collect {
        similarity_threshold: None,
        force_import: false,
        dry_run: false,
        skip_climate_funds: false,
        climate_funds_only: false,
        email_recipients: None,
        sources: PathBuf::from("sources.yaml"),
    }) {
        Commands::Collect {
            similarity_threshold,
            force_import,
            dry_run,
            skip_climate_funds,
            climate_funds_only,
            email_recipients,
            sources,
        } => {
            let mut config = CollectConfig::from_env();
            if let Some(threshold) = similarity_threshold {
                config.similarity_threshold = threshold;
            }
            config.force_import = force_import;
            config.dry_run = dry_run;
            config.include_climate_funds = !skip_climate_funds;
            if climate_funds_only {
                config.include_climate_funds = true;
                config.include_country_projects = false;
            }
            if let Some(recipients) = email_recipients {
                config.email_recipients = recipients
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
            }

            let pipeline = build_pipeline(config, &sources).await?;
            let report = pipeline.run_once().await?;
            println!(
                "collection complete: run_id={} processed={} accepted={} persisted={} rejected={}",
                report.run_id,
                report.processed,
                report.accepted,
                report.persisted,
                report.rejected_total()
            );
        }
        Commands::Schedule { sources } => {
            let mut config = CollectConfig::from_env();
            config.scheduler_enabled = true;
            let pipeline = Arc::new(build_pipeline(config, &sources).await?);
            let mut scheduler = pipeline
                .maybe_build_scheduler()
                .await?
                .context("scheduler disabled")?;
            scheduler.start().await.context("starting scheduler")?;
            info!("collection scheduler running, press ctrl-c to stop");
            tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
        }
        Commands::InitSchema => {
            let config = CollectConfig::from_env();
            let store = PgRecordStore::connect(&config.database_url)
                .await
                .context("connecting to database")?;
            store.ensure_schema().await.context("creating schema")?;
            println!("schema ready");
        }
        Commands::Report { runs } => {
            let config = CollectConfig::from_env();
            let digest = cft_sync::report_recent_runs(runs, &config.reports_dir)?;
            println!("{digest}");
        }
    }

    Ok(())
}

async fn build_pipeline(
    config: CollectConfig,
    sources: &std::path::Path,
) -> Result<CollectPipeline> {
    let registry = CollectPipeline::load_registry(sources).await?;
    let store = PgRecordStore::connect(&config.database_url)
        .await
        .context("connecting to database")?;
    store.ensure_schema().await.context("preparing schema")?;
    Ok(CollectPipeline::new(config, registry, Arc::new(store))?)
}
