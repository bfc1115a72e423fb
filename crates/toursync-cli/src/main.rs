//! Toursync CLI - one-shot sync runner
//!
//! Runs the same pipeline the server exposes over HTTP, but from the
//! command line: `run` executes a full (or single-source) sync and prints
//! the run report as JSON, `probe` checks upstream connectivity without
//! touching the database.

use std::process;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use toursync_common::logging::{init_logging, LogConfig, LogLevel};
use toursync_server::config::Config;
use toursync_server::fetch::TourApiClient;
use toursync_server::orchestrator::SyncRunner;
use toursync_server::source::SourceKind;
use toursync_server::sync::Reconciler;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "toursync")]
#[command(author, version, about = "Tourism open-data sync runner")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Parser, Debug)]
enum Command {
    /// Run a sync against the destination database
    Run {
        /// Restrict the run to one source (greentour, barrier_free, base_tour)
        #[arg(short, long)]
        source: Option<String>,
    },

    /// Probe upstream connectivity without writing anything
    Probe,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { LogLevel::Debug } else { LogLevel::Warn };

    let log_config = LogConfig::new()
        .with_level(log_level)
        .with_file_prefix("toursync-cli");

    // Environment variables take precedence over the built-in defaults.
    let log_config = LogConfig::from_env().unwrap_or(log_config);

    // The CLI still works when logging cannot initialize.
    let _ = init_logging(&log_config);

    let config = Config::load()?;

    match cli.command {
        Command::Run { source } => run(&config, source).await,
        Command::Probe => probe(&config).await,
    }
}

async fn run(config: &Config, source: Option<String>) -> Result<()> {
    let only: Option<SourceKind> = source.as_deref().map(str::parse).transpose()?;

    let client = TourApiClient::from_config(&config.api)
        .map_err(|e| anyhow::anyhow!("{}", e))?;

    let db = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .acquire_timeout(Duration::from_secs(config.database.connect_timeout_secs))
        .connect(&config.database.url)
        .await?;
    info!("Database connection pool established");

    sqlx::migrate!("../../migrations").run(&db).await?;

    let runner = SyncRunner::new(client, Reconciler::new(db));

    let success = match only {
        Some(kind) => {
            let outcome = runner.run_source(kind).await;
            let ok = outcome.status == "SUCCESS";
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            ok
        },
        None => {
            let report = runner.run_all(None).await;
            let ok = report.success;
            println!("{}", serde_json::to_string_pretty(&report)?);
            ok
        },
    };

    if !success {
        process::exit(1);
    }

    Ok(())
}

async fn probe(config: &Config) -> Result<()> {
    let client = TourApiClient::from_config(&config.api)
        .map_err(|e| anyhow::anyhow!("{}", e))?;

    let mut all_ok = true;
    let mut reports = serde_json::Map::new();
    for kind in SourceKind::ALL {
        let report = client.probe(kind).await;
        all_ok &= report.success;
        reports.insert(kind.as_str().to_string(), serde_json::to_value(&report)?);
    }

    println!("{}", serde_json::to_string_pretty(&reports)?);

    if !all_ok {
        process::exit(1);
    }

    Ok(())
}
