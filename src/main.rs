use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::{info, warn};

use dbsnap_verify::rds::aws::AwsSessionProvider;
use dbsnap_verify::{DispatchOutcome, Dispatcher, FileStateStore, VerifierConfig};

#[derive(Parser)]
#[command(name = "dbsnap-verify")]
#[command(about = "Restore the latest RDS snapshot into a scratch instance, verify it, tear it down, repeat")]
#[command(long_about = "dbsnap-verify advances one per-database verification workflow per \
                        invocation. Wire 'handle' to an SNS/CloudWatch trigger for \
                        event-driven progress, or run 'tick' from a scheduler.")]
struct Cli {
    /// Path to the configuration file
    #[arg(long, global = true, default_value = "dbsnap-verify.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process one inbound trigger event (JSON from a file, or stdin with -)
    Handle {
        /// Event source; defaults to stdin
        #[arg(long, default_value = "-")]
        event: String,
    },
    /// Synthesize a scheduled tick for one watch, or all watches
    Tick {
        /// Restrict to a single watched database
        #[arg(long)]
        database: Option<String>,
    },
    /// Show the persisted workflow state records
    Status {
        /// Restrict to a single watched database
        #[arg(long)]
        database: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    VerifierConfig::load_env_file()?;
    dbsnap_verify::init_telemetry()?;

    let cli = Cli::parse();
    let config = VerifierConfig::load(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;

    match cli.command {
        Commands::Handle { event } => handle_command(&config, &event).await,
        Commands::Tick { database } => tick_command(&config, database.as_deref()).await,
        Commands::Status { database } => status_command(&config, database.as_deref()),
    }
}

async fn handle_command(config: &VerifierConfig, event_source: &str) -> Result<()> {
    let raw = if event_source == "-" {
        std::io::read_to_string(std::io::stdin()).context("reading event from stdin")?
    } else {
        tokio::fs::read_to_string(event_source)
            .await
            .with_context(|| format!("reading event from {event_source}"))?
    };
    let event = match serde_json::from_str(&raw) {
        Ok(event) => event,
        Err(err) => {
            // Malformed events are dropped, not failed: the trigger source
            // sends plenty of noise we were never meant to act on.
            warn!(error = %err, "ignoring event that is not valid JSON");
            return Ok(());
        }
    };

    let store = FileStateStore::new(&config.state.directory);
    let sessions = AwsSessionProvider;
    let dispatcher = Dispatcher::new(config, &store, &sessions);
    report(dispatcher.dispatch(&event).await?);
    Ok(())
}

async fn tick_command(config: &VerifierConfig, database: Option<&str>) -> Result<()> {
    let store = FileStateStore::new(&config.state.directory);
    let sessions = AwsSessionProvider;
    let dispatcher = Dispatcher::new(config, &store, &sessions);

    let mut matched = false;
    for watch in &config.watch {
        if database.is_some_and(|wanted| wanted != watch.database) {
            continue;
        }
        matched = true;
        info!(database = %watch.database, "ticking watch");
        report(dispatcher.dispatch(&json!({ "database": watch.database })).await?);
    }
    if !matched {
        anyhow::bail!(
            "no configured watch matches {}",
            database.unwrap_or("any database")
        );
    }
    Ok(())
}

fn status_command(config: &VerifierConfig, database: Option<&str>) -> Result<()> {
    let store = FileStateStore::new(&config.state.directory);
    for watch in &config.watch {
        if database.is_some_and(|wanted| wanted != watch.database) {
            continue;
        }
        match store.peek(&watch.database)? {
            Some(record) => {
                println!(
                    "{}: {} (verified: {}, verifying: {}, updated: {})",
                    record.database,
                    record.current_state,
                    record.snapshot_verified.as_deref().unwrap_or("never"),
                    record.snapshot_verifying.as_deref().unwrap_or("-"),
                    record.updated_at.format("%Y-%m-%d %H:%M:%S UTC"),
                );
            }
            None => println!("{}: no state record yet", watch.database),
        }
    }
    Ok(())
}

fn report(outcome: DispatchOutcome) {
    match outcome {
        DispatchOutcome::Handled { database, state } => {
            println!("{database}: {state}");
        }
        DispatchOutcome::Ignored { reason } => {
            println!("ignored: {reason}");
        }
    }
}
