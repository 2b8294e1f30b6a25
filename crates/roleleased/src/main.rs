//! roleleased - timed grant daemon
//!
//! `run` keeps the process alive: it recovers timers from the database, then
//! sweeps on the configured period until interrupted. The other subcommands
//! are one-shot operations against the same database; a running daemon picks
//! up their effects on its next sweep.

mod collab;
mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use rolelease::{GrantEngine, GrantOutcome, QueryOutcome, ReconciliationSweep, RevokeOutcome};
use rolelease_core::{format_instant, ContextId, GrantKey, GrantRequest, SystemClock};
use rolelease_store::SqliteStore;

use crate::collab::{LogBackend, LogSink};
use crate::config::DaemonConfig;

/// rolelease daemon - time-limited entitlements
#[derive(Parser, Debug)]
#[command(name = "roleleased")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "rolelease.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log to file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Command {
    /// Recover timers and run the reconciliation sweep until interrupted
    Run,

    /// Grant the configured entitlement, or renew it if still active
    Grant {
        subject: String,

        /// Owning context (defaults to `grant.context` from the config)
        #[arg(long)]
        context: Option<String>,
    },

    /// Revoke a grant now
    Revoke { subject: String },

    /// Show whether a grant is active and how long it has left
    Check { subject: String },

    /// List grant and renewal history
    History {
        subject: String,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Remove every grant and history entry of a context
    Teardown { context: String },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let runtime = tokio::runtime::Runtime::new().context("failed to create Tokio runtime")?;
    runtime.block_on(async_main(args))
}

async fn async_main(args: Args) -> Result<()> {
    init_logging(&args)?;

    let config = DaemonConfig::from_file(&args.config)
        .with_context(|| format!("failed to load config from {}", args.config.display()))?;
    let engine = build_engine(&config)?;

    let result = execute(&engine, &config, args.command).await;
    engine.shutdown();
    result
}

fn init_logging(args: &Args) -> Result<()> {
    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    if let Some(log_file) = &args.log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)
            .context("failed to open log file")?;

        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(file)
                    .with_ansi(false),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    Ok(())
}

fn build_engine(config: &DaemonConfig) -> Result<GrantEngine<SqliteStore>> {
    let store = SqliteStore::open(&config.store.path).with_context(|| {
        format!("failed to open store at {}", config.store.path.display())
    })?;

    GrantEngine::new(
        Arc::new(store),
        Arc::new(LogBackend),
        Arc::new(LogSink),
        Arc::new(SystemClock),
        config.engine_config(),
    )
    .context("failed to build grant engine")
}

async fn execute(
    engine: &GrantEngine<SqliteStore>,
    config: &DaemonConfig,
    command: Command,
) -> Result<()> {
    let key_for = |subject: &str| GrantKey::new(subject, config.grant.kind.as_str());

    match command {
        Command::Run => run(engine).await,

        Command::Grant { subject, context } => {
            let context = context.unwrap_or_else(|| config.grant.context.clone());
            let request = GrantRequest::new(subject.as_str(), config.grant.kind.as_str(), context);
            let now = engine.now();

            let outcome = engine
                .grant_with_entitlement(&request, now)
                .await
                .context("grant failed")?;
            let (verb, expires_at) = match outcome {
                GrantOutcome::Created { expires_at } => ("granted", expires_at),
                GrantOutcome::Renewed { expires_at } => ("renewed", expires_at),
            };
            println!("{subject}: {verb} until {}", format_instant(expires_at));
            Ok(())
        }

        Command::Revoke { subject } => {
            let outcome = engine
                .revoke_with_entitlement(&key_for(&subject))
                .await
                .context("revoke failed")?;
            match outcome {
                RevokeOutcome::Revoked => println!("{subject}: revoked"),
                RevokeOutcome::NothingToRevoke => println!("{subject}: nothing to revoke"),
            }
            Ok(())
        }

        Command::Check { subject } => {
            let outcome = engine
                .query(&key_for(&subject), engine.now())
                .await
                .context("query failed")?;
            match outcome {
                QueryOutcome::Active {
                    expires_at,
                    remaining,
                } => println!(
                    "{subject}: active until {}, {remaining} left",
                    format_instant(expires_at)
                ),
                QueryOutcome::NotActive => println!("{subject}: no active grant"),
            }
            Ok(())
        }

        Command::History { subject, json } => {
            let entries = engine
                .history(&key_for(&subject))
                .await
                .context("history lookup failed")?;

            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else if entries.is_empty() {
                println!("{subject}: no history");
            } else {
                for entry in &entries {
                    println!(
                        "{:<6} {} -> {} ({})",
                        entry.action.as_str(),
                        format_instant(entry.granted_at),
                        format_instant(entry.expires_at),
                        entry.owning_context,
                    );
                }
            }
            Ok(())
        }

        Command::Teardown { context } => {
            let report = engine
                .teardown_context(&ContextId::new(context.as_str()))
                .await
                .context("teardown failed")?;
            println!(
                "{context}: removed {} grants and {} history entries",
                report.grants_removed, report.history_removed
            );
            Ok(())
        }
    }
}

async fn run(engine: &GrantEngine<SqliteStore>) -> Result<()> {
    let armed = engine
        .recover(engine.now())
        .await
        .context("failed to recover timers")?;
    info!(armed, "daemon started");

    ReconciliationSweep::new(engine.clone())
        .run_until(shutdown_signal())
        .await;

    info!("daemon stopping");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
    }
}
