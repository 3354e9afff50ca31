//! ferrite-import - copy keys into Ferrite or Redis
//!
//! Reads keys from running instances or RDB snapshot files and restores
//! them into a destination, either overwriting (mirror), only filling in
//! missing keys (backfill), or just listing what would be copied (dry run).

mod output;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use colored::Colorize;
use tracing::{error, info};

use ferrite_import::config::{ImportConfig, LogFormat, LoggingConfig};
use ferrite_import::migration::source::endpoint_url;
use ferrite_import::migration::{
    run_sources, CopyMode, KeyValueStore, MigrationError, RedisStore, SourceDescriptor,
};
use ferrite_import::pattern::KeyPattern;

use output::Progress;

/// ferrite-import - copy keys between Redis-compatible servers
#[derive(Parser, Debug)]
#[command(name = "ferrite-import")]
#[command(author, version, about = "Copy keys into Ferrite or Redis from live instances or RDB snapshots")]
struct ImportArgs {
    /// Comma-separated sources: host:port, redis:// URLs, or rdb://path snapshots
    #[arg(short, long)]
    source: String,

    /// Destination endpoint (host:port or redis:// URL)
    #[arg(short, long, required_unless_present = "dry_run")]
    destination: Option<String>,

    /// Key filter: a glob (e.g. "user:*") or a /regex/ matched at the key start
    #[arg(short, long)]
    pattern: Option<String>,

    /// Only copy keys missing from the destination
    #[arg(short, long)]
    backfill: bool,

    /// List matching keys without writing anything
    #[arg(long)]
    dry_run: bool,

    /// Print every key as it is processed
    #[arg(short, long)]
    verbose: bool,

    /// Keys per grouped read and write
    #[arg(long)]
    batch_size: Option<usize>,

    /// Path to a TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = ImportArgs::parse();

    match run(args).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

/// Returns whether every source completed.
async fn run(args: ImportArgs) -> anyhow::Result<bool> {
    let mut config = match &args.config {
        Some(path) => ImportConfig::from_file(path)?,
        None => ImportConfig::default(),
    };
    if let Some(batch_size) = args.batch_size {
        config.migration.batch_size = batch_size;
    }
    config.validate()?;
    init_logging(&config.logging);

    let pattern = KeyPattern::parse(args.pattern.as_deref())?;
    let mode = CopyMode::from_flags(args.dry_run, args.backfill);
    let descriptors = SourceDescriptor::parse_list(&args.source)?;

    let destination = match (mode, args.destination.as_deref()) {
        (CopyMode::DryRun, _) => None,
        (_, Some(descriptor)) => {
            let url = endpoint_url(descriptor)?;
            let store = RedisStore::connect_destination(&url)
                .await
                .map_err(MigrationError::Destination)
                .with_context(|| format!("connecting to destination {url}"))?;
            Some(store)
        }
        (_, None) => anyhow::bail!("a destination is required unless --dry-run is given"),
    };

    let mut sources = Vec::with_capacity(descriptors.len());
    for descriptor in &descriptors {
        let source = descriptor
            .open()
            .await
            .with_context(|| format!("opening source {descriptor}"))?;
        sources.push(source);
    }

    let stop = Arc::new(AtomicBool::new(false));
    spawn_signal_handler(Arc::clone(&stop));

    info!(
        sources = sources.len(),
        ?mode,
        pattern = ?pattern,
        "starting import"
    );

    let mut progress = Progress::new(args.verbose);
    let result = run_sources(
        sources,
        destination.as_ref().map(|d| d as &dyn KeyValueStore),
        &pattern,
        mode,
        &config.migration_options(),
        &stop,
        |key, count| progress.record(key, count),
    )
    .await;
    progress.finish();
    let summary = result?;

    for failed in summary.failed() {
        eprintln!(
            "{} source {} abandoned: {}",
            "warning:".yellow().bold(),
            failed.source,
            failed.error.as_deref().unwrap_or("unknown error")
        );
    }
    if summary.interrupted {
        eprintln!("{} interrupted, stopped at a batch boundary", "warning:".yellow().bold());
    }

    Ok(summary.is_success())
}

fn init_logging(logging: &LoggingConfig) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    // Logs go to stderr; stdout carries progress and key output.
    match logging.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

/// Request a stop on SIGINT or SIGTERM; the run ends at the next batch boundary.
fn spawn_signal_handler(stop: Arc<AtomicBool>) {
    tokio::spawn(async move {
        if let Err(e) = shutdown_signal().await {
            error!("Failed to listen for shutdown signals: {}", e);
            return;
        }
        info!("Shutdown signal received");
        stop.store(true, Ordering::SeqCst);
    });
}

#[cfg(unix)]
async fn shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = term.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
