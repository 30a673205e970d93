//! marketplace-sync - Keeps a local catalog in sync with online marketplaces
//!
//! This is the command-line entry point. One-shot commands run against every
//! enabled marketplace unless `--marketplace` selects one; `run` starts the
//! order import scheduler until interrupted.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use marketplace_sync::clock::{Clock, SystemClock};
use marketplace_sync::config::Config;
use marketplace_sync::database::{Database, SqliteDatabase, SyncRecordFilter};
use marketplace_sync::models::{ResourceType, SyncStatus};
use marketplace_sync::otel::{init_tracing, OtelProvider, SyncMetrics};
use marketplace_sync::sync::{
    ApiClient, ImportJob, ManualImportHandle, MarketplaceSynchronizer, SyncScheduler,
};

/// marketplace-sync - Keeps a local catalog in sync with online marketplaces
#[derive(Parser, Debug)]
#[command(name = "marketplace-sync")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, global = true, env = "MARKETPLACE_SYNC_CONFIG")]
    config: Option<String>,

    /// Restrict the command to one marketplace (ebay, etsy, amazon)
    #[arg(short, long, global = true)]
    marketplace: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create or update the remote listing of a product
    SyncProduct {
        /// Local product id
        id: i64,
    },

    /// Push a new quantity for a linked product
    SyncInventory {
        /// Local product id
        id: i64,
        /// New available quantity
        quantity: i64,
    },

    /// Import orders created after the stored watermark
    ImportOrders {
        /// Import orders created after this RFC 3339 timestamp instead
        #[arg(long)]
        since: Option<String>,
    },

    /// Show sync records
    Status {
        /// Only show records in error
        #[arg(long)]
        errors_only: bool,
    },

    /// Show the most recent sync log entries
    Logs {
        /// Number of entries to show
        #[arg(long, default_value_t = 50)]
        limit: u32,
    },

    /// Remove the link between a local entity and its remote counterpart
    Unlink {
        /// Resource type (product or order)
        resource: ResourceType,
        /// Local id
        id: i64,
    },

    /// Run the order import scheduler until interrupted
    ///
    /// SIGHUP triggers an immediate import for every marketplace.
    Run,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = load_config(&args)?;

    let otel_provider = OtelProvider::new(&config.otel)?;
    init_tracing(&otel_provider, &config.logging)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        command = ?args.command,
        "Starting marketplace-sync"
    );

    let database: Arc<dyn Database> = Arc::new(SqliteDatabase::new(&config.database.path).await?);
    info!(path = %config.database.path, "Database initialized");

    let metrics = Arc::new(SyncMetrics::new(&otel_provider.meter()));

    let result = execute(&args, &config, database, metrics).await;

    if let Err(e) = otel_provider.shutdown() {
        error!(error = %e, "Failed to shutdown OpenTelemetry");
    }

    result
}

async fn execute(
    args: &Args,
    config: &Config,
    database: Arc<dyn Database>,
    metrics: Arc<SyncMetrics>,
) -> anyhow::Result<()> {
    match &args.command {
        Command::SyncProduct { id } => {
            let mut failures = 0;
            for sync in build_synchronizers(args, config, &database, &metrics)? {
                let result = sync.sync_product(*id).await;
                println!("{}", result);
                if !result.is_success() {
                    failures += 1;
                }
            }
            ensure_no_failures(failures)
        }

        Command::SyncInventory { id, quantity } => {
            let mut failures = 0;
            for sync in build_synchronizers(args, config, &database, &metrics)? {
                let result = sync.sync_inventory(*id, *quantity).await;
                println!("{}", result);
                if !result.is_success() {
                    failures += 1;
                }
            }
            ensure_no_failures(failures)
        }

        Command::ImportOrders { since } => {
            let since = since.as_deref().map(parse_since).transpose()?;
            let mut failures = 0;
            for sync in build_synchronizers(args, config, &database, &metrics)? {
                match sync.import_orders(since).await {
                    Ok(result) => {
                        println!("[{}] {}", sync.marketplace(), result);
                        for failure in &result.errors {
                            println!(
                                "  {}: {}",
                                failure.remote_id.as_deref().unwrap_or("-"),
                                failure.error
                            );
                        }
                        failures += result.errors.len();
                    }
                    Err(e) => {
                        println!("[{}] import failed: {}", sync.marketplace(), e);
                        failures += 1;
                    }
                }
            }
            ensure_no_failures(failures)
        }

        Command::Status { errors_only } => {
            let filter = SyncRecordFilter {
                marketplace: args.marketplace.clone(),
                status: errors_only.then_some(SyncStatus::Error),
                ..Default::default()
            };
            for record in database.list_sync_records(&filter).await? {
                println!(
                    "{:<8} {:<8} {:>8} {:<8} {:<24} {}",
                    record.marketplace,
                    record.resource_type,
                    record.local_id,
                    record.status,
                    record.remote_id.as_deref().unwrap_or("-"),
                    record.error_message.as_deref().unwrap_or("")
                );
            }
            Ok(())
        }

        Command::Logs { limit } => {
            for entry in database.get_sync_logs(*limit, 0).await? {
                if args
                    .marketplace
                    .as_deref()
                    .is_some_and(|mp| mp != entry.marketplace)
                {
                    continue;
                }
                println!(
                    "{} {:<8} {:<18} {:<8} {}",
                    entry.created_at.to_rfc3339(),
                    entry.marketplace,
                    entry.action,
                    entry.status,
                    entry.message
                );
            }
            Ok(())
        }

        Command::Unlink { resource, id } => {
            if args.marketplace.is_none() {
                anyhow::bail!("unlink requires --marketplace");
            }
            for sync in build_synchronizers(args, config, &database, &metrics)? {
                sync.unlink(*resource, *id).await?;
                println!("[{}] {} {} unlinked", sync.marketplace(), resource, id);
            }
            Ok(())
        }

        Command::Run => {
            let jobs: Vec<Arc<dyn ImportJob>> = build_synchronizers(args, config, &database, &metrics)?
                .into_iter()
                .map(|sync| Arc::new(sync) as Arc<dyn ImportJob>)
                .collect();
            if jobs.is_empty() {
                anyhow::bail!("no marketplace is enabled");
            }

            let names: Vec<String> = jobs.iter().map(|job| job.name().to_string()).collect();

            let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
            let scheduler = SyncScheduler::new(config.scheduler.clone(), jobs, shutdown_rx);
            let manual = scheduler.manual_handle();
            let handle = tokio::spawn(scheduler.run());

            serve_until_shutdown(&manual, &names).await;
            log_job_status(&manual).await;
            let _ = shutdown_tx.send(());
            handle.await?;

            info!("marketplace-sync shutdown complete");
            Ok(())
        }
    }
}

/// Build one synchronizer per selected marketplace
fn build_synchronizers(
    args: &Args,
    config: &Config,
    database: &Arc<dyn Database>,
    metrics: &Arc<SyncMetrics>,
) -> anyhow::Result<Vec<MarketplaceSynchronizer>> {
    let targets = match &args.marketplace {
        Some(name) => vec![config.marketplace_target(name)?],
        None => config.marketplace_targets()?,
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    Ok(targets
        .into_iter()
        .map(|(target, credential)| {
            info!(marketplace = target.name(), base_url = %target.api_base_url, "Marketplace enabled");
            let api = ApiClient::connect(target, credential, database.clone(), clock.clone());
            MarketplaceSynchronizer::new(api, database.clone(), clock.clone())
                .with_metrics(metrics.clone())
        })
        .collect())
}

fn parse_since(raw: &str) -> anyhow::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| anyhow::anyhow!("--since must be an RFC 3339 timestamp: {}", e))
}

fn ensure_no_failures(failures: usize) -> anyhow::Result<()> {
    if failures > 0 {
        anyhow::bail!("{} operation(s) failed", failures);
    }
    Ok(())
}

/// Load configuration from file or environment
fn load_config(args: &Args) -> anyhow::Result<Config> {
    match &args.config {
        Some(path) => {
            // Use eprintln! since tracing is not yet initialized
            eprintln!("Loading configuration from file: {}", path);
            let mut config = Config::from_file(path)
                .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
            config.apply_env_overrides()?;
            Ok(config)
        }
        None => {
            eprintln!("Loading configuration from environment variables");
            Config::from_env().map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
        }
    }
}

/// Wait for a shutdown signal, importing every job now on each SIGHUP
async fn serve_until_shutdown(manual: &ManualImportHandle, names: &[String]) {
    #[cfg(unix)]
    {
        let mut hangup = match signal::unix::signal(signal::unix::SignalKind::hangup()) {
            Ok(hangup) => hangup,
            Err(e) => {
                warn!(error = %e, "SIGHUP handler unavailable, manual imports disabled");
                shutdown_signal().await;
                return;
            }
        };

        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = hangup.recv() => {
                    info!("Received SIGHUP, importing orders now");
                    for name in names {
                        match manual.trigger(name).await {
                            Ok(result) => info!(job = %name, result = %result, "Manual import finished"),
                            Err(e) => warn!(job = %name, error = %e, "Manual import failed"),
                        }
                    }
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = (manual, names);
        shutdown_signal().await;
    }
}

async fn log_job_status(manual: &ManualImportHandle) {
    for (name, status) in manual.status().await {
        let last_result = match &status.last_result {
            Some(Ok(result)) => result.to_string(),
            Some(Err(e)) => e.clone(),
            None => "never ran".to_string(),
        };
        info!(
            job = %name,
            in_progress = status.in_progress,
            last_result = %last_result,
            "Import job status"
        );
    }
}

/// Create a future that resolves when a shutdown signal is received
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
