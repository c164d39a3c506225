//! recordsync command-line client.
//!
//! Works against the local cache first and syncs with the remote authority
//! when it can be reached.
//!
//! Usage:
//!   recordsync --remote http://localhost:3000 add '{"title": "X"}'
//!   recordsync sync
//!   recordsync watch

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use recordsync_sync::{ErrorCategory, SyncConfig, SyncError, SyncRuntime};
use recordsync_types::{into_fields, Fields, Record, RecordId};
use serde_json::Value;
use std::path::PathBuf;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "recordsync")]
#[command(about = "Local-first record store with background sync")]
struct Args {
    /// JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Remote authority base URL (overrides the config file)
    #[arg(short, long)]
    remote: Option<String>,

    /// SQLite database path (overrides the config file)
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print every local record
    List,
    /// Add a record from a JSON object
    Add { fields: String },
    /// Replace a record's fields with a JSON object
    Update { id: String, fields: String },
    /// Delete a record
    Remove { id: String },
    /// Push queued operations, then pull the remote snapshot
    Sync,
    /// Replace local records with the remote snapshot
    Pull,
    /// Show reachability and queue status
    Status,
    /// List operations dropped after non-retryable failures
    Failures,
    /// Dismiss a failure notice
    Dismiss { id: i64 },
    /// Run in the foreground, syncing in the background until Ctrl-C
    Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    let config = load_config(&args)?;
    let runtime = SyncRuntime::init(config).context("failed to start recordsync")?;

    match args.command {
        Command::List => print_records(&runtime.cache().get_all().await.map_err(friendly)?),
        Command::Add { fields } => {
            let record = runtime
                .cache()
                .add(parse_fields(&fields)?)
                .await
                .map_err(friendly)?;
            print_record(&record);
        }
        Command::Update { id, fields } => {
            let record = Record::new(RecordId::parse(&id), parse_fields(&fields)?);
            let record = runtime.cache().update(record).await.map_err(friendly)?;
            print_record(&record);
        }
        Command::Remove { id } => {
            runtime
                .cache()
                .remove(&RecordId::parse(&id))
                .await
                .map_err(friendly)?;
            info!("Removed {}", id);
        }
        Command::Sync => {
            if !runtime.reachability().probe_now().await {
                bail!(ErrorCategory::Connectivity.user_message());
            }
            let report = runtime.engine().reconcile().await.map_err(friendly)?;
            info!(
                "Synced: {} succeeded, {} failed",
                report.success, report.failed
            );
            print_records(&runtime.cache().get_all().await.map_err(friendly)?);
        }
        Command::Pull => {
            let records = runtime.engine().sync_from_server().await.map_err(friendly)?;
            print_records(&records);
        }
        Command::Status => {
            let online = runtime.reachability().probe_now().await;
            let status = runtime.status().publish().await;
            let failures = runtime.engine().failed_operations().await.map_err(friendly)?;
            println!(
                "{}",
                serde_json::json!({
                    "online": online,
                    "pendingOperationCount": status.pending_operation_count,
                    "failedOperationCount": failures.len(),
                })
            );
        }
        Command::Failures => {
            for failure in runtime.engine().failed_operations().await.map_err(friendly)? {
                println!("{}", serde_json::to_string(&failure)?);
            }
        }
        Command::Dismiss { id } => {
            if !runtime.engine().dismiss_failure(id).await.map_err(friendly)? {
                bail!("no failure notice with id {id}");
            }
        }
        Command::Watch => watch(&runtime).await?,
    }

    Ok(())
}

fn load_config(args: &Args) -> Result<SyncConfig> {
    let mut config = match &args.config {
        Some(path) => SyncConfig::from_json_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => SyncConfig::default(),
    };
    if let Some(remote) = &args.remote {
        config.remote_base_url = remote.clone();
    }
    if let Some(database) = &args.database {
        config.database_path = database.clone();
    }
    config.validate()?;
    Ok(config)
}

async fn watch(runtime: &SyncRuntime) -> Result<()> {
    let records = runtime.cache().subscribe(|records| {
        info!("{} records", records.len());
    });
    let status = runtime.status().subscribe(|status| {
        debug!(
            "syncing={} pending={}",
            status.is_syncing, status.pending_operation_count
        );
    });
    let reachability = runtime.reachability().subscribe(|online| {
        info!("Remote {}", if *online { "online" } else { "offline" });
    });
    let failures = runtime.engine().subscribe_failures(|notice| {
        warn!("Dropped {} operation: {}", notice.operation.kind(), notice.error);
    });

    runtime.start();
    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");
    runtime.shutdown().await;

    records.unsubscribe();
    status.unsubscribe();
    reachability.unsubscribe();
    failures.unsubscribe();
    Ok(())
}

fn parse_fields(raw: &str) -> Result<Fields> {
    let value: Value = serde_json::from_str(raw).context("fields must be valid JSON")?;
    into_fields(value).map_err(|e| anyhow!("{e}"))
}

/// Logs the detailed error and keeps only the plain-language message.
fn friendly(err: SyncError) -> anyhow::Error {
    debug!("{err}");
    anyhow!(err.user_message())
}

fn print_record(record: &Record) {
    let mut value = record.fields.clone();
    value.insert("id".into(), Value::String(record.id.to_string()));
    println!("{}", Value::Object(value));
}

fn print_records(records: &[Record]) {
    for record in records {
        print_record(record);
    }
}
