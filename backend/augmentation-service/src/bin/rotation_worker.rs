//! Rotation Worker - transform stage entry point
//!
//! Polls the spool directory written by image-processor and renders one
//! rotation variant per task. Runs until ctrl+c unless told otherwise.
//!
//! Usage:
//! - `rotation-worker`: poll the spool until shutdown
//! - `rotation-worker --once`: drain the spool, then exit
//! - `rotation-worker --stdin`: process a queue delivery (`{"Records":[{"body":...}]}`) from stdin
//!
//! Environment variables (in addition to the pipeline settings in `PipelineConfig`):
//! - STORAGE_ROOT: local storage root directory (default: "./data")
//! - QUEUE_SPOOL_DIR: spool directory shared with image-processor (default: "./data/.queue")
//! - BATCH_SIZE: messages taken from the spool per batch (default: 10)
//! - POLL_INTERVAL_MS: idle wait between spool polls (default: 1000)

use anyhow::{bail, Context, Result};
use augmentation_service::models::{InvocationResponse, QueueEvent};
use augmentation_service::queue::SpoolDirQueue;
use augmentation_service::storage::LocalFsStorage;
use augmentation_service::{telemetry, PipelineConfig, RequestContext, TransformService};
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[derive(Debug)]
struct WorkerConfig {
    storage_root: PathBuf,
    spool_dir: PathBuf,
    batch_size: usize,
    poll_interval_ms: u64,
}

impl WorkerConfig {
    fn from_env() -> Self {
        let storage_root =
            PathBuf::from(std::env::var("STORAGE_ROOT").unwrap_or_else(|_| "./data".to_string()));
        let spool_dir = std::env::var("QUEUE_SPOOL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| storage_root.join(".queue"));

        Self {
            storage_root,
            spool_dir,
            batch_size: std::env::var("BATCH_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|&n: &usize| n > 0)
                .unwrap_or(10),
            poll_interval_ms: std::env::var("POLL_INTERVAL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1000),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Poll,
    Once,
    Stdin,
}

fn parse_mode() -> Result<Mode> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        None => Ok(Mode::Poll),
        Some("--once") => Ok(Mode::Once),
        Some("--stdin") => Ok(Mode::Stdin),
        Some(other) => bail!("unknown argument '{other}', expected --once or --stdin"),
    }
}

/// Take one batch from the spool and run it; returns how many messages were taken
async fn run_spool_batch(
    service: &TransformService,
    queue: &SpoolDirQueue,
    batch_size: usize,
) -> Result<usize> {
    let messages = queue
        .drain(batch_size)
        .await
        .context("failed to read the spool directory")?;
    if messages.is_empty() {
        return Ok(0);
    }

    let taken = messages.len();
    let ctx = RequestContext::generate();
    let summary = service.handle_batch(messages, &ctx).await?;

    for description in &summary.errors {
        warn!(request_id = %ctx.request_id, error = %description, "Task not rendered");
    }
    let response = InvocationResponse::from(&summary);
    println!("{}", serde_json::to_string(&response)?);

    Ok(taken)
}

async fn drain_until_empty(
    service: &TransformService,
    queue: &SpoolDirQueue,
    batch_size: usize,
) -> Result<usize> {
    let mut total = 0;
    loop {
        let taken = run_spool_batch(service, queue, batch_size).await?;
        if taken == 0 {
            return Ok(total);
        }
        total += taken;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    telemetry::init_tracing("rotation_worker=info,augmentation_service=info");

    info!("Starting Rotation Worker");

    let mode = parse_mode()?;
    let config = PipelineConfig::from_env()?;
    let worker = WorkerConfig::from_env();
    info!(
        storage_root = %worker.storage_root.display(),
        spool_dir = %worker.spool_dir.display(),
        batch_size = worker.batch_size,
        concurrency = config.worker_concurrency,
        mode = ?mode,
        "Configuration loaded"
    );

    let storage = Arc::new(LocalFsStorage::new(&worker.storage_root));
    let service = TransformService::new(storage, config)?;
    let queue = SpoolDirQueue::new(&worker.spool_dir);

    match mode {
        Mode::Stdin => {
            let mut raw = String::new();
            std::io::stdin()
                .read_to_string(&mut raw)
                .context("failed to read event from stdin")?;
            let event: QueueEvent =
                serde_json::from_str(&raw).context("stdin is not a queue delivery")?;
            let response = service
                .handle_event(event, &RequestContext::generate())
                .await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Mode::Once => {
            let total = drain_until_empty(&service, &queue, worker.batch_size).await?;
            info!(messages = total, "Spool drained");
        }
        Mode::Poll => {
            let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
            tokio::spawn(async move {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!(error = %e, "Failed to listen for ctrl+c");
                    return;
                }
                info!("Shutdown signal received");
                let _ = shutdown_tx.send(true);
            });

            let idle = Duration::from_millis(worker.poll_interval_ms);
            info!("Starting spool poll loop");
            loop {
                if *shutdown_rx.borrow() {
                    break;
                }

                match run_spool_batch(&service, &queue, worker.batch_size).await {
                    // More work is likely waiting
                    Ok(taken) if taken > 0 => continue,
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "Batch failed, will retry next interval"),
                }

                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            info!("Poll loop shutting down");
                            break;
                        }
                    }
                    _ = tokio::time::sleep(idle) => {}
                }
            }
        }
    }

    info!("Rotation Worker stopped");
    Ok(())
}
