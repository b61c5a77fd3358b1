//! Image Processor - ingestion stage entry point
//!
//! Reads an object-created notification (`{"Records":[{"s3":{...}}]}`) from stdin,
//! normalizes every candidate image and spools one rotation task per angle.
//! The `{statusCode, body}` response is printed to stdout.
//!
//! Usage:
//! - `image-processor < event.json`
//! - `image-processor upload <file> [key]`: store a local file, then ingest it
//!
//! Environment variables (in addition to the pipeline settings in `PipelineConfig`):
//! - SQS_QUEUE_URL: queue endpoint tasks are addressed to (required)
//! - STORAGE_ROOT: local storage root directory (default: "./data")
//! - QUEUE_SPOOL_DIR: spool directory shared with rotation-worker (default: "./data/.queue")
//! - UPLOAD_BUCKET: bucket used by `upload` (default: "images")

use anyhow::{bail, Context, Result};
use augmentation_service::models::{S3Event, StorageEventRecord};
use augmentation_service::queue::SpoolDirQueue;
use augmentation_service::storage::{LocalFsStorage, ObjectStorage};
use augmentation_service::{telemetry, IngestionService, PipelineConfig, RequestContext};
use bytes::Bytes;
use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

#[derive(Debug)]
struct LocalConfig {
    storage_root: PathBuf,
    spool_dir: PathBuf,
    upload_bucket: String,
}

impl LocalConfig {
    fn from_env() -> Self {
        let storage_root =
            PathBuf::from(std::env::var("STORAGE_ROOT").unwrap_or_else(|_| "./data".to_string()));
        let spool_dir = std::env::var("QUEUE_SPOOL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| storage_root.join(".queue"));

        Self {
            storage_root,
            spool_dir,
            upload_bucket: std::env::var("UPLOAD_BUCKET").unwrap_or_else(|_| "images".to_string()),
        }
    }
}

/// Content type an uploading client would declare for the file
fn declared_content_type(path: &Path) -> mime::Mime {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("jpg") | Some("jpeg") => mime::IMAGE_JPEG,
        Some("png") => mime::IMAGE_PNG,
        Some("bmp") => mime::IMAGE_BMP,
        Some("gif") => mime::IMAGE_GIF,
        Some("txt") => mime::TEXT_PLAIN,
        _ => mime::APPLICATION_OCTET_STREAM,
    }
}

async fn upload(
    storage: &LocalFsStorage,
    bucket: &str,
    file: &Path,
    key: &str,
) -> Result<StorageEventRecord> {
    let data = tokio::fs::read(file)
        .await
        .with_context(|| format!("failed to read {}", file.display()))?;
    let content_type = declared_content_type(file);

    storage
        .put(bucket, key, Bytes::from(data), content_type.essence_str(), HashMap::new())
        .await
        .with_context(|| format!("failed to store {bucket}/{key}"))?;
    info!(bucket, key, content_type = %content_type, "Uploaded local file");

    // Notifications carry URL-encoded keys
    Ok(StorageEventRecord::new(bucket, urlencoding::encode(key).into_owned()))
}

fn read_stdin_event() -> Result<S3Event> {
    let mut raw = String::new();
    std::io::stdin()
        .read_to_string(&mut raw)
        .context("failed to read event from stdin")?;
    serde_json::from_str(&raw).context("stdin is not an object-created notification")
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    telemetry::init_tracing("image_processor=info,augmentation_service=info");

    let config = PipelineConfig::from_env()?;
    let local = LocalConfig::from_env();
    info!(
        storage_root = %local.storage_root.display(),
        spool_dir = %local.spool_dir.display(),
        angles = ?config.angles,
        "Configuration loaded"
    );

    let storage = Arc::new(LocalFsStorage::new(&local.storage_root));
    let queue = Arc::new(SpoolDirQueue::new(&local.spool_dir));
    let service = IngestionService::new(storage.clone(), queue, config)?;
    let ctx = RequestContext::generate();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let records = match args.first().map(String::as_str) {
        Some("upload") => {
            let file = args
                .get(1)
                .map(PathBuf::from)
                .context("usage: image-processor upload <file> [key]")?;
            let key = match args.get(2) {
                Some(key) => key.clone(),
                None => file
                    .file_name()
                    .and_then(|n| n.to_str())
                    .context("file name is not valid UTF-8")?
                    .to_string(),
            };
            vec![upload(&storage, &local.upload_bucket, &file, &key).await?]
        }
        Some(other) => bail!("unknown command '{other}', expected 'upload' or no arguments"),
        None => read_stdin_event()?.into_records(),
    };

    let summary = service.handle_batch(&records, &ctx).await?;
    let response = augmentation_service::models::InvocationResponse::from(&summary);
    println!("{}", serde_json::to_string_pretty(&response)?);

    Ok(())
}
