//! Ingestion stage - turns object-created events into normalized images and fan-out tasks
//!
//! For each event:
//! 1. Skip keys inside an output namespace (before any I/O)
//! 2. Skip objects whose content type is not an image
//! 3. Reject objects above the size limit
//! 4. Normalize onto the fixed canvas and write it under `processed/`
//! 5. Send one fan-out task per configured rotation angle

use crate::config::PipelineConfig;
use crate::error::{AppError, Result};
use crate::metrics;
use crate::models::{
    FanOutTask, IngestionSummary, InvocationResponse, NormalizedArtifact, RequestContext, S3Event,
    StorageEventRecord,
};
use crate::queue::TaskQueue;
use crate::services::keys::{self, NamespaceGuard};
use crate::services::processor::ImageProcessor;
use crate::storage::ObjectStorage;
use chrono::Utc;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Why an event was skipped without error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Key is inside a namespace the pipeline writes to
    OutputNamespace,
    /// Content type absent, generic, or not `image/*`
    NotAnImage { content_type: Option<String> },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::OutputNamespace => write!(f, "key is in an output namespace"),
            SkipReason::NotAnImage { content_type } => write!(
                f,
                "content type {} is not an image",
                content_type.as_deref().unwrap_or("<none>")
            ),
        }
    }
}

/// Result of handling one event
#[derive(Debug)]
pub enum IngestionOutcome {
    Processed {
        artifact: NormalizedArtifact,
        tasks: Vec<FanOutTask>,
    },
    Skipped(SkipReason),
}

/// Ingestion stage with injected storage and queue collaborators
pub struct IngestionService {
    storage: Arc<dyn ObjectStorage>,
    queue: Arc<dyn TaskQueue>,
    processor: Arc<ImageProcessor>,
    guard: NamespaceGuard,
    config: PipelineConfig,
}

impl IngestionService {
    /// Create a new ingestion service
    pub fn new(
        storage: Arc<dyn ObjectStorage>,
        queue: Arc<dyn TaskQueue>,
        config: PipelineConfig,
    ) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            storage,
            queue,
            processor: Arc::new(ImageProcessor::new(config.processor_config())),
            guard: config.namespace_guard(),
            config,
        })
    }

    /// Handle a raw object-created notification and render the scheduler response
    pub async fn handle_event(
        &self,
        event: S3Event,
        ctx: &RequestContext,
    ) -> Result<InvocationResponse> {
        let summary = self.handle_batch(&event.into_records(), ctx).await?;
        Ok(InvocationResponse::from(&summary))
    }

    /// Process a batch of events independently, in arrival order.
    ///
    /// Per-item failures are recorded in the summary; only batch-fatal errors
    /// (missing queue endpoint, unusable queue) are returned as `Err`.
    pub async fn handle_batch(
        &self,
        records: &[StorageEventRecord],
        ctx: &RequestContext,
    ) -> Result<IngestionSummary> {
        let started = Instant::now();
        self.config.require_queue_url()?;

        info!(
            request_id = %ctx.request_id,
            records = records.len(),
            "Ingestion batch started"
        );

        let mut summary = IngestionSummary {
            total: records.len(),
            ..Default::default()
        };

        for record in records {
            match self.process_record(record, ctx).await {
                Ok(IngestionOutcome::Processed { artifact, tasks }) => {
                    summary.processed += 1;
                    summary.tasks_enqueued += tasks.len();
                    metrics::record_ingestion_outcome("processed");
                    info!(
                        request_id = %ctx.request_id,
                        bucket = %record.bucket,
                        key = %artifact.key,
                        tasks = tasks.len(),
                        "Image normalized and fanned out"
                    );
                }
                Ok(IngestionOutcome::Skipped(reason)) => {
                    summary.skipped += 1;
                    metrics::record_ingestion_outcome("skipped");
                    info!(
                        request_id = %ctx.request_id,
                        bucket = %record.bucket,
                        key = %record.key,
                        reason = %reason,
                        "Event skipped"
                    );
                }
                Err(e) if e.is_batch_fatal() => {
                    error!(
                        request_id = %ctx.request_id,
                        key = %record.key,
                        error = %e,
                        "Ingestion batch aborted"
                    );
                    metrics::record_stage_duration("ingestion", started.elapsed());
                    return Err(e);
                }
                Err(e) => {
                    summary.failed += 1;
                    metrics::record_ingestion_outcome("failed");
                    warn!(
                        request_id = %ctx.request_id,
                        bucket = %record.bucket,
                        key = %record.key,
                        error = %e,
                        "Failed to process event"
                    );
                    summary.errors.push(format!("{}/{}: {e}", record.bucket, record.key));
                }
            }
        }

        metrics::record_stage_duration("ingestion", started.elapsed());
        info!(
            request_id = %ctx.request_id,
            total = summary.total,
            processed = summary.processed,
            skipped = summary.skipped,
            failed = summary.failed,
            tasks_enqueued = summary.tasks_enqueued,
            "Ingestion batch completed"
        );

        Ok(summary)
    }

    /// Handle a single event
    pub async fn process_record(
        &self,
        record: &StorageEventRecord,
        ctx: &RequestContext,
    ) -> Result<IngestionOutcome> {
        let key = keys::decode_event_key(&record.key)?;
        let bucket = record.bucket.as_str();

        if self.guard.is_output_key(&key) {
            return Ok(IngestionOutcome::Skipped(SkipReason::OutputNamespace));
        }

        let head = self.storage.head(bucket, &key).await?;
        if !is_image_content_type(head.content_type.as_deref()) {
            return Ok(IngestionOutcome::Skipped(SkipReason::NotAnImage {
                content_type: head.content_type,
            }));
        }
        self.check_size(head.content_length)?;

        debug!(bucket, key = %key, size = head.content_length, "Downloading source image");
        let original = self.storage.get(bucket, &key).await?;
        self.check_size(original.len() as u64)?;

        let normalized = self.processor.clone().normalize_async(original).await?;

        let normalized_key = keys::normalized_key(
            &self.config.processed_prefix,
            &key,
            normalized.width,
            normalized.height,
        );
        let metadata = HashMap::from([
            ("original_key".to_string(), key.clone()),
            (
                "size".to_string(),
                format!("{}x{}", normalized.width, normalized.height),
            ),
            ("processed_at".to_string(), Utc::now().to_rfc3339()),
            ("request_id".to_string(), ctx.request_id.clone()),
        ]);
        let content_type = normalized.format.content_type().to_string();

        self.storage
            .put(
                bucket,
                &normalized_key,
                normalized.data,
                &content_type,
                metadata.clone(),
            )
            .await?;

        debug!(bucket, key = %normalized_key, "Normalized image uploaded");

        let tasks = self.fan_out(bucket, &normalized_key, ctx).await?;

        Ok(IngestionOutcome::Processed {
            artifact: NormalizedArtifact {
                bucket: bucket.to_string(),
                key: normalized_key,
                width: normalized.width,
                height: normalized.height,
                content_type,
                metadata,
            },
            tasks,
        })
    }

    /// Send one task per configured angle, all pointing at the normalized key
    async fn fan_out(
        &self,
        bucket: &str,
        normalized_key: &str,
        ctx: &RequestContext,
    ) -> Result<Vec<FanOutTask>> {
        let queue_url = self.config.require_queue_url()?;
        let mut tasks = Vec::with_capacity(self.config.angles.len());

        for &angle in &self.config.angles {
            let task = FanOutTask::new(bucket, normalized_key, angle, ctx);
            let body = serde_json::to_string(&task)
                .map_err(|e| AppError::Internal(format!("Failed to serialize task: {e}")))?;

            let message_id = self
                .queue
                .send(queue_url, &body, &task.attributes())
                .await?;
            metrics::record_task_enqueued();

            debug!(
                request_id = %ctx.request_id,
                task_id = %task.task_id,
                angle = %angle,
                message_id = %message_id,
                "Rotation task queued"
            );
            tasks.push(task);
        }

        Ok(tasks)
    }

    fn check_size(&self, size: u64) -> Result<()> {
        if size > self.config.max_image_bytes {
            return Err(AppError::Oversized {
                size,
                limit: self.config.max_image_bytes,
            });
        }
        Ok(())
    }
}

/// Only an explicit `image/*` type counts; absent or generic types are not guessed at
fn is_image_content_type(content_type: Option<&str>) -> bool {
    content_type
        .and_then(|ct| ct.parse::<mime::Mime>().ok())
        .map(|m| m.type_() == mime::IMAGE)
        .unwrap_or(false)
}
