//! Transform stage - renders one rotation variant per fan-out task
//!
//! Tasks in a batch are independent: each writes to a key only it computes, so
//! they run concurrently and one task's failure never blocks another.

use crate::config::PipelineConfig;
use crate::error::{AppError, Result};
use crate::metrics;
use crate::models::{
    DerivedArtifact, FanOutTask, InvocationResponse, QueueEvent, QueueRecord, RequestContext,
    TransformSummary,
};
use crate::services::keys;
use crate::services::processor::{ImageProcessor, OutputFormat};
use crate::storage::ObjectStorage;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Transform stage with an injected storage collaborator
pub struct TransformService {
    storage: Arc<dyn ObjectStorage>,
    processor: Arc<ImageProcessor>,
    config: PipelineConfig,
}

impl TransformService {
    /// Create a new transform service
    pub fn new(storage: Arc<dyn ObjectStorage>, config: PipelineConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            storage,
            processor: Arc::new(ImageProcessor::new(config.processor_config())),
            config,
        })
    }

    /// Handle a raw queue delivery and render the scheduler response
    pub async fn handle_event(
        &self,
        event: QueueEvent,
        ctx: &RequestContext,
    ) -> Result<InvocationResponse> {
        let summary = self.handle_batch(event.records, ctx).await?;
        Ok(InvocationResponse::from(&summary))
    }

    /// Process a batch of deliveries (raw bodies or queue records).
    ///
    /// Malformed payloads and failed tasks are listed in `errors`; they never
    /// abort the rest of the batch.
    pub async fn handle_batch<M>(
        &self,
        messages: Vec<M>,
        ctx: &RequestContext,
    ) -> Result<TransformSummary>
    where
        M: Into<QueueRecord>,
    {
        let started = Instant::now();
        let records: Vec<QueueRecord> = messages.into_iter().map(Into::into).collect();
        let total = records.len();

        info!(
            request_id = %ctx.request_id,
            tasks = total,
            concurrency = self.config.worker_concurrency,
            "Transform batch started"
        );

        let outcomes: Vec<std::result::Result<DerivedArtifact, String>> =
            stream::iter(records.into_iter().enumerate())
                .map(|(index, record)| self.process_message(index, record, ctx))
                .buffer_unordered(self.config.worker_concurrency)
                .collect()
                .await;

        let mut summary = TransformSummary {
            total,
            ..Default::default()
        };
        for outcome in outcomes {
            match outcome {
                Ok(_) => summary.processed += 1,
                Err(description) => summary.errors.push(description),
            }
        }

        metrics::record_stage_duration("transform", started.elapsed());
        info!(
            request_id = %ctx.request_id,
            processed = summary.processed,
            total = summary.total,
            failed = summary.errors.len(),
            "Transform batch completed"
        );

        Ok(summary)
    }

    /// Parse and run one message, folding any failure into a description
    async fn process_message(
        &self,
        index: usize,
        record: QueueRecord,
        ctx: &RequestContext,
    ) -> std::result::Result<DerivedArtifact, String> {
        let task = match serde_json::from_str::<FanOutTask>(&record.body) {
            Ok(task) => task,
            Err(e) => {
                metrics::record_transform_outcome("malformed");
                warn!(
                    request_id = %ctx.request_id,
                    message_id = %record.label(index),
                    error = %e,
                    "Malformed task payload"
                );
                return Err(format!("message {}: {}", record.label(index), AppError::from(e)));
            }
        };

        match self.process_task(&task).await {
            Ok(artifact) => {
                metrics::record_transform_outcome("processed");
                info!(
                    request_id = %ctx.request_id,
                    task_request_id = %task.request_id,
                    task_id = %task.task_id,
                    angle = %task.variant,
                    key = %artifact.key,
                    "Variant written"
                );
                Ok(artifact)
            }
            Err(e) => {
                metrics::record_transform_outcome("failed");
                warn!(
                    request_id = %ctx.request_id,
                    task_id = %task.task_id,
                    angle = %task.variant,
                    source_key = %task.source_key,
                    error = %e,
                    "Failed to process task"
                );
                Err(format!("task {}: {e}", task.task_id))
            }
        }
    }

    /// Fetch the source, render the variant and write the derived artifact
    pub async fn process_task(&self, task: &FanOutTask) -> Result<DerivedArtifact> {
        debug!(task_id = %task.task_id, source_key = %task.source_key, "Downloading source");
        let source = self.storage.get(&task.bucket, &task.source_key).await?;

        let format = OutputFormat::for_key(&task.source_key);
        let rendered = self
            .processor
            .clone()
            .transform_async(source, task.variant, format)
            .await?;

        let created_at = Utc::now();
        let key = keys::derived_key(
            &self.config.augmented_prefix,
            task.variant,
            &task.source_key,
            format.extension(),
            self.config.output_key_strategy,
            task.task_id,
            created_at,
        );
        let metadata = HashMap::from([
            ("original_key".to_string(), task.source_key.clone()),
            ("angle".to_string(), task.variant.to_string()),
            ("task_id".to_string(), task.task_id.to_string()),
            ("created_at".to_string(), keys::format_timestamp(created_at)),
            ("request_id".to_string(), task.request_id.clone()),
        ]);

        self.storage
            .put(
                &task.bucket,
                &key,
                rendered.data,
                format.content_type(),
                metadata.clone(),
            )
            .await?;

        Ok(DerivedArtifact {
            bucket: task.bucket.clone(),
            key,
            width: rendered.width,
            height: rendered.height,
            content_type: format.content_type().to_string(),
            metadata,
        })
    }
}
