//! Trigger payloads and invocation results
//!
//! Trigger shapes follow the object-created notification and queue delivery
//! envelopes the hosting platform hands to each stage.

use serde::{Deserialize, Serialize};

/// Object-created notification batch
#[derive(Debug, Clone, Default, Deserialize)]
pub struct S3Event {
    #[serde(rename = "Records", default)]
    pub records: Vec<S3EventRecord>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct S3EventRecord {
    pub s3: S3Entity,
}

#[derive(Debug, Clone, Deserialize)]
pub struct S3Entity {
    pub bucket: S3Bucket,
    pub object: S3Object,
}

#[derive(Debug, Clone, Deserialize)]
pub struct S3Bucket {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct S3Object {
    /// URL-encoded object key
    pub key: String,
}

/// A newly created object, key still URL-encoded as delivered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEventRecord {
    pub bucket: String,
    pub key: String,
}

impl StorageEventRecord {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

impl S3Event {
    pub fn into_records(self) -> Vec<StorageEventRecord> {
        self.records
            .into_iter()
            .map(|r| StorageEventRecord::new(r.s3.bucket.name, r.s3.object.key))
            .collect()
    }
}

/// Queue delivery batch
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueueEvent {
    #[serde(rename = "Records", default)]
    pub records: Vec<QueueRecord>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueRecord {
    #[serde(rename = "messageId", default)]
    pub message_id: Option<String>,
    pub body: String,
}

impl QueueRecord {
    /// A delivery without a queue-assigned id
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            message_id: None,
            body: body.into(),
        }
    }

    /// Identifier used in error descriptions: the queue's message id when
    /// present, else the position in the batch
    pub fn label(&self, index: usize) -> String {
        match &self.message_id {
            Some(id) => id.clone(),
            None => format!("#{index}"),
        }
    }
}

impl From<String> for QueueRecord {
    fn from(body: String) -> Self {
        QueueRecord::new(body)
    }
}

/// Outcome counts for one ingestion invocation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestionSummary {
    pub total: usize,
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub tasks_enqueued: usize,
    pub errors: Vec<String>,
}

/// Outcome counts for one transform invocation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TransformSummary {
    pub processed: usize,
    pub total: usize,
    pub errors: Vec<String>,
}

/// `{statusCode, body}` envelope returned to the invoking scheduler
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvocationResponse {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub body: String,
}

impl InvocationResponse {
    fn ok<T: Serialize>(body: &T) -> Self {
        Self {
            status_code: 200,
            body: serde_json::to_string(body).unwrap_or_else(|_| "{}".to_string()),
        }
    }
}

impl From<&IngestionSummary> for InvocationResponse {
    fn from(summary: &IngestionSummary) -> Self {
        InvocationResponse::ok(summary)
    }
}

impl From<&TransformSummary> for InvocationResponse {
    fn from(summary: &TransformSummary) -> Self {
        InvocationResponse::ok(summary)
    }
}
