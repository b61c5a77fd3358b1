//! Error types for the augmentation pipeline
//!
//! Errors fall into three buckets: benign skips (not errors at all, see
//! `IngestionOutcome::Skipped`), per-item failures recorded in a batch summary,
//! and batch-fatal failures that are propagated to the invoking scheduler.

use thiserror::Error;

/// Result type for augmentation-service operations
pub type Result<T> = std::result::Result<T, AppError>;

/// Result type for storage collaborator operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Result type for queue collaborator operations
pub type QueueResult<T> = std::result::Result<T, QueueError>;

/// Errors raised by an `ObjectStorage` implementation
#[derive(Error, Debug)]
pub enum StorageError {
    /// Object does not exist at `(bucket, key)`
    #[error("Object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    /// Local filesystem failure
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Sidecar metadata could not be read or written
    #[error("Storage metadata error: {0}")]
    Metadata(#[from] serde_json::Error),

    /// Any other backend failure (transient or not)
    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Errors raised by a `TaskQueue` implementation
#[derive(Error, Debug)]
pub enum QueueError {
    /// The queue endpoint is unknown or cannot be reached at all
    #[error("Queue misconfigured: {0}")]
    Misconfigured(String),

    /// A single send failed
    #[error("Queue send failed: {0}")]
    SendFailed(String),

    /// Message could not be serialized or deserialized
    #[error("Queue serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Spool directory failure
    #[error("Queue I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    /// Missing or invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    /// Decode or encode failure
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// Fan-out task payload is malformed
    #[error("Invalid task payload: {0}")]
    InvalidTask(String),

    /// Trigger event could not be parsed
    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    /// Source object exceeds the configured size limit
    #[error("Image too large: {size} bytes exceeds limit of {limit} bytes")]
    Oversized { size: u64, limit: u64 },

    /// Internal error (blocking task panicked, etc.)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Whether the error makes the whole batch unprocessable.
    ///
    /// Everything else is a per-item failure and is recorded in the batch
    /// summary instead of being propagated.
    pub fn is_batch_fatal(&self) -> bool {
        matches!(
            self,
            AppError::Config(_) | AppError::Queue(QueueError::Misconfigured(_))
        )
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::InvalidTask(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_fatal_classification() {
        assert!(AppError::Config("SQS_QUEUE_URL not set".into()).is_batch_fatal());
        let misconfigured = QueueError::Misconfigured("no such queue".into());
        assert!(AppError::Queue(misconfigured).is_batch_fatal());

        assert!(!AppError::Queue(QueueError::SendFailed("throttled".into())).is_batch_fatal());
        assert!(!AppError::Oversized { size: 2, limit: 1 }.is_batch_fatal());
        assert!(!AppError::InvalidTask("missing field".into()).is_batch_fatal());
        assert!(!AppError::Storage(StorageError::NotFound {
            bucket: "b".into(),
            key: "k".into()
        })
        .is_batch_fatal());
    }

    #[test]
    fn test_oversized_message() {
        let err = AppError::Oversized {
            size: 52_428_800,
            limit: 10_485_760,
        };
        assert_eq!(
            err.to_string(),
            "Image too large: 52428800 bytes exceeds limit of 10485760 bytes"
        );
    }
}
