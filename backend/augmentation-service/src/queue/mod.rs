//! Task queue collaborator
//!
//! Delivery is assumed at-least-once; consumers must tolerate duplicates.

pub mod memory;
pub mod spool;

use crate::error::QueueResult;
use crate::models::QueueRecord;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub use memory::InMemoryQueue;
pub use spool::SpoolDirQueue;

/// A message as accepted by the queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedMessage {
    pub message_id: String,
    pub queue_id: String,
    /// JSON payload, kept as the raw string consumers receive
    pub body: String,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

impl From<QueuedMessage> for QueueRecord {
    fn from(message: QueuedMessage) -> Self {
        QueueRecord {
            message_id: Some(message.message_id),
            body: message.body,
        }
    }
}

/// Queue trait for dispatching fan-out tasks
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Send one message and return its queue-assigned id
    ///
    /// # Errors
    ///
    /// `QueueError::Misconfigured` when the endpoint itself is unusable (batch-fatal),
    /// `QueueError::SendFailed` for a failure of this message only.
    async fn send(
        &self,
        queue_id: &str,
        body: &str,
        attributes: &HashMap<String, String>,
    ) -> QueueResult<String>;
}
