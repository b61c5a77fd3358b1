//! In-process queue that captures sent messages

use super::{QueuedMessage, TaskQueue};
use crate::error::QueueResult;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
pub struct InMemoryQueue {
    messages: Mutex<Vec<QueuedMessage>>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of pending messages in send order
    pub async fn messages(&self) -> Vec<QueuedMessage> {
        self.messages.lock().await.clone()
    }

    /// Remove and return all pending messages in send order
    pub async fn drain(&self) -> Vec<QueuedMessage> {
        std::mem::take(&mut *self.messages.lock().await)
    }

    pub async fn len(&self) -> usize {
        self.messages.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.messages.lock().await.is_empty()
    }
}

#[async_trait]
impl TaskQueue for InMemoryQueue {
    async fn send(
        &self,
        queue_id: &str,
        body: &str,
        attributes: &HashMap<String, String>,
    ) -> QueueResult<String> {
        let message_id = Uuid::new_v4().to_string();
        self.messages.lock().await.push(QueuedMessage {
            message_id: message_id.clone(),
            queue_id: queue_id.to_string(),
            body: body.to_string(),
            attributes: attributes.clone(),
        });
        Ok(message_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_and_drain_preserve_order() {
        let queue = InMemoryQueue::new();
        let attrs = HashMap::from([("angle".to_string(), "90".to_string())]);

        let first = queue.send("q", r#"{"n":1}"#, &attrs).await.unwrap();
        let second = queue.send("q", r#"{"n":2}"#, &HashMap::new()).await.unwrap();
        assert_ne!(first, second);

        let drained = queue.drain().await;
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].message_id, first);
        assert_eq!(drained[0].attributes.get("angle").map(String::as_str), Some("90"));
        assert_eq!(drained[1].body, r#"{"n":2}"#);
        assert!(queue.is_empty().await);
    }
}
