//! Spool-directory queue: one JSON file per message
//!
//! Lets the two binaries run as separate processes on one machine. Message files
//! are named by send time so `drain` returns them in send order.

use super::{QueuedMessage, TaskQueue};
use crate::error::{QueueError, QueueResult};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tracing::warn;
use uuid::Uuid;

#[derive(Debug)]
pub struct SpoolDirQueue {
    dir: PathBuf,
    sequence: AtomicU64,
}

impl SpoolDirQueue {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            sequence: AtomicU64::new(0),
        }
    }

    /// Remove and return up to `limit` messages, oldest first.
    ///
    /// Each file is claimed with a rename before it is read, so concurrent
    /// consumers never receive the same message. A file that is not a valid
    /// message envelope is still returned, with its raw contents as the body,
    /// so the consumer records it as malformed.
    pub async fn drain(&self, limit: usize) -> QueueResult<Vec<QueuedMessage>> {
        let mut names = Vec::new();
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with('.') && name.ends_with(".json") {
                names.push(name);
            }
        }
        names.sort();

        let mut messages = Vec::new();
        for name in names.into_iter().take(limit) {
            match self.claim(&name).await {
                Ok(Some(message)) => messages.push(message),
                // Another consumer took it first
                Ok(None) => continue,
                Err(e) if messages.is_empty() => return Err(e),
                Err(e) => {
                    // Claimed messages are already off disk; hand them over
                    warn!(
                        file = %name,
                        error = %e,
                        taken = messages.len(),
                        "Spool drain stopped early"
                    );
                    break;
                }
            }
        }
        Ok(messages)
    }

    /// Move one spooled file out of the listing, then read and delete it.
    /// Returns `None` when another consumer claimed it first.
    async fn claim(&self, name: &str) -> QueueResult<Option<QueuedMessage>> {
        let path = self.dir.join(name);
        let claimed = self.dir.join(format!(".claimed-{name}"));
        match fs::rename(&path, &claimed).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let raw = match fs::read_to_string(&claimed).await {
            Ok(raw) => raw,
            Err(e) => {
                // Put it back for the next drain
                let _ = fs::rename(&claimed, &path).await;
                return Err(e.into());
            }
        };
        if let Err(e) = fs::remove_file(&claimed).await {
            warn!(file = %name, error = %e, "Failed to remove claimed spool file");
        }

        let message = serde_json::from_str::<QueuedMessage>(&raw).unwrap_or_else(|e| {
            warn!(file = %name, error = %e, "Spooled message is not a valid envelope");
            QueuedMessage {
                message_id: name.trim_end_matches(".json").to_string(),
                queue_id: String::new(),
                body: raw,
                attributes: HashMap::new(),
            }
        });
        Ok(Some(message))
    }
}

#[async_trait]
impl TaskQueue for SpoolDirQueue {
    async fn send(
        &self,
        queue_id: &str,
        body: &str,
        attributes: &HashMap<String, String>,
    ) -> QueueResult<String> {
        fs::create_dir_all(&self.dir).await.map_err(|e| {
            QueueError::Misconfigured(format!(
                "spool directory {} is unusable: {e}",
                self.dir.display()
            ))
        })?;

        let message_id = Uuid::new_v4().to_string();
        let message = QueuedMessage {
            message_id: message_id.clone(),
            queue_id: queue_id.to_string(),
            body: body.to_string(),
            attributes: attributes.clone(),
        };

        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        let name = format!(
            "{}-{seq:06}-{message_id}.json",
            Utc::now().format("%Y%m%dT%H%M%S%.9f")
        );
        let tmp = self.dir.join(format!(".{name}"));
        fs::write(&tmp, serde_json::to_vec(&message)?).await?;
        fs::rename(&tmp, self.dir.join(&name))
            .await
            .map_err(|e| QueueError::SendFailed(format!("failed to publish {name}: {e}")))?;

        Ok(message_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_send_then_drain_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let queue = SpoolDirQueue::new(dir.path().join("spool"));

        let mut sent = Vec::new();
        for n in 0..3 {
            let id = queue
                .send("local://tasks", &format!(r#"{{"n":{n}}}"#), &HashMap::new())
                .await
                .unwrap();
            sent.push(id);
        }

        let first = queue.drain(2).await.unwrap();
        assert_eq!(first.iter().map(|m| m.message_id.clone()).collect::<Vec<_>>(), sent[..2]);
        assert_eq!(first[0].queue_id, "local://tasks");

        let rest = queue.drain(10).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].body, r#"{"n":2}"#);
        assert!(queue.drain(10).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_drains_deliver_each_message_once() {
        let dir = tempfile::tempdir().unwrap();
        let queue = Arc::new(SpoolDirQueue::new(dir.path().join("spool")));

        let mut sent = HashSet::new();
        for n in 0..200 {
            let id = queue
                .send("local://tasks", &format!(r#"{{"n":{n}}}"#), &HashMap::new())
                .await
                .unwrap();
            sent.insert(id);
        }

        let consumers: Vec<_> = (0..2)
            .map(|_| {
                let queue = queue.clone();
                tokio::spawn(async move { queue.drain(200).await })
            })
            .collect();

        let mut delivered = Vec::new();
        for consumer in consumers {
            delivered.extend(consumer.await.unwrap().unwrap());
        }
        delivered.extend(queue.drain(1000).await.unwrap());

        let ids: HashSet<String> = delivered.iter().map(|m| m.message_id.clone()).collect();
        assert_eq!(delivered.len(), 200, "no message may be lost or duplicated");
        assert_eq!(ids, sent);
    }

    #[tokio::test]
    async fn test_drain_missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let queue = SpoolDirQueue::new(dir.path().join("never-created"));
        assert!(queue.drain(5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_file_surfaces_raw_body() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("0001-garbage.json"), "not json").unwrap();

        let queue = SpoolDirQueue::new(dir.path());
        let drained = queue.drain(5).await.unwrap();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].body, "not json");
    }

    #[tokio::test]
    async fn test_unusable_dir_is_misconfigured() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();

        let queue = SpoolDirQueue::new(blocker.join("spool"));
        let err = queue.send("q", "{}", &HashMap::new()).await.unwrap_err();
        assert!(matches!(err, QueueError::Misconfigured(_)));
    }
}
