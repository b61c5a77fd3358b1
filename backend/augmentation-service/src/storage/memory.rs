//! In-process object storage, used by tests and local dry runs

use super::{ObjectHead, ObjectStorage};
use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

/// A stored object with its attributes
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub body: Bytes,
    pub content_type: Option<String>,
    pub metadata: HashMap<String, String>,
}

/// Storage backed by a map keyed on `(bucket, key)`
#[derive(Default)]
pub struct InMemoryStorage {
    objects: RwLock<BTreeMap<(String, String), StoredObject>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object as an external uploader would
    pub async fn insert(
        &self,
        bucket: &str,
        key: &str,
        body: impl Into<Bytes>,
        content_type: Option<&str>,
    ) {
        self.objects.write().await.insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                body: body.into(),
                content_type: content_type.map(str::to_string),
                metadata: HashMap::new(),
            },
        );
    }

    pub async fn object(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        self.objects
            .read()
            .await
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    /// Keys in `bucket` starting with `prefix`, in lexical order
    pub async fn keys_with_prefix(&self, bucket: &str, prefix: &str) -> Vec<String> {
        self.objects
            .read()
            .await
            .keys()
            .filter(|(b, k)| b == bucket && k.starts_with(prefix))
            .map(|(_, k)| k.clone())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

#[async_trait]
impl ObjectStorage for InMemoryStorage {
    async fn head(&self, bucket: &str, key: &str) -> StorageResult<ObjectHead> {
        let object = self.object(bucket, key).await.ok_or_else(|| StorageError::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })?;

        Ok(ObjectHead {
            content_type: object.content_type,
            content_length: object.body.len() as u64,
            metadata: object.metadata,
        })
    }

    async fn get(&self, bucket: &str, key: &str) -> StorageResult<Bytes> {
        self.object(bucket, key)
            .await
            .map(|o| o.body)
            .ok_or_else(|| StorageError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: &str,
        metadata: HashMap<String, String>,
    ) -> StorageResult<()> {
        self.objects.write().await.insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                body,
                content_type: Some(content_type.to_string()),
                metadata,
            },
        );
        Ok(())
    }
}
