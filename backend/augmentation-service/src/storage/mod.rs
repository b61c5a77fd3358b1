//! Object storage collaborator
//!
//! The pipeline needs exactly three operations: `head`, `get` and whole-object
//! `put`. No versioning, ACLs or multipart semantics are assumed.

pub mod local;
pub mod memory;

use crate::error::StorageResult;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;

pub use local::LocalFsStorage;
pub use memory::InMemoryStorage;

/// Object metadata returned by `head`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectHead {
    /// `None` when the object was stored without a content type
    pub content_type: Option<String>,
    pub content_length: u64,
    pub metadata: HashMap<String, String>,
}

/// Storage trait for reading sources and writing artifacts.
///
/// Implementations must make `put` atomic at the object level: readers see
/// either the previous object or the complete new one.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Fetch content type and size without downloading the body
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the object does not exist.
    async fn head(&self, bucket: &str, key: &str) -> StorageResult<ObjectHead>;

    /// Download the object body
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the object does not exist.
    async fn get(&self, bucket: &str, key: &str) -> StorageResult<Bytes>;

    /// Write a whole object, replacing any existing one at the same key
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: &str,
        metadata: HashMap<String, String>,
    ) -> StorageResult<()>;
}
