//! Filesystem-backed object storage
//!
//! Objects live at `<root>/<bucket>/<key>`. Content type and user metadata are
//! kept in a `<key>.meta.json` sidecar next to the object. Writes go to a
//! temporary file first and are renamed into place, so a reader never sees a
//! partially written object.

use super::{ObjectHead, ObjectStorage};
use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

const SIDECAR_SUFFIX: &str = ".meta.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct Sidecar {
    content_type: Option<String>,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

/// Storage rooted at a local directory
#[derive(Debug, Clone)]
pub struct LocalFsStorage {
    root: PathBuf,
}

impl LocalFsStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve an object path, refusing keys that would escape the bucket or
    /// shadow another object's sidecar
    fn object_path(&self, bucket: &str, key: &str) -> StorageResult<PathBuf> {
        let relative = Path::new(key);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        let reserved = key.ends_with(SIDECAR_SUFFIX);
        if bucket.is_empty() || bucket.contains('/') || key.is_empty() || escapes || reserved {
            return Err(StorageError::Backend(format!(
                "invalid object location {bucket}/{key}"
            )));
        }
        Ok(self.root.join(bucket).join(relative))
    }

    fn sidecar_path(path: &Path) -> PathBuf {
        let mut name = path.as_os_str().to_owned();
        name.push(SIDECAR_SUFFIX);
        PathBuf::from(name)
    }

    fn not_found(bucket: &str, key: &str) -> StorageError {
        StorageError::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        }
    }

    async fn read_sidecar(path: &Path) -> StorageResult<Sidecar> {
        match fs::read(Self::sidecar_path(path)).await {
            Ok(raw) => Ok(serde_json::from_slice(&raw)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Sidecar::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Write via a temp file in the same directory, then rename into place
    async fn write_atomic(path: &Path, data: &[u8]) -> StorageResult<()> {
        let tmp = path.with_file_name(format!(".tmp-{}", Uuid::new_v4()));
        fs::write(&tmp, data).await?;
        if let Err(e) = fs::rename(&tmp, path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStorage for LocalFsStorage {
    async fn head(&self, bucket: &str, key: &str) -> StorageResult<ObjectHead> {
        let path = self.object_path(bucket, key)?;
        let meta = match fs::metadata(&path).await {
            Ok(m) if m.is_file() => m,
            Ok(_) => return Err(Self::not_found(bucket, key)),
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(Self::not_found(bucket, key)),
            Err(e) => return Err(e.into()),
        };
        let sidecar = Self::read_sidecar(&path).await?;

        Ok(ObjectHead {
            content_type: sidecar.content_type,
            content_length: meta.len(),
            metadata: sidecar.metadata,
        })
    }

    async fn get(&self, bucket: &str, key: &str) -> StorageResult<Bytes> {
        let path = self.object_path(bucket, key)?;
        match fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(Self::not_found(bucket, key)),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: &str,
        metadata: HashMap<String, String>,
    ) -> StorageResult<()> {
        let path = self.object_path(bucket, key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let sidecar = Sidecar {
            content_type: Some(content_type.to_string()),
            metadata,
        };
        let sidecar_path = Self::sidecar_path(&path);
        let previous = match fs::read(&sidecar_path).await {
            Ok(raw) => Some(raw),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        // Sidecar first: an object without its sidecar would head as untyped
        Self::write_atomic(&sidecar_path, &serde_json::to_vec(&sidecar)?).await?;
        if let Err(e) = Self::write_atomic(&path, &body).await {
            // Keep the sidecar describing the bytes still on disk
            let restored = match previous {
                Some(raw) => Self::write_atomic(&sidecar_path, &raw).await,
                None => fs::remove_file(&sidecar_path).await.map_err(Into::into),
            };
            if let Err(restore_err) = restored {
                warn!(bucket, key, error = %restore_err, "Failed to roll back sidecar");
            }
            return Err(e);
        }

        debug!(bucket, key, size = body.len(), "Object written to local storage");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_round_trip_with_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalFsStorage::new(dir.path());
        let metadata = HashMap::from([("angle".to_string(), "90".to_string())]);

        storage
            .put(
                "uploads",
                "augmented-images/90-degree/a_rotated_90_20240101_000000.jpg",
                Bytes::from_static(b"jpeg-bytes"),
                "image/jpeg",
                metadata,
            )
            .await
            .unwrap();

        let head = storage
            .head("uploads", "augmented-images/90-degree/a_rotated_90_20240101_000000.jpg")
            .await
            .unwrap();
        assert_eq!(head.content_type.as_deref(), Some("image/jpeg"));
        assert_eq!(head.content_length, 10);
        assert_eq!(head.metadata.get("angle").map(String::as_str), Some("90"));

        let body = storage
            .get("uploads", "augmented-images/90-degree/a_rotated_90_20240101_000000.jpg")
            .await
            .unwrap();
        assert_eq!(&body[..], b"jpeg-bytes");
    }

    #[tokio::test]
    async fn test_object_without_sidecar_is_untyped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("uploads")).unwrap();
        std::fs::write(dir.path().join("uploads/raw.bin"), b"1234").unwrap();

        let storage = LocalFsStorage::new(dir.path());
        let head = storage.head("uploads", "raw.bin").await.unwrap();
        assert_eq!(head.content_type, None);
        assert_eq!(head.content_length, 4);
    }

    #[tokio::test]
    async fn test_missing_and_escaping_keys() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalFsStorage::new(dir.path());

        assert!(matches!(
            storage.get("uploads", "missing.jpg").await,
            Err(StorageError::NotFound { .. })
        ));
        assert!(matches!(
            storage.head("uploads", "missing.jpg").await,
            Err(StorageError::NotFound { .. })
        ));
        assert!(matches!(
            storage.get("uploads", "../outside.jpg").await,
            Err(StorageError::Backend(_))
        ));
        assert!(matches!(
            storage.get("uploads", "/etc/passwd").await,
            Err(StorageError::Backend(_))
        ));
    }

    #[tokio::test]
    async fn test_put_overwrites_whole_object() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalFsStorage::new(dir.path());

        for body in [&b"first version"[..], &b"v2"[..]] {
            storage
                .put(
                    "b",
                    "processed/a_256x256.jpg",
                    Bytes::copy_from_slice(body),
                    "image/jpeg",
                    HashMap::new(),
                )
                .await
                .unwrap();
        }
        let body = storage.get("b", "processed/a_256x256.jpg").await.unwrap();
        assert_eq!(&body[..], b"v2");
    }

    #[tokio::test]
    async fn test_sidecar_named_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalFsStorage::new(dir.path());

        let result = storage
            .put(
                "b",
                "a.png.meta.json",
                Bytes::from_static(b"{}"),
                "application/json",
                HashMap::new(),
            )
            .await;
        assert!(matches!(result, Err(StorageError::Backend(_))));
        assert!(matches!(
            storage.get("b", "a.png.meta.json").await,
            Err(StorageError::Backend(_))
        ));
        assert!(!dir.path().join("b/a.png.meta.json").exists());
    }

    #[tokio::test]
    async fn test_failed_body_write_keeps_previous_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalFsStorage::new(dir.path());

        // A directory in the object's place makes the body rename fail
        std::fs::create_dir_all(dir.path().join("b/obj.png")).unwrap();
        let sidecar = dir.path().join("b/obj.png.meta.json");
        let original = br#"{"content_type":"image/png","metadata":{}}"#;
        std::fs::write(&sidecar, original).unwrap();

        let result = storage
            .put(
                "b",
                "obj.png",
                Bytes::from_static(b"jpeg-bytes"),
                "image/jpeg",
                HashMap::new(),
            )
            .await;
        assert!(result.is_err());
        assert_eq!(std::fs::read(&sidecar).unwrap(), original.to_vec());
    }

    #[tokio::test]
    async fn test_failed_body_write_leaves_no_new_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalFsStorage::new(dir.path());
        std::fs::create_dir_all(dir.path().join("b/obj.png")).unwrap();

        let result = storage
            .put(
                "b",
                "obj.png",
                Bytes::from_static(b"jpeg-bytes"),
                "image/jpeg",
                HashMap::new(),
            )
            .await;
        assert!(result.is_err());
        assert!(!dir.path().join("b/obj.png.meta.json").exists());
    }
}
