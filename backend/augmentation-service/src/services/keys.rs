//! Object key derivation and the namespace guard
//!
//! Every key either stage writes starts with one of the output prefixes, and
//! the ingestion stage skips any key that starts with one. Keep the two in sync
//! through `NamespaceGuard` rather than by comparing strings ad hoc.

use crate::error::{AppError, Result};
use crate::models::RotationAngle;
use chrono::{DateTime, Utc};
use std::str::FromStr;
use uuid::Uuid;

/// How derived artifact keys are made unique
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputKeyStrategy {
    /// Append the creation timestamp; redelivery writes a new object
    #[default]
    Timestamped,
    /// Use the task id; redelivery overwrites the previous object
    TaskId,
}

impl FromStr for OutputKeyStrategy {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "timestamped" | "timestamp" => Ok(OutputKeyStrategy::Timestamped),
            "task_id" | "task-id" => Ok(OutputKeyStrategy::TaskId),
            other => Err(AppError::Config(format!(
                "unknown output key strategy '{other}', expected 'timestamped' or 'task_id'"
            ))),
        }
    }
}

/// Loop-prevention check over the output namespaces
#[derive(Debug, Clone)]
pub struct NamespaceGuard {
    prefixes: Vec<String>,
}

impl NamespaceGuard {
    pub fn new<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let prefixes = prefixes
            .into_iter()
            .map(Into::into)
            .filter(|p: &String| !p.is_empty())
            .collect();
        Self { prefixes }
    }

    /// True when `key` lives in a namespace written by the pipeline itself
    pub fn is_output_key(&self, key: &str) -> bool {
        self.prefixes.iter().any(|p| key.starts_with(p.as_str()))
    }

    pub fn prefixes(&self) -> &[String] {
        &self.prefixes
    }
}

/// Decode an object key as delivered in a storage notification.
///
/// Notifications encode spaces as `+` and everything else with percent escapes.
pub fn decode_event_key(raw: &str) -> Result<String> {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|decoded| decoded.into_owned())
        .map_err(|e| AppError::InvalidEvent(format!("key '{raw}' is not valid UTF-8: {e}")))
}

fn file_name(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

/// Filename without directories or the final extension
pub fn file_stem(key: &str) -> &str {
    let name = file_name(key);
    match name.rfind('.') {
        Some(i) if i > 0 => &name[..i],
        _ => name,
    }
}

/// Final extension of the filename, without the dot
pub fn extension(key: &str) -> Option<&str> {
    let name = file_name(key);
    match name.rfind('.') {
        Some(i) if i > 0 && i + 1 < name.len() => Some(&name[i + 1..]),
        _ => None,
    }
}

/// Key of the normalized artifact for `source_key`
pub fn normalized_key(prefix: &str, source_key: &str, width: u32, height: u32) -> String {
    format!("{prefix}{}_{width}x{height}.jpg", file_stem(source_key))
}

/// Key of the derived artifact for one task.
///
/// `augmented-images/<angle>-degree/<stem>_<descriptor>_<suffix>.<ext>` where the
/// suffix is the creation timestamp or the task id depending on `strategy`.
pub fn derived_key(
    prefix: &str,
    angle: RotationAngle,
    source_key: &str,
    ext: &str,
    strategy: OutputKeyStrategy,
    task_id: Uuid,
    created_at: DateTime<Utc>,
) -> String {
    let suffix = match strategy {
        OutputKeyStrategy::Timestamped => format_timestamp(created_at),
        OutputKeyStrategy::TaskId => task_id.to_string(),
    };
    format!(
        "{prefix}{}-degree/{}_{}_{suffix}.{ext}",
        angle.degrees(),
        file_stem(source_key),
        angle.descriptor(),
    )
}

/// Compact UTC timestamp used in keys and `created_at` metadata
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y%m%d_%H%M%S").to_string()
}
