//! Pipeline data model
//!
//! `FanOutTask` is the stable contract between the ingestion and transform
//! stages; its JSON field names (`image_key`, `angle`) are the queue wire format.

pub mod events;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

pub use events::{
    IngestionSummary, InvocationResponse, QueueEvent, QueueRecord, S3Event, StorageEventRecord,
    TransformSummary,
};

/// Rotation variant applied by the transform stage.
///
/// Angles are clockwise. The identity variant travels on the wire as `360`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub enum RotationAngle {
    Deg90,
    Deg180,
    Deg270,
    Original,
}

impl RotationAngle {
    /// Default variant set, one task per entry
    pub const ALL: [RotationAngle; 4] = [
        RotationAngle::Deg90,
        RotationAngle::Deg180,
        RotationAngle::Deg270,
        RotationAngle::Original,
    ];

    pub fn degrees(self) -> u16 {
        match self {
            RotationAngle::Deg90 => 90,
            RotationAngle::Deg180 => 180,
            RotationAngle::Deg270 => 270,
            RotationAngle::Original => 360,
        }
    }

    pub fn is_identity(self) -> bool {
        self == RotationAngle::Original
    }

    /// Rotation that undoes this one
    pub fn inverse(self) -> RotationAngle {
        match self {
            RotationAngle::Deg90 => RotationAngle::Deg270,
            RotationAngle::Deg180 => RotationAngle::Deg180,
            RotationAngle::Deg270 => RotationAngle::Deg90,
            RotationAngle::Original => RotationAngle::Original,
        }
    }

    /// Filename descriptor used in derived artifact keys
    pub fn descriptor(self) -> String {
        match self {
            RotationAngle::Original => "original".to_string(),
            other => format!("rotated_{}", other.degrees()),
        }
    }
}

impl TryFrom<u16> for RotationAngle {
    type Error = String;

    fn try_from(value: u16) -> std::result::Result<Self, Self::Error> {
        match value {
            90 => Ok(RotationAngle::Deg90),
            180 => Ok(RotationAngle::Deg180),
            270 => Ok(RotationAngle::Deg270),
            360 => Ok(RotationAngle::Original),
            other => Err(format!(
                "unsupported rotation angle {other}, expected one of 90, 180, 270, 360"
            )),
        }
    }
}

impl From<RotationAngle> for u16 {
    fn from(angle: RotationAngle) -> Self {
        angle.degrees()
    }
}

impl fmt::Display for RotationAngle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.degrees())
    }
}

/// Per-invocation context threaded through every call that logs or tags output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub request_id: String,
}

impl RequestContext {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
        }
    }

    /// Context for an invocation whose trigger carried no request id
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4().to_string())
    }
}

/// One unit of fan-out work: a single variant of a single normalized image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FanOutTask {
    pub task_id: Uuid,
    pub bucket: String,
    #[serde(rename = "image_key")]
    pub source_key: String,
    #[serde(rename = "angle")]
    pub variant: RotationAngle,
    pub request_id: String,
}

impl FanOutTask {
    pub fn new(
        bucket: &str,
        source_key: &str,
        variant: RotationAngle,
        ctx: &RequestContext,
    ) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            bucket: bucket.to_string(),
            source_key: source_key.to_string(),
            variant,
            request_id: ctx.request_id.clone(),
        }
    }

    /// Queue-native attributes duplicated from the payload for routing
    pub fn attributes(&self) -> HashMap<String, String> {
        HashMap::from([
            ("angle".to_string(), self.variant.to_string()),
            ("bucket".to_string(), self.bucket.clone()),
        ])
    }
}

/// Canonical fixed-size derivative written by the ingestion stage
#[derive(Debug, Clone)]
pub struct NormalizedArtifact {
    pub bucket: String,
    pub key: String,
    pub width: u32,
    pub height: u32,
    pub content_type: String,
    pub metadata: HashMap<String, String>,
}

/// Final output of one fan-out task
#[derive(Debug, Clone)]
pub struct DerivedArtifact {
    pub bucket: String,
    pub key: String,
    pub width: u32,
    pub height: u32,
    pub content_type: String,
    pub metadata: HashMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_wire_format() {
        let ctx = RequestContext::new("req-1");
        let task = FanOutTask::new(
            "uploads",
            "processed/photo_256x256.jpg",
            RotationAngle::Original,
            &ctx,
        );

        let value = serde_json::to_value(&task).unwrap();
        assert_eq!(value["bucket"], "uploads");
        assert_eq!(value["image_key"], "processed/photo_256x256.jpg");
        assert_eq!(value["angle"], 360);
        assert_eq!(value["request_id"], "req-1");
        assert_eq!(value["task_id"], task.task_id.to_string());
    }

    #[test]
    fn test_task_rejects_unknown_angle() {
        let body = r#"{"task_id":"6f1c1c3e-0a4e-4d8e-9c39-0f5b8c1f2a11","bucket":"b",
            "image_key":"processed/a.jpg","angle":45,"request_id":"r"}"#;
        let err = serde_json::from_str::<FanOutTask>(body).unwrap_err();
        assert!(err.to_string().contains("unsupported rotation angle 45"));
    }

    #[test]
    fn test_task_rejects_missing_field() {
        let body = serde_json::json!({
            "task_id": "6f1c1c3e-0a4e-4d8e-9c39-0f5b8c1f2a11",
            "bucket": "b",
            "angle": 90,
            "request_id": "r",
        })
        .to_string();
        assert!(serde_json::from_str::<FanOutTask>(&body).is_err());
    }

    #[test]
    fn test_attributes_duplicate_payload_fields() {
        let ctx = RequestContext::generate();
        let task = FanOutTask::new("b", "processed/x.jpg", RotationAngle::Deg270, &ctx);
        let attrs = task.attributes();
        assert_eq!(attrs.get("angle").map(String::as_str), Some("270"));
        assert_eq!(attrs.get("bucket").map(String::as_str), Some("b"));
    }

    #[test]
    fn test_inverse_and_descriptor() {
        for angle in RotationAngle::ALL {
            assert_eq!(angle.inverse().inverse(), angle);
        }
        assert_eq!(RotationAngle::Original.descriptor(), "original");
        assert_eq!(RotationAngle::Deg90.descriptor(), "rotated_90");
    }
}
