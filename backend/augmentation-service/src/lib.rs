//! Augmentation Service
//!
//! Two-stage image augmentation pipeline: an uploaded image is normalized onto a
//! fixed canvas and fanned out into rotation tasks, which workers render back
//! into storage under a namespace the ingestion stage never consumes.

pub mod config;
pub mod error;
pub mod metrics;
pub mod models;
pub mod queue;
pub mod services;
pub mod storage;
pub mod telemetry;

// Public re-exports
pub use config::PipelineConfig;
pub use error::{AppError, Result};
pub use models::{FanOutTask, RequestContext, RotationAngle};
pub use services::{IngestionService, TransformService};
