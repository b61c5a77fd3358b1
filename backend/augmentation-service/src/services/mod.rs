//! Pipeline stages
//!
//! - `ingestion`: object-created event -> normalized image + fan-out tasks
//! - `transform`: fan-out task -> rotated variant
//! - `processor`: pixel work shared by both stages
//! - `keys`: key derivation and the namespace guard

pub mod ingestion;
pub mod keys;
pub mod processor;
pub mod transform;

pub use ingestion::{IngestionOutcome, IngestionService, SkipReason};
pub use keys::{NamespaceGuard, OutputKeyStrategy};
pub use processor::{ImageProcessor, OutputFormat, ProcessedImage, ProcessorConfig};
pub use transform::TransformService;
