/// Configuration management for augmentation-service
///
/// Loads pipeline settings from environment variables with sensible defaults.
/// Values that are present but unparseable are configuration errors rather than
/// silently falling back, since they would otherwise change output keys.
use crate::error::{AppError, Result};
use crate::models::RotationAngle;
use crate::services::keys::{NamespaceGuard, OutputKeyStrategy};
use crate::services::processor::ProcessorConfig;
use image::Rgb;
use std::collections::HashSet;
use std::str::FromStr;

/// Default maximum accepted source size (10 MB)
pub const DEFAULT_MAX_IMAGE_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Queue endpoint fan-out tasks are sent to; ingestion cannot run without it
    pub queue_url: Option<String>,
    pub max_image_bytes: u64,
    pub target_width: u32,
    pub target_height: u32,
    pub background: [u8; 3],
    pub jpeg_quality: u8,
    pub processed_prefix: String,
    pub augmented_prefix: String,
    /// Additional namespaces the ingestion stage must never treat as input
    pub extra_skip_prefixes: Vec<String>,
    pub angles: Vec<RotationAngle>,
    pub output_key_strategy: OutputKeyStrategy,
    pub worker_concurrency: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_url: None,
            max_image_bytes: DEFAULT_MAX_IMAGE_BYTES,
            target_width: 256,
            target_height: 256,
            background: [255, 255, 255],
            jpeg_quality: 90,
            processed_prefix: "processed/".to_string(),
            augmented_prefix: "augmented-images/".to_string(),
            extra_skip_prefixes: Vec::new(),
            angles: RotationAngle::ALL.to_vec(),
            output_key_strategy: OutputKeyStrategy::Timestamped,
            worker_concurrency: 4,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let config = Self {
            queue_url: lookup("SQS_QUEUE_URL").filter(|v| !v.trim().is_empty()),
            max_image_bytes: parse_var(&lookup, "MAX_IMAGE_BYTES", defaults.max_image_bytes)?,
            target_width: parse_var(&lookup, "TARGET_WIDTH", defaults.target_width)?,
            target_height: parse_var(&lookup, "TARGET_HEIGHT", defaults.target_height)?,
            background: match lookup("BACKGROUND_COLOR") {
                Some(raw) => parse_color(&raw)?,
                None => defaults.background,
            },
            jpeg_quality: parse_var(&lookup, "JPEG_QUALITY", defaults.jpeg_quality)?,
            processed_prefix: lookup("PROCESSED_PREFIX")
                .map(|p| normalize_prefix(&p))
                .unwrap_or(defaults.processed_prefix),
            augmented_prefix: lookup("AUGMENTED_PREFIX")
                .map(|p| normalize_prefix(&p))
                .unwrap_or(defaults.augmented_prefix),
            extra_skip_prefixes: lookup("EXTRA_SKIP_PREFIXES")
                .map(|raw| {
                    raw.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(normalize_prefix)
                        .collect()
                })
                .unwrap_or_default(),
            angles: match lookup("ROTATION_ANGLES") {
                Some(raw) => parse_angles(&raw)?,
                None => defaults.angles,
            },
            output_key_strategy: match lookup("OUTPUT_KEY_STRATEGY") {
                Some(raw) => raw.parse()?,
                None => defaults.output_key_strategy,
            },
            worker_concurrency: parse_var(
                &lookup,
                "WORKER_CONCURRENCY",
                defaults.worker_concurrency,
            )?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would break output dimensions or loop prevention
    pub fn validate(&self) -> Result<()> {
        if self.target_width == 0 || self.target_height == 0 {
            return Err(AppError::Config(format!(
                "target dimensions must be non-zero, got {}x{}",
                self.target_width, self.target_height
            )));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(AppError::Config(format!(
                "JPEG quality must be within 1..=100, got {}",
                self.jpeg_quality
            )));
        }
        if self.max_image_bytes == 0 {
            return Err(AppError::Config("maximum image size must be non-zero".into()));
        }
        if self.worker_concurrency == 0 {
            return Err(AppError::Config("worker concurrency must be at least 1".into()));
        }
        if self.processed_prefix.is_empty() || self.augmented_prefix.is_empty() {
            return Err(AppError::Config(
                "output prefixes must be non-empty; an empty prefix would guard every key".into(),
            ));
        }
        if self.processed_prefix.starts_with(&self.augmented_prefix)
            || self.augmented_prefix.starts_with(&self.processed_prefix)
        {
            return Err(AppError::Config(format!(
                "processed prefix '{}' and augmented prefix '{}' must be disjoint",
                self.processed_prefix, self.augmented_prefix
            )));
        }
        if self.angles.is_empty() {
            return Err(AppError::Config("rotation angle set must not be empty".into()));
        }
        let unique: HashSet<_> = self.angles.iter().collect();
        if unique.len() != self.angles.len() {
            return Err(AppError::Config("rotation angle set contains duplicates".into()));
        }
        Ok(())
    }

    /// Guard covering every namespace either stage writes to
    pub fn namespace_guard(&self) -> NamespaceGuard {
        NamespaceGuard::new(
            [self.processed_prefix.clone(), self.augmented_prefix.clone()]
                .into_iter()
                .chain(self.extra_skip_prefixes.iter().cloned()),
        )
    }

    pub fn processor_config(&self) -> ProcessorConfig {
        ProcessorConfig {
            target_width: self.target_width,
            target_height: self.target_height,
            background: Rgb(self.background),
            jpeg_quality: self.jpeg_quality,
        }
    }

    /// Queue endpoint, or a batch-fatal error when unset
    pub fn require_queue_url(&self) -> Result<&str> {
        self.queue_url
            .as_deref()
            .ok_or_else(|| AppError::Config("SQS_QUEUE_URL not set".to_string()))
    }
}

fn parse_var<T, F>(lookup: &F, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| AppError::Config(format!("{name}='{raw}' is invalid: {e}"))),
        None => Ok(default),
    }
}

fn normalize_prefix(raw: &str) -> String {
    let trimmed = raw.trim().trim_start_matches('/');
    if trimmed.is_empty() || trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{trimmed}/")
    }
}

fn parse_color(raw: &str) -> Result<[u8; 3]> {
    let channels: Vec<u8> = raw
        .split(',')
        .map(|c| c.trim().parse::<u8>())
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| AppError::Config(format!("BACKGROUND_COLOR='{raw}' is invalid: {e}")))?;

    match channels.as_slice() {
        [r, g, b] => Ok([*r, *g, *b]),
        _ => Err(AppError::Config(format!(
            "BACKGROUND_COLOR='{raw}' must have exactly three channels"
        ))),
    }
}

fn parse_angles(raw: &str) -> Result<Vec<RotationAngle>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            let degrees: u16 = s
                .parse()
                .map_err(|e| AppError::Config(format!("ROTATION_ANGLES entry '{s}': {e}")))?;
            RotationAngle::try_from(degrees).map_err(AppError::Config)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<PipelineConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        PipelineConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.queue_url, None);
        assert_eq!(config.max_image_bytes, 10_485_760);
        assert_eq!((config.target_width, config.target_height), (256, 256));
        assert_eq!(config.background, [255, 255, 255]);
        assert_eq!(config.angles, RotationAngle::ALL.to_vec());
        assert_eq!(config.output_key_strategy, OutputKeyStrategy::Timestamped);
        assert!(config.require_queue_url().unwrap_err().is_batch_fatal());
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("SQS_QUEUE_URL", "local://rotation-tasks"),
            ("MAX_IMAGE_BYTES", "2048"),
            ("TARGET_WIDTH", "128"),
            ("BACKGROUND_COLOR", "0, 0, 0"),
            ("PROCESSED_PREFIX", "/normalized"),
            ("EXTRA_SKIP_PREFIXES", "thumbnails, tmp/"),
            ("ROTATION_ANGLES", "180,360"),
            ("OUTPUT_KEY_STRATEGY", "task_id"),
        ])
        .unwrap();

        assert_eq!(config.require_queue_url().unwrap(), "local://rotation-tasks");
        assert_eq!(config.max_image_bytes, 2048);
        assert_eq!(config.target_width, 128);
        assert_eq!(config.background, [0, 0, 0]);
        assert_eq!(config.processed_prefix, "normalized/");
        assert_eq!(config.extra_skip_prefixes, vec!["thumbnails/", "tmp/"]);
        assert_eq!(config.angles, vec![RotationAngle::Deg180, RotationAngle::Original]);
        assert_eq!(config.output_key_strategy, OutputKeyStrategy::TaskId);

        let guard = config.namespace_guard();
        assert!(guard.is_output_key("normalized/a_128x256.jpg"));
        assert!(guard.is_output_key("thumbnails/a.jpg"));
        assert!(guard.is_output_key("augmented-images/90-degree/a.jpg"));
    }

    #[test]
    fn test_invalid_values_are_config_errors() {
        for vars in [
            vec![("MAX_IMAGE_BYTES", "ten")],
            vec![("TARGET_HEIGHT", "0")],
            vec![("JPEG_QUALITY", "0")],
            vec![("BACKGROUND_COLOR", "255,255")],
            vec![("ROTATION_ANGLES", "45")],
            vec![("ROTATION_ANGLES", "90,90")],
            vec![("ROTATION_ANGLES", "")],
            vec![("PROCESSED_PREFIX", "/")],
            vec![("PROCESSED_PREFIX", "out/"), ("AUGMENTED_PREFIX", "out/")],
            vec![("WORKER_CONCURRENCY", "0")],
        ] {
            let err = load(&vars).unwrap_err();
            assert!(matches!(err, AppError::Config(_)), "{vars:?} -> {err}");
        }
    }
}
