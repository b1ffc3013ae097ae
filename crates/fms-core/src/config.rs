//! Service configuration
//!
//! Loaded from TOML. Every section has defaults, so an empty file (or no
//! file) yields the stock fermenter setup:
//!
//! ```toml
//! [detector]
//! window_size = 50
//! z_threshold = 3.0
//! min_samples = 10
//!
//! [delivery]
//! max_retries = 3
//! base_backoff_ms = 1000
//! max_backoff_ms = 300000
//! tick_interval_ms = 1000
//! dead_letter_path = "data/failed_measurements.jsonl"
//!
//! [health]
//! retry_queue_warn_threshold = 100
//!
//! [[tags]]
//! name = "fermenter_temp"
//! unit = "Celsius"
//! threshold = { min = 35.0, max = 45.0 }
//! valid_range = { min = 30.0, max = 50.0 }
//! ```

use crate::error::ConfigError;
use fms_common::{TagRegistry, TagSpec};
use fms_delivery::BackoffPolicy;
use fms_detector::DetectorConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Retry and dead-letter settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Retries before a measurement is dead-lettered
    pub max_retries: u32,
    /// First retry delay
    pub base_backoff_ms: u64,
    /// Cap on any retry delay
    pub max_backoff_ms: u64,
    /// Retry worker period
    pub tick_interval_ms: u64,
    /// Dead-letter log location
    pub dead_letter_path: PathBuf,
}

impl DeliveryConfig {
    /// Backoff policy described by this section
    #[must_use]
    pub fn policy(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            Duration::from_millis(self.base_backoff_ms),
            Duration::from_millis(self.max_backoff_ms),
            self.max_retries,
        )
    }

    /// Retry worker period
    #[inline]
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_backoff_ms: 1_000,
            max_backoff_ms: 300_000,
            tick_interval_ms: 1_000,
            dead_letter_path: PathBuf::from("data/failed_measurements.jsonl"),
        }
    }
}

/// Health reporting settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Queue size at which the service reports itself degraded
    pub retry_queue_warn_threshold: usize,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            retry_queue_warn_threshold: 100,
        }
    }
}

/// Complete service configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Anomaly detector tuning
    pub detector: DetectorConfig,
    /// Retry queue and dead-letter log
    pub delivery: DeliveryConfig,
    /// Health thresholds
    pub health: HealthConfig,
    /// Known sensors
    pub tags: Vec<TagSpec>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            detector: DetectorConfig::default(),
            delivery: DeliveryConfig::default(),
            health: HealthConfig::default(),
            tags: TagRegistry::fermenter_defaults().iter().cloned().collect(),
        }
    }
}

impl ServiceConfig {
    /// Read and validate a TOML file
    ///
    /// # Errors
    /// [`ConfigError::Read`] if the file cannot be read, otherwise as
    /// [`ServiceConfig::from_toml`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&contents)
    }

    /// Parse and validate TOML text
    ///
    /// # Errors
    /// [`ConfigError::Parse`] for syntax or schema errors,
    /// [`ConfigError::Invalid`] when [`ServiceConfig::validate`] fails.
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field consistency
    ///
    /// # Errors
    /// [`ConfigError::Invalid`] naming the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.tags.is_empty() {
            return invalid("at least one tag must be configured".to_string());
        }

        let mut seen = HashSet::new();
        for tag in &self.tags {
            if tag.name.trim().is_empty() {
                return invalid("tag names must not be empty".to_string());
            }
            if !seen.insert(tag.name.as_str()) {
                return invalid(format!("duplicate tag {}", tag.name));
            }
            if !tag.threshold.is_well_formed() {
                return invalid(format!("tag {}: threshold min must not exceed max", tag.name));
            }
            if !tag.valid_range.is_well_formed() {
                return invalid(format!("tag {}: valid_range min must not exceed max", tag.name));
            }
        }

        let d = &self.detector;
        if d.min_samples < 2 {
            return invalid("detector.min_samples must be at least 2".to_string());
        }
        if d.window_size < d.min_samples {
            return invalid(format!(
                "detector.window_size ({}) must be at least min_samples ({})",
                d.window_size, d.min_samples
            ));
        }
        if !(d.z_threshold.is_finite() && d.z_threshold > 0.0) {
            return invalid("detector.z_threshold must be a positive number".to_string());
        }

        let q = &self.delivery;
        if q.tick_interval_ms == 0 {
            return invalid("delivery.tick_interval_ms must be positive".to_string());
        }
        if q.base_backoff_ms > q.max_backoff_ms {
            return invalid("delivery.base_backoff_ms must not exceed max_backoff_ms".to_string());
        }
        if q.dead_letter_path.as_os_str().is_empty() {
            return invalid("delivery.dead_letter_path must not be empty".to_string());
        }

        Ok(())
    }

    /// Tag registry built from `tags`
    #[must_use]
    pub fn registry(&self) -> TagRegistry {
        TagRegistry::new(self.tags.clone())
    }

    /// With a different dead-letter location
    #[must_use]
    pub fn with_dead_letter_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.delivery.dead_letter_path = path.into();
        self
    }

    /// With a different retry budget
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.delivery.max_retries = max_retries;
        self
    }
}
