//! Error types for FMS Core
//!
//! - [`ValidationError`]: input rejected at the boundary, reported to the caller
//! - [`ConfigError`]: configuration file unreadable or inconsistent
//! - [`ServiceError`]: startup and shutdown failures of the orchestrator
//!
//! Persistence failures are not errors at this level: a failed write becomes
//! a queued retry and, at worst, a dead-letter record.

use crate::state::IngestState;
use fms_common::TimestampError;
use fms_delivery::DeadLetterError;
use std::path::PathBuf;

/// Why a raw measurement was rejected
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    /// Tag is not in the registry
    #[error("unknown tag: {tag}")]
    UnknownTag {
        /// Offending tag
        tag: String,
    },

    /// NaN or infinite value
    #[error("value for {tag} is not a finite number")]
    NonFiniteValue {
        /// Tag of the reading
        tag: String,
    },

    /// Value outside the sane range for the tag
    #[error("value {value} for {tag} outside accepted range [{min}, {max}]")]
    OutOfRange {
        /// Tag of the reading
        tag: String,
        /// Rejected value
        value: f64,
        /// Lowest accepted value
        min: f64,
        /// Highest accepted value
        max: f64,
    },

    /// Timestamp could not be parsed
    #[error(transparent)]
    InvalidTimestamp(#[from] TimestampError),
}

/// Configuration problems
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("cannot read config {}: {source}", .path.display())]
    Read {
        /// Config file
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// File is not valid TOML for the schema
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Values are individually valid but inconsistent
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// A state change the ingestion machine does not allow
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal ingest transition {from:?} -> {to:?}")]
pub struct TransitionError {
    /// State the flow was in
    pub from: IngestState,
    /// Requested state
    pub to: IngestState,
}

/// Orchestrator lifecycle failures
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Configuration rejected
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Dead-letter log could not be opened, read or rewritten
    #[error("dead-letter log error: {0}")]
    DeadLetter(#[from] DeadLetterError),

    /// Retry worker panicked
    #[error("retry worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

impl ServiceError {
    /// Check if the failure came from the durable log
    #[inline]
    #[must_use]
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::DeadLetter(_))
    }
}
