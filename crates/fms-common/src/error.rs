//! Error types shared across the workspace

/// Failure reported by a persistence backend for a single write or probe.
///
/// Any `SinkError` seen by the ingestion path is treated as a transient
/// failure of that one attempt; the measurement is handed to the retry
/// queue rather than surfaced to the caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    /// Backend could not be reached (connection refused, pool closed, ...)
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// Backend answered but did not commit the write
    #[error("write rejected: {0}")]
    Rejected(String),

    /// Attempt exceeded its time budget
    #[error("write timed out after {0}ms")]
    Timeout(u64),
}

impl SinkError {
    /// Check if another attempt could plausibly succeed
    #[inline]
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout(_))
    }
}

/// Timestamp string could not be interpreted as ISO-8601
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid timestamp {input:?}: expected ISO-8601 (e.g. 2024-01-01T12:00:00Z)")]
pub struct TimestampError {
    /// The rejected input
    pub input: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sink_error_display() {
        let err = SinkError::Unavailable("connection refused".to_string());
        assert!(err.to_string().contains("backend unavailable"));
    }

    #[test]
    fn sink_error_is_transient() {
        assert!(SinkError::Unavailable("x".to_string()).is_transient());
        assert!(SinkError::Timeout(500).is_transient());
        assert!(!SinkError::Rejected("constraint".to_string()).is_transient());
    }
}
