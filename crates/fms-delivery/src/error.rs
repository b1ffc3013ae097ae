//! Error types for FMS Delivery

use std::path::PathBuf;

/// Dead-letter log failures
#[derive(Debug, thiserror::Error)]
pub enum DeadLetterError {
    /// Filesystem operation failed
    #[error("dead-letter I/O on {}: {source}", .path.display())]
    Io {
        /// File the operation targeted
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Record could not be encoded
    #[error("dead-letter encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

impl DeadLetterError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| Self::Io { path, source }
    }
}

/// One dead-letter line that could not be read back
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordParseError {
    /// Final line has no terminating newline and does not parse
    #[error("line {line}: truncated record")]
    Truncated {
        /// 1-based line number
        line: usize,
    },

    /// Line is not valid UTF-8
    #[error("line {line}: not valid UTF-8")]
    InvalidUtf8 {
        /// 1-based line number
        line: usize,
    },

    /// Line is complete but not a valid record
    #[error("line {line}: malformed record: {reason}")]
    Malformed {
        /// 1-based line number
        line: usize,
        /// Parser message
        reason: String,
    },
}

impl RecordParseError {
    /// Line the error refers to
    #[inline]
    #[must_use]
    pub fn line(&self) -> usize {
        match self {
            Self::Truncated { line }
            | Self::InvalidUtf8 { line }
            | Self::Malformed { line, .. } => *line,
        }
    }
}
