//! Dead-letter record schema and line codec
//!
//! One JSON object per `\n`-terminated line. Reading never fails as a
//! whole: each bad line is reported in [`LogScan::corrupt`] and the
//! remaining lines are still returned.
//!
//! Lines written without an `id` get one derived from their exact text, so
//! the same line maps to the same record on every read.

use crate::error::RecordParseError;
use chrono::{DateTime, Utc};
use fms_common::{parse_timestamp, Measurement};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// A measurement that exhausted its in-memory retries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    /// Record identity, used to delete it after re-delivery
    #[serde(default = "Uuid::nil")]
    pub id: Uuid,
    /// Measurement timestamp
    #[serde(deserialize_with = "iso_timestamp")]
    pub timestamp: DateTime<Utc>,
    /// Sensor tag
    pub tag: String,
    /// Reading value
    pub value: f64,
    /// Classification attached at ingestion
    pub is_anomaly: bool,
    /// Failed retries at promotion time
    pub retry_count: u32,
    /// First failed persistence attempt
    #[serde(deserialize_with = "iso_timestamp")]
    pub first_failed_at: DateTime<Utc>,
    /// Promotion time
    #[serde(default, deserialize_with = "optional_iso_timestamp")]
    pub failed_at: Option<DateTime<Utc>>,
}

impl DeadLetterRecord {
    /// Build a record for `measurement`
    #[must_use]
    pub fn new(
        measurement: &Measurement,
        retry_count: u32,
        first_failed_at: DateTime<Utc>,
        failed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: measurement.timestamp,
            tag: measurement.tag.clone(),
            value: measurement.value,
            is_anomaly: measurement.is_anomaly,
            retry_count,
            first_failed_at,
            failed_at: Some(failed_at),
        }
    }

    /// The measurement carried by this record
    #[must_use]
    pub fn measurement(&self) -> Measurement {
        Measurement::new(self.timestamp, self.tag.clone(), self.value, self.is_anomaly)
    }

    /// Encode as one newline-terminated line
    ///
    /// # Errors
    /// Fails only if the record cannot be represented as JSON.
    pub fn encode_line(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }

    /// Parse one line (without its terminator)
    ///
    /// # Errors
    /// [`RecordParseError::Malformed`] when the text is not a valid record.
    pub fn parse_line(text: &str, line: usize) -> Result<Self, RecordParseError> {
        let mut record: Self =
            serde_json::from_str(text).map_err(|e| RecordParseError::Malformed {
                line,
                reason: e.to_string(),
            })?;
        if record.id.is_nil() {
            record.id = Uuid::new_v5(&Uuid::NAMESPACE_OID, text.as_bytes());
        }
        Ok(record)
    }
}

/// A line that failed to parse, kept verbatim for quarantine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorruptLine {
    /// Original bytes, without terminator
    pub raw: Vec<u8>,
    /// Why it was rejected
    pub error: RecordParseError,
}

/// Result of reading a whole log
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogScan {
    /// Valid records in file order
    pub records: Vec<DeadLetterRecord>,
    /// Lines that could not be read back
    pub corrupt: Vec<CorruptLine>,
}

impl LogScan {
    /// Parse log contents
    #[must_use]
    pub fn parse(contents: &[u8]) -> Self {
        let mut scan = Self::default();

        for (idx, piece) in contents.split_inclusive(|b| *b == b'\n').enumerate() {
            let line = idx + 1;
            let terminated = piece.last() == Some(&b'\n');
            let end = piece
                .iter()
                .rposition(|b| *b != b'\n' && *b != b'\r')
                .map_or(0, |i| i + 1);
            let bytes = &piece[..end];
            if bytes.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            let parsed = std::str::from_utf8(bytes)
                .map_err(|_| RecordParseError::InvalidUtf8 { line })
                .and_then(|text| DeadLetterRecord::parse_line(text, line));
            match parsed {
                Ok(record) => scan.records.push(record),
                Err(err) => {
                    let error = if terminated {
                        err
                    } else {
                        RecordParseError::Truncated { line }
                    };
                    scan.corrupt.push(CorruptLine {
                        raw: bytes.to_vec(),
                        error,
                    });
                }
            }
        }

        scan
    }

    /// Check if nothing at all was found
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.corrupt.is_empty()
    }
}

fn iso_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw).map_err(serde::de::Error::custom)
}

fn optional_iso_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        Some(raw) => parse_timestamp(&raw)
            .map(Some)
            .map_err(serde::de::Error::custom),
        None => Ok(None),
    }
}
