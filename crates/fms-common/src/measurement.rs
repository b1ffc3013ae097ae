//! Measurement types
//!
//! A [`RawMeasurement`] is what the transport hands over; a [`Measurement`]
//! is the validated, classified fact that flows into persistence.

use crate::error::TimestampError;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier assigned by the persistence backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MeasurementId(pub u64);

impl fmt::Display for MeasurementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unvalidated reading as received from the transport layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMeasurement {
    /// ISO-8601 timestamp string
    pub timestamp: String,
    /// Sensor tag name
    pub tag: String,
    /// Reading value
    pub value: f64,
}

impl RawMeasurement {
    /// Create a raw reading
    #[inline]
    #[must_use]
    pub fn new(timestamp: impl Into<String>, tag: impl Into<String>, value: f64) -> Self {
        Self {
            timestamp: timestamp.into(),
            tag: tag.into(),
            value,
        }
    }
}

/// A classified sensor reading.
///
/// Immutable once classified: the orchestrator builds it after running the
/// detector, and from then on it is only moved between persistence states.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// When the reading was taken
    pub timestamp: DateTime<Utc>,
    /// Sensor tag name
    pub tag: String,
    /// Reading value
    pub value: f64,
    /// Anomaly classification attached at ingestion
    pub is_anomaly: bool,
}

impl Measurement {
    /// Create a classified measurement
    #[inline]
    #[must_use]
    pub fn new(timestamp: DateTime<Utc>, tag: impl Into<String>, value: f64, is_anomaly: bool) -> Self {
        Self {
            timestamp,
            tag: tag.into(),
            value,
            is_anomaly,
        }
    }
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {} @ {}", self.tag, self.value, self.timestamp.to_rfc3339())
    }
}

/// Parse an ISO-8601 timestamp.
///
/// Accepts RFC 3339 with `Z` or an explicit offset, naive date-times
/// (`T` or space separated, optional fraction) which are taken as UTC,
/// and bare dates, which resolve to midnight UTC.
///
/// # Errors
/// Returns [`TimestampError`] when none of the accepted forms match.
pub fn parse_timestamp(input: &str) -> Result<DateTime<Utc>, TimestampError> {
    let trimmed = input.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.with_timezone(&Utc));
    }

    if let Ok(naive) = trimmed.parse::<NaiveDateTime>() {
        return Ok(naive.and_utc());
    }

    if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S%.f") {
        return Ok(naive.and_utc());
    }

    if let Some(midnight) = trimmed
        .parse::<NaiveDate>()
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
    {
        return Ok(midnight.and_utc());
    }

    Err(TimestampError {
        input: input.to_string(),
    })
}
