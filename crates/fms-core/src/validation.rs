//! Boundary validation of raw measurements

use crate::error::ValidationError;
use chrono::{DateTime, Utc};
use fms_common::{parse_timestamp, Measurement, RawMeasurement, TagRegistry};

/// A reading that passed validation but is not yet classified
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedMeasurement {
    /// Parsed timestamp
    pub timestamp: DateTime<Utc>,
    /// Known tag
    pub tag: String,
    /// Finite, in-range value
    pub value: f64,
}

impl ValidatedMeasurement {
    /// Attach the anomaly flag
    #[inline]
    #[must_use]
    pub fn classified(self, is_anomaly: bool) -> Measurement {
        Measurement::new(self.timestamp, self.tag, self.value, is_anomaly)
    }
}

/// Check a raw reading against the registry
///
/// Checks run in order: tag, finiteness, range, timestamp.
///
/// # Errors
/// The first [`ValidationError`] encountered.
pub fn validate(
    raw: &RawMeasurement,
    registry: &TagRegistry,
) -> Result<ValidatedMeasurement, ValidationError> {
    let spec = registry
        .get(&raw.tag)
        .ok_or_else(|| ValidationError::UnknownTag {
            tag: raw.tag.clone(),
        })?;

    if !raw.value.is_finite() {
        return Err(ValidationError::NonFiniteValue {
            tag: raw.tag.clone(),
        });
    }

    if !spec.valid_range.contains(raw.value) {
        return Err(ValidationError::OutOfRange {
            tag: raw.tag.clone(),
            value: raw.value,
            min: spec.valid_range.min,
            max: spec.valid_range.max,
        });
    }

    let timestamp = parse_timestamp(&raw.timestamp)?;

    Ok(ValidatedMeasurement {
        timestamp,
        tag: raw.tag.clone(),
        value: raw.value,
    })
}
