//! Persistence backend seam
//!
//! The ingestion path, the retry worker and startup recovery all write
//! through the same shared sink, so implementations must be safe for
//! concurrent use.

use crate::error::SinkError;
use crate::measurement::{Measurement, MeasurementId};

/// Durable destination for classified measurements.
///
/// Writes are append-only facts: a duplicate write after a retry is
/// acceptable and must not corrupt backend state.
#[async_trait::async_trait]
pub trait MeasurementSink: Send + Sync + std::fmt::Debug {
    /// Persist one measurement, returning the backend-assigned id
    ///
    /// # Errors
    /// Any [`SinkError`] marks this single attempt as failed.
    async fn write(&self, measurement: &Measurement) -> Result<MeasurementId, SinkError>;

    /// Probe backend reachability for health reporting
    ///
    /// # Errors
    /// Returns the reason the backend is considered unreachable.
    async fn ping(&self) -> Result<(), SinkError>;
}
