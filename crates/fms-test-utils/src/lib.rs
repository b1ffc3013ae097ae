//! Testing utilities for FMS workspace
//!
//! Shared sinks, fixtures, and helpers.

#![allow(missing_docs)]

use chrono::{DateTime, TimeZone, Utc};
use fms_common::{Measurement, MeasurementId, MeasurementSink, RawMeasurement, SinkError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

/// Fixed instant used as "now" by deterministic tests
pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
}

pub fn measurement(tag: &str, value: f64) -> Measurement {
    Measurement::new(epoch(), tag, value, false)
}

pub fn raw(tag: &str, value: f64) -> RawMeasurement {
    RawMeasurement::new("2024-01-01T12:00:00Z", tag, value)
}

/// `n` values alternating between `low` and `high`
pub fn alternating(low: f64, high: f64, n: usize) -> Vec<f64> {
    (0..n).map(|i| if i % 2 == 0 { low } else { high }).collect()
}

/// Sink whose failures are scripted.
///
/// Attempts are numbered from 1. An attempt fails when the sink is switched
/// off or while the attempt number is within `fail_first`.
#[derive(Debug, Default)]
pub struct FlakySink {
    fail_first: AtomicUsize,
    unavailable: AtomicBool,
    attempts: AtomicUsize,
    next_id: AtomicU64,
    written: Mutex<Vec<Measurement>>,
}

impl FlakySink {
    pub fn healthy() -> Self {
        Self::default()
    }

    pub fn failing_first(n: usize) -> Self {
        let sink = Self::default();
        sink.fail_first.store(n, Ordering::SeqCst);
        sink
    }

    pub fn unavailable() -> Self {
        let sink = Self::default();
        sink.set_available(false);
        sink
    }

    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn written(&self) -> Vec<Measurement> {
        self.written.lock().clone()
    }

    pub fn written_count(&self) -> usize {
        self.written.lock().len()
    }
}

#[async_trait::async_trait]
impl MeasurementSink for FlakySink {
    async fn write(&self, measurement: &Measurement) -> Result<MeasurementId, SinkError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(SinkError::Unavailable("switched off".to_string()));
        }
        if attempt <= self.fail_first.load(Ordering::SeqCst) {
            return Err(SinkError::Unavailable(format!("scripted failure #{attempt}")));
        }

        self.written.lock().push(measurement.clone());
        Ok(MeasurementId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1))
    }

    async fn ping(&self) -> Result<(), SinkError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(SinkError::Unavailable("switched off".to_string()))
        } else {
            Ok(())
        }
    }
}
