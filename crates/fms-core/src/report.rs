//! Caller-facing response and report shapes

use crate::store::StoreTotals;
use chrono::{DateTime, Utc};
use fms_common::MeasurementId;
use serde::Serialize;

/// Outcome of one ingestion, as seen by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    /// Written on the first attempt
    Success,
    /// Accepted; first write failed and a retry is scheduled
    QueuedForRetry,
    /// Failed validation
    Rejected,
}

/// Response to a single ingestion
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestResponse {
    /// Outcome
    pub status: IngestStatus,
    /// Tag as submitted
    pub tag: String,
    /// Backend id, when written immediately
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<MeasurementId>,
    /// Classification, for accepted measurements
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_anomaly: Option<bool>,
    /// Human-readable detail
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl IngestResponse {
    /// Written on the first attempt
    #[must_use]
    pub fn success(tag: impl Into<String>, id: MeasurementId, is_anomaly: bool) -> Self {
        Self {
            status: IngestStatus::Success,
            tag: tag.into(),
            id: Some(id),
            is_anomaly: Some(is_anomaly),
            message: None,
        }
    }

    /// Accepted and deferred to the retry queue
    #[must_use]
    pub fn queued(tag: impl Into<String>, is_anomaly: bool) -> Self {
        Self {
            status: IngestStatus::QueuedForRetry,
            tag: tag.into(),
            id: None,
            is_anomaly: Some(is_anomaly),
            message: Some("storage unavailable, measurement queued for retry".to_string()),
        }
    }

    /// Rejected at validation
    #[must_use]
    pub fn rejected(tag: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            status: IngestStatus::Rejected,
            tag: tag.into(),
            id: None,
            is_anomaly: None,
            message: Some(reason.into()),
        }
    }

    /// Check if the measurement entered the pipeline
    #[inline]
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        self.status != IngestStatus::Rejected
    }
}

/// Response to a batch ingestion
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchResponse {
    /// Items in the batch
    pub processed: usize,
    /// Items persisted or queued
    pub accepted: usize,
    /// Items rejected
    pub rejected: usize,
    /// Per-item results in submission order
    pub results: Vec<IngestResponse>,
}

impl FromIterator<IngestResponse> for BatchResponse {
    fn from_iter<I: IntoIterator<Item = IngestResponse>>(iter: I) -> Self {
        let results: Vec<IngestResponse> = iter.into_iter().collect();
        let accepted = results.iter().filter(|r| r.is_accepted()).count();
        Self {
            processed: results.len(),
            accepted,
            rejected: results.len() - accepted,
            results,
        }
    }
}

/// Overall service condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Backend reachable and retry queue below threshold
    Healthy,
    /// Anything else
    Degraded,
}

/// Health surface
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    /// Overall condition
    pub status: HealthStatus,
    /// `"healthy"` or `"unhealthy: <reason>"`
    pub database: String,
    /// Items awaiting retry
    pub retry_queue_size: usize,
    /// Dead-letter log holds records
    pub dead_letter_present: bool,
    /// When the report was taken
    pub timestamp: DateTime<Utc>,
}

/// Retry queue summary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    /// Items awaiting retry
    Pending,
    /// Nothing queued
    Clear,
}

/// Statistics surface
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsReport {
    /// Distinct tags stored
    pub total_tags: usize,
    /// Rows stored
    pub total_measurements: u64,
    /// Rows flagged anomalous
    pub total_anomalies: u64,
    /// Anomalous share in percent, two decimals
    pub anomaly_rate: f64,
    /// Items awaiting retry
    pub retry_queue_size: usize,
    /// Queue summary
    pub retry_queue_status: QueueStatus,
    /// Records in the dead-letter log
    pub dead_letter_count: usize,
}

impl StatsReport {
    /// Combine backend totals with delivery state
    #[must_use]
    pub fn new(totals: StoreTotals, retry_queue_size: usize, dead_letter_count: usize) -> Self {
        Self {
            total_tags: totals.tags,
            total_measurements: totals.measurements,
            total_anomalies: totals.anomalies,
            anomaly_rate: anomaly_rate(totals.anomalies, totals.measurements),
            retry_queue_size,
            retry_queue_status: if retry_queue_size > 0 {
                QueueStatus::Pending
            } else {
                QueueStatus::Clear
            },
            dead_letter_count,
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn anomaly_rate(anomalies: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let percent = anomalies as f64 / total as f64 * 100.0;
    (percent * 100.0).round() / 100.0
}
