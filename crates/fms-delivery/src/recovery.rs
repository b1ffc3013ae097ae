//! Startup recovery of the dead-letter log
//!
//! Runs once before ingestion starts:
//! - each valid record gets one immediate delivery attempt
//! - delivered records are deleted from the log
//! - records that fail again start a fresh retry cycle in the queue and
//!   stay in the log until that cycle delivers them
//! - corrupt and truncated lines are moved to the quarantine file

use crate::dead_letter::DeadLetterStore;
use crate::error::DeadLetterError;
use crate::queue::DeliveryQueue;
use fms_common::MeasurementSink;
use std::collections::HashSet;

/// Outcome of [`DeadLetterStore::recover_all`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Valid records found
    pub scanned: usize,
    /// Records delivered and deleted
    pub recovered: usize,
    /// Records handed back to the retry queue
    pub requeued: usize,
    /// Records skipped because the queue already retries them or an
    /// identical line came earlier in the log
    pub already_queued: usize,
    /// Lines that failed to parse
    pub corrupt: usize,
    /// Corrupt lines moved to the quarantine file
    pub quarantined: usize,
}

impl RecoveryReport {
    /// Check if the pass found nothing at all
    #[inline]
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.scanned == 0 && self.corrupt == 0
    }
}

impl DeadLetterStore {
    /// Re-deliver every record in the log
    ///
    /// Running it again right after a pass changes nothing: delivered records
    /// are gone and requeued ones are recognised by their id.
    ///
    /// # Errors
    /// Only I/O failures on the log itself. Corrupt lines and failed
    /// deliveries are reported, not returned.
    pub async fn recover_all(
        &self,
        sink: &dyn MeasurementSink,
        queue: &DeliveryQueue,
    ) -> Result<RecoveryReport, DeadLetterError> {
        let scan = self.load().await?;
        let mut report = RecoveryReport {
            scanned: scan.records.len(),
            corrupt: scan.corrupt.len(),
            ..RecoveryReport::default()
        };
        if report.is_noop() {
            tracing::debug!(path = %self.path().display(), "dead-letter log empty, nothing to recover");
            return Ok(report);
        }

        for line in &scan.corrupt {
            tracing::warn!(path = %self.path().display(), error = %line.error, "skipping unreadable dead-letter line");
        }

        let mut seen = queue.origins();
        let mut delivered = HashSet::new();
        for record in &scan.records {
            if !seen.insert(record.id) {
                report.already_queued += 1;
                continue;
            }

            let measurement = record.measurement();
            match sink.write(&measurement).await {
                Ok(stored) => {
                    tracing::debug!(record = %record.id, stored = %stored, "dead-letter record delivered");
                    delivered.insert(record.id);
                }
                Err(err) => {
                    tracing::warn!(
                        record = %record.id,
                        tag = %record.tag,
                        error = %err,
                        "dead-letter record still undeliverable, requeued"
                    );
                    queue.requeue(measurement, record.id, record.first_failed_at);
                    report.requeued += 1;
                }
            }
        }
        report.recovered = delivered.len();

        let compaction = self.compact(&delivered).await?;
        report.quarantined = compaction.quarantined;

        tracing::info!(
            path = %self.path().display(),
            scanned = report.scanned,
            recovered = report.recovered,
            requeued = report.requeued,
            already_queued = report.already_queued,
            corrupt = report.corrupt,
            "dead-letter recovery complete"
        );
        Ok(report)
    }
}
