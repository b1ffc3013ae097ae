//! In-memory retry queue
//!
//! Holds measurements whose persistence failed and retries them on an
//! exponential schedule:
//! - [`DeliveryQueue::add`] never blocks and never fails
//! - [`DeliveryQueue::process_due`] runs one retry pass over due items
//! - exhausted items go to the [`DeadLetterStore`] and leave the queue only
//!   once the append is durable
//!
//! The queue is unbounded. A backend outage that outlasts the retry budget
//! moves items to disk, but a sustained outage with a high ingest rate grows
//! memory linearly until items start exhausting.

use crate::backoff::BackoffPolicy;
use crate::dead_letter::DeadLetterStore;
use crate::error::DeadLetterError;
use crate::record::DeadLetterRecord;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use fms_common::{Clock, Measurement, MeasurementSink, SystemClock};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// A measurement waiting for another persistence attempt
#[derive(Debug, Clone, PartialEq)]
pub struct RetryItem {
    /// Queue-local identity
    pub id: Uuid,
    /// Payload
    pub measurement: Measurement,
    /// Failed retries so far
    pub retry_count: u32,
    /// When persistence first failed
    pub first_failed_at: DateTime<Utc>,
    /// Earliest instant of the next attempt
    pub next_attempt_at: DateTime<Utc>,
    /// Dead-letter record this item was recovered from, if any.
    ///
    /// The record stays in the log until this item is delivered.
    pub origin: Option<Uuid>,
}

impl RetryItem {
    /// Check if the item may be attempted at `now`
    #[inline]
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_attempt_at <= now
    }
}

/// Outcome of one retry pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Items attempted
    pub attempted: usize,
    /// Items persisted and removed
    pub delivered: usize,
    /// Items left queued with a later deadline
    pub rescheduled: usize,
    /// Items that exhausted their retries and left the queue
    pub promoted: usize,
    /// Exhausted items kept because the dead-letter append failed
    pub dead_letter_failures: usize,
}

/// Outcome of draining the queue at shutdown
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Items written to the dead-letter log
    pub written: usize,
    /// Items whose record was already in the log
    pub already_logged: usize,
    /// Items left in memory because the append failed
    pub failed: usize,
}

/// Lifetime counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    /// Items currently queued
    pub queued: usize,
    /// Items ever added
    pub enqueued: u64,
    /// Items delivered by a retry
    pub delivered: u64,
    /// Items promoted to the dead-letter log
    pub promoted: u64,
    /// Dead-letter appends that failed
    pub dead_letter_failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    enqueued: AtomicU64,
    delivered: AtomicU64,
    promoted: AtomicU64,
    dead_letter_failures: AtomicU64,
}

/// Retry queue in front of a [`MeasurementSink`]
#[derive(Debug)]
pub struct DeliveryQueue {
    items: DashMap<Uuid, RetryItem>,
    sink: Arc<dyn MeasurementSink>,
    dead_letters: Arc<DeadLetterStore>,
    clock: Arc<dyn Clock>,
    policy: BackoffPolicy,
    counters: Counters,
    /// Serializes retry passes and the shutdown drain
    pass: Mutex<()>,
}

impl DeliveryQueue {
    /// Create a queue with the default policy and the system clock
    #[must_use]
    pub fn new(sink: Arc<dyn MeasurementSink>, dead_letters: Arc<DeadLetterStore>) -> Self {
        Self {
            items: DashMap::new(),
            sink,
            dead_letters,
            clock: Arc::new(SystemClock),
            policy: BackoffPolicy::default(),
            counters: Counters::default(),
            pass: Mutex::new(()),
        }
    }

    /// Use a different clock
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Use a different backoff policy
    #[must_use]
    pub fn with_policy(mut self, policy: BackoffPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Queue a measurement whose first persistence attempt failed
    pub fn add(&self, measurement: Measurement) -> Uuid {
        let now = self.clock.now();
        self.insert(measurement, now, now, None)
    }

    /// Queue a measurement recovered from dead-letter record `origin`.
    ///
    /// Starts a fresh retry cycle at count 0.
    pub fn requeue(
        &self,
        measurement: Measurement,
        origin: Uuid,
        first_failed_at: DateTime<Utc>,
    ) -> Uuid {
        let now = self.clock.now();
        self.insert(measurement, first_failed_at, now, Some(origin))
    }

    fn insert(
        &self,
        measurement: Measurement,
        first_failed_at: DateTime<Utc>,
        now: DateTime<Utc>,
        origin: Option<Uuid>,
    ) -> Uuid {
        let item = RetryItem {
            id: Uuid::new_v4(),
            measurement,
            retry_count: 0,
            first_failed_at,
            next_attempt_at: self.policy.next_attempt(now, 0),
            origin,
        };
        let id = item.id;

        tracing::debug!(
            item = %id,
            tag = %item.measurement.tag,
            next_attempt_at = %item.next_attempt_at,
            recovered = origin.is_some(),
            "measurement queued for retry"
        );
        self.items.insert(id, item);
        self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
        id
    }

    /// Check if a recovered record is already being retried
    #[must_use]
    pub fn contains_origin(&self, origin: Uuid) -> bool {
        self.items
            .iter()
            .any(|entry| entry.value().origin == Some(origin))
    }

    /// Dead-letter records currently being retried
    #[must_use]
    pub fn origins(&self) -> HashSet<Uuid> {
        self.items
            .iter()
            .filter_map(|entry| entry.value().origin)
            .collect()
    }

    /// Number of queued items
    #[inline]
    #[must_use]
    pub fn size(&self) -> usize {
        self.items.len()
    }

    /// Check if nothing is queued
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Snapshot of queued items, earliest deadline first
    #[must_use]
    pub fn pending(&self) -> Vec<RetryItem> {
        let mut items: Vec<RetryItem> = self.items.iter().map(|e| e.value().clone()).collect();
        items.sort_by_key(|item| item.next_attempt_at);
        items
    }

    /// Backoff policy in use
    #[inline]
    #[must_use]
    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Backend the queue retries against
    #[inline]
    #[must_use]
    pub fn sink(&self) -> &Arc<dyn MeasurementSink> {
        &self.sink
    }

    /// Dead-letter log exhausted items go to
    #[inline]
    #[must_use]
    pub fn dead_letters(&self) -> &Arc<DeadLetterStore> {
        &self.dead_letters
    }

    /// Lifetime counters plus current size
    #[must_use]
    pub fn stats(&self) -> DeliveryStats {
        DeliveryStats {
            queued: self.size(),
            enqueued: self.counters.enqueued.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            promoted: self.counters.promoted.load(Ordering::Relaxed),
            dead_letter_failures: self.counters.dead_letter_failures.load(Ordering::Relaxed),
        }
    }

    /// Attempt every item due at the current clock reading
    ///
    /// Items added while the pass runs wait for the next pass.
    pub async fn process_due(&self) -> TickReport {
        let _pass = self.pass.lock().await;
        let now = self.clock.now();

        let due: Vec<Uuid> = self
            .items
            .iter()
            .filter(|entry| entry.value().is_due(now))
            .map(|entry| *entry.key())
            .collect();

        let mut report = TickReport::default();
        for id in due {
            // clone out so no map guard is held across the write
            let Some(item) = self.items.get(&id).map(|e| e.value().clone()) else {
                continue;
            };
            report.attempted += 1;

            match self.sink.write(&item.measurement).await {
                Ok(stored) => {
                    self.items.remove(&id);
                    self.counters.delivered.fetch_add(1, Ordering::Relaxed);
                    report.delivered += 1;
                    tracing::info!(
                        item = %id,
                        tag = %item.measurement.tag,
                        stored = %stored,
                        retry_count = item.retry_count,
                        "retry delivered"
                    );
                    if let Some(origin) = item.origin {
                        self.forget_record(origin).await;
                    }
                }
                Err(err) => {
                    let retry_count = item.retry_count.saturating_add(1);
                    tracing::warn!(
                        item = %id,
                        tag = %item.measurement.tag,
                        retry_count,
                        error = %err,
                        "retry failed"
                    );

                    if self.policy.is_exhausted(retry_count) {
                        match self.promote(&item, retry_count, now).await {
                            Ok(()) => {
                                self.items.remove(&id);
                                report.promoted += 1;
                            }
                            Err(e) => {
                                self.hold_after_failed_append(id, now);
                                report.dead_letter_failures += 1;
                                tracing::error!(
                                    item = %id,
                                    error = %e,
                                    "dead-letter append failed, keeping item queued"
                                );
                            }
                        }
                    } else {
                        if let Some(mut entry) = self.items.get_mut(&id) {
                            entry.retry_count = retry_count;
                            entry.next_attempt_at = self.policy.next_attempt(now, retry_count);
                        }
                        report.rescheduled += 1;
                    }
                }
            }
        }

        if report.attempted > 0 {
            tracing::debug!(?report, remaining = self.size(), "retry pass complete");
        }
        report
    }

    /// Write every queued item to the dead-letter log
    ///
    /// Waits for a running retry pass to finish first. Items whose append
    /// fails stay in memory.
    pub async fn drain_to_dead_letter(&self) -> DrainReport {
        let _pass = self.pass.lock().await;
        let now = self.clock.now();
        let mut report = DrainReport::default();

        let ids: Vec<Uuid> = self.items.iter().map(|e| *e.key()).collect();
        for id in ids {
            let Some(item) = self.items.get(&id).map(|e| e.value().clone()) else {
                continue;
            };

            if item.origin.is_some() {
                self.items.remove(&id);
                report.already_logged += 1;
                continue;
            }

            let record =
                DeadLetterRecord::new(&item.measurement, item.retry_count, item.first_failed_at, now);
            match self.dead_letters.append(&record).await {
                Ok(()) => {
                    self.items.remove(&id);
                    report.written += 1;
                }
                Err(e) => {
                    self.counters.dead_letter_failures.fetch_add(1, Ordering::Relaxed);
                    report.failed += 1;
                    tracing::error!(item = %id, error = %e, "could not persist pending item at shutdown");
                }
            }
        }

        tracing::info!(
            written = report.written,
            already_logged = report.already_logged,
            failed = report.failed,
            "retry queue drained"
        );
        report
    }

    async fn promote(
        &self,
        item: &RetryItem,
        retry_count: u32,
        now: DateTime<Utc>,
    ) -> Result<(), DeadLetterError> {
        if let Some(origin) = item.origin {
            // the original record is still in the log
            self.counters.promoted.fetch_add(1, Ordering::Relaxed);
            tracing::error!(
                item = %item.id,
                record = %origin,
                tag = %item.measurement.tag,
                retry_count,
                "recovered measurement exhausted retries again, left in dead-letter log"
            );
            return Ok(());
        }

        let record = DeadLetterRecord::new(&item.measurement, retry_count, item.first_failed_at, now);
        self.dead_letters.append(&record).await?;
        self.counters.promoted.fetch_add(1, Ordering::Relaxed);
        tracing::error!(
            item = %item.id,
            record = %record.id,
            tag = %item.measurement.tag,
            retry_count,
            "measurement exhausted retries, moved to dead-letter log"
        );
        Ok(())
    }

    fn hold_after_failed_append(&self, id: Uuid, now: DateTime<Utc>) {
        self.counters.dead_letter_failures.fetch_add(1, Ordering::Relaxed);
        if let Some(mut entry) = self.items.get_mut(&id) {
            entry.retry_count = self.policy.max_retries;
            entry.next_attempt_at = self.policy.next_attempt(now, self.policy.max_retries);
        }
    }

    async fn forget_record(&self, origin: Uuid) {
        match self.dead_letters.remove(&HashSet::from([origin])).await {
            Ok(_) => {}
            Err(e) => {
                // delivered but still logged: the next recovery delivers it again
                tracing::warn!(record = %origin, error = %e, "could not remove delivered dead-letter record");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use fms_common::ManualClock;
    use fms_test_utils::{epoch, measurement, FlakySink};
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        clock: Arc<ManualClock>,
        sink: Arc<FlakySink>,
        store: Arc<DeadLetterStore>,
        queue: DeliveryQueue,
    }

    async fn fixture(sink: FlakySink) -> Fixture {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(DeadLetterStore::open(dir.path().join("dlq.jsonl")).await.unwrap());
        let clock = Arc::new(ManualClock::new(epoch()));
        let sink = Arc::new(sink);
        let queue = DeliveryQueue::new(sink.clone(), store.clone()).with_clock(clock.clone());
        Fixture {
            _dir: dir,
            clock,
            sink,
            store,
            queue,
        }
    }

    #[tokio::test]
    async fn add_schedules_first_retry_after_base_delay() {
        let f = fixture(FlakySink::healthy()).await;
        f.queue.add(measurement("fermenter_temp", 37.0));

        let items = f.queue.pending();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].retry_count, 0);
        assert_eq!(items[0].first_failed_at, epoch());
        assert_eq!(items[0].next_attempt_at, epoch() + Duration::seconds(1));
    }

    #[tokio::test]
    async fn items_wait_for_their_deadline() {
        let f = fixture(FlakySink::healthy()).await;
        f.queue.add(measurement("fermenter_temp", 37.0));

        assert_eq!(f.queue.process_due().await.attempted, 0);
        assert_eq!(f.sink.attempts(), 0);

        f.clock.advance_secs(1);
        let report = f.queue.process_due().await;
        assert_eq!(report.delivered, 1);
        assert!(f.queue.is_empty());
        assert_eq!(f.sink.written_count(), 1);
    }

    #[tokio::test]
    async fn failures_back_off_exponentially() {
        let f = fixture(FlakySink::unavailable()).await;
        f.queue.add(measurement("fermenter_ph", 7.0));

        for (count, delay) in [(1, 2), (2, 4), (3, 8)] {
            let due = f.queue.pending()[0].next_attempt_at;
            f.clock.set(due);
            assert_eq!(f.queue.process_due().await.rescheduled, 1);

            let item = f.queue.pending()[0].clone();
            assert_eq!(item.retry_count, count);
            assert_eq!(item.next_attempt_at, due + Duration::seconds(delay));
        }
    }

    #[tokio::test]
    async fn exhausted_item_is_promoted_once() {
        let f = fixture(FlakySink::unavailable()).await;
        f.queue.add(measurement("agitator_rpm", 420.0));

        let mut promoted = 0;
        for _ in 0..4 {
            f.clock.advance_secs(60);
            promoted += f.queue.process_due().await.promoted;
        }

        assert_eq!(promoted, 1);
        assert!(f.queue.is_empty());
        assert_eq!(f.sink.attempts(), 4);

        let scan = f.store.load().await.unwrap();
        assert_eq!(scan.records.len(), 1);
        assert_eq!(scan.records[0].retry_count, 4);
        assert_eq!(scan.records[0].first_failed_at, epoch());
        assert_eq!(f.queue.stats().promoted, 1);
    }

    #[tokio::test]
    async fn recovered_item_is_not_logged_twice() {
        let f = fixture(FlakySink::unavailable()).await;
        let m = measurement("fermenter_temp", 46.0);
        let record = DeadLetterRecord::new(&m, 4, epoch(), epoch());
        f.store.append(&record).await.unwrap();

        f.queue.requeue(m, record.id, record.first_failed_at);
        assert!(f.queue.contains_origin(record.id));

        for _ in 0..4 {
            f.clock.advance_secs(60);
            f.queue.process_due().await;
        }

        assert!(f.queue.is_empty());
        let scan = f.store.load().await.unwrap();
        assert_eq!(scan.records, vec![record]);
    }

    #[tokio::test]
    async fn delivered_recovered_item_leaves_the_log() {
        let f = fixture(FlakySink::healthy()).await;
        let m = measurement("fermenter_temp", 46.0);
        let record = DeadLetterRecord::new(&m, 4, epoch(), epoch());
        f.store.append(&record).await.unwrap();

        f.queue.requeue(m, record.id, record.first_failed_at);
        f.clock.advance_secs(1);
        assert_eq!(f.queue.process_due().await.delivered, 1);

        assert!(f.store.is_empty());
        assert!(f.store.load().await.unwrap().records.is_empty());
    }

    #[tokio::test]
    async fn drain_writes_pending_items() {
        let f = fixture(FlakySink::unavailable()).await;
        f.queue.add(measurement("fermenter_temp", 37.0));
        f.queue.add(measurement("fermenter_ph", 7.0));

        let report = f.queue.drain_to_dead_letter().await;
        assert_eq!(report.written, 2);
        assert!(f.queue.is_empty());
        assert_eq!(f.store.len(), 2);
    }

    #[tokio::test]
    async fn failed_append_keeps_item_at_retry_budget() {
        let f = fixture(FlakySink::unavailable()).await;
        f.queue.add(measurement("agitator_rpm", 690.0));
        f.store.set_appends_failing(true);

        let mut reports = Vec::new();
        for _ in 0..4 {
            f.clock.advance_secs(60);
            reports.push(f.queue.process_due().await);
        }
        let last = reports[3];

        assert_eq!(last.dead_letter_failures, 1);
        assert_eq!(last.promoted, 0);
        let held = f.queue.pending();
        assert_eq!(held.len(), 1);
        assert_eq!(held[0].retry_count, f.queue.policy().max_retries);
        assert!(f.store.is_empty());
        assert_eq!(f.queue.stats().dead_letter_failures, 1);

        f.store.set_appends_failing(false);
        f.clock.advance_secs(60);
        let report = f.queue.process_due().await;
        assert_eq!(report.promoted, 1);
        assert!(f.queue.is_empty());

        let scan = f.store.load().await.unwrap();
        assert_eq!(scan.records.len(), 1);
        assert_eq!(scan.records[0].retry_count, 4);
        assert_eq!(f.queue.stats().promoted, 1);
    }

    #[tokio::test]
    async fn origins_lists_recovered_records_only() {
        let f = fixture(FlakySink::unavailable()).await;
        let origin = Uuid::new_v4();
        f.queue.add(measurement("fermenter_temp", 37.0));
        f.queue.requeue(measurement("fermenter_ph", 7.0), origin, epoch());

        assert_eq!(f.queue.origins(), HashSet::from([origin]));
    }
}
