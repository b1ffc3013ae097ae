//! Ingestion orchestrator
//!
//! Owns the pipeline for each incoming reading:
//! - validation against the tag registry
//! - classification by the [`StreamingDetector`]
//! - one synchronous write, with failures handed to the [`DeliveryQueue`]
//!
//! Construction runs dead-letter recovery, so no reading can be handled
//! before the previous run's failures have been re-delivered or requeued.

use crate::config::{HealthConfig, ServiceConfig};
use crate::error::ServiceError;
use crate::report::{BatchResponse, HealthReport, HealthStatus, IngestResponse, StatsReport};
use crate::state::{IngestFlow, IngestState};
use crate::store::StoreTotals;
use crate::validation::validate;
use fms_common::{Clock, MeasurementSink, RawMeasurement, SystemClock, TagRegistry};
use fms_delivery::{
    DeadLetterStore, DeliveryQueue, DrainReport, RecoveryReport, RetryWorker, TickReport,
};
use fms_detector::StreamingDetector;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Entry point for measurements
#[derive(Debug)]
pub struct IngestionOrchestrator {
    registry: TagRegistry,
    detector: StreamingDetector,
    sink: Arc<dyn MeasurementSink>,
    queue: Arc<DeliveryQueue>,
    dead_letters: Arc<DeadLetterStore>,
    clock: Arc<dyn Clock>,
    health: HealthConfig,
    tick: Duration,
    recovery: RecoveryReport,
    worker: Mutex<Option<RetryWorker>>,
}

impl IngestionOrchestrator {
    /// Open the dead-letter log, recover it, and build the pipeline
    ///
    /// # Errors
    /// Invalid configuration or dead-letter I/O failure.
    pub async fn open(
        config: &ServiceConfig,
        sink: Arc<dyn MeasurementSink>,
    ) -> Result<Self, ServiceError> {
        Self::open_with_clock(config, sink, Arc::new(SystemClock)).await
    }

    /// As [`IngestionOrchestrator::open`], with an injected clock
    ///
    /// # Errors
    /// Invalid configuration or dead-letter I/O failure.
    pub async fn open_with_clock(
        config: &ServiceConfig,
        sink: Arc<dyn MeasurementSink>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ServiceError> {
        config.validate()?;

        let registry = config.registry();
        let detector = StreamingDetector::new(config.detector, &registry);
        let dead_letters =
            Arc::new(DeadLetterStore::open(&config.delivery.dead_letter_path).await?);
        let queue = Arc::new(
            DeliveryQueue::new(sink.clone(), dead_letters.clone())
                .with_clock(clock.clone())
                .with_policy(config.delivery.policy()),
        );

        let recovery = dead_letters.recover_all(sink.as_ref(), &queue).await?;

        tracing::info!(
            tags = registry.len(),
            dead_letter_path = %dead_letters.path().display(),
            recovered = recovery.recovered,
            requeued = recovery.requeued,
            "ingestion orchestrator ready"
        );

        Ok(Self {
            registry,
            detector,
            sink,
            queue,
            dead_letters,
            clock,
            health: config.health,
            tick: config.delivery.tick_interval(),
            recovery,
            worker: Mutex::new(None),
        })
    }

    /// Start the background retry worker; no-op if already running
    pub async fn start(&self) {
        let mut worker = self.worker.lock().await;
        if worker.is_none() {
            *worker = Some(RetryWorker::spawn(self.queue.clone(), self.tick));
        }
    }

    /// Check if the retry worker is running
    pub async fn is_running(&self) -> bool {
        self.worker
            .lock()
            .await
            .as_ref()
            .is_some_and(|w| !w.is_finished())
    }

    /// Validate, classify and persist one reading
    pub async fn handle(&self, raw: RawMeasurement) -> IngestResponse {
        let mut flow = IngestFlow::received(&raw.tag);

        let valid = match validate(&raw, &self.registry) {
            Ok(valid) => {
                flow.advance(IngestState::Validated);
                valid
            }
            Err(err) => {
                flow.advance(IngestState::Rejected);
                tracing::warn!(tag = %raw.tag, error = %err, "measurement rejected");
                return IngestResponse::rejected(raw.tag, err.to_string());
            }
        };

        let classification = self.detector.evaluate(&valid.tag, valid.value);
        let measurement = valid.classified(classification.is_anomaly);
        flow.advance(IngestState::Classified);
        if measurement.is_anomaly {
            tracing::warn!(
                tag = %measurement.tag,
                value = measurement.value,
                z_score = ?classification.z_score,
                threshold_breach = classification.threshold_breach,
                "anomaly detected"
            );
        }

        match self.sink.write(&measurement).await {
            Ok(id) => {
                flow.advance(IngestState::Persisted);
                tracing::debug!(%id, tag = %measurement.tag, "measurement persisted");
                IngestResponse::success(measurement.tag, id, measurement.is_anomaly)
            }
            Err(err) => {
                tracing::warn!(tag = %measurement.tag, error = %err, "write failed, queueing for retry");
                let tag = measurement.tag.clone();
                let is_anomaly = measurement.is_anomaly;
                self.queue.add(measurement);
                flow.advance(IngestState::Queued);
                IngestResponse::queued(tag, is_anomaly)
            }
        }
    }

    /// Handle each reading independently, in order
    pub async fn handle_batch(&self, batch: Vec<RawMeasurement>) -> BatchResponse {
        let mut results = Vec::with_capacity(batch.len());
        for raw in batch {
            results.push(self.handle(raw).await);
        }
        let response: BatchResponse = results.into_iter().collect();
        tracing::info!(
            processed = response.processed,
            accepted = response.accepted,
            rejected = response.rejected,
            "batch ingested"
        );
        response
    }

    /// Run one retry pass now, independent of the worker tick
    pub async fn process_retries(&self) -> TickReport {
        self.queue.process_due().await
    }

    /// Current health
    pub async fn health(&self) -> HealthReport {
        let ping = self.sink.ping().await;
        let retry_queue_size = self.queue.size();

        let status = if ping.is_ok() && retry_queue_size < self.health.retry_queue_warn_threshold {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        };
        let database = match ping {
            Ok(()) => "healthy".to_string(),
            Err(err) => format!("unhealthy: {err}"),
        };

        HealthReport {
            status,
            database,
            retry_queue_size,
            dead_letter_present: !self.dead_letters.is_empty(),
            timestamp: self.clock.now(),
        }
    }

    /// Statistics combining backend totals with delivery state
    #[must_use]
    pub fn stats(&self, totals: StoreTotals) -> StatsReport {
        StatsReport::new(totals, self.queue.size(), self.dead_letters.len())
    }

    /// Stop the worker, then move everything still queued to the dead-letter log
    ///
    /// # Errors
    /// [`ServiceError::Worker`] if the worker task panicked; the queue is
    /// drained regardless.
    pub async fn shutdown(&self) -> Result<DrainReport, ServiceError> {
        let worker = self.worker.lock().await.take();
        let stopped = match worker {
            Some(worker) => worker.stop().await,
            None => Ok(()),
        };

        let drained = self.queue.drain_to_dead_letter().await;
        tracing::info!(
            written = drained.written,
            failed = drained.failed,
            dead_letters = self.dead_letters.len(),
            "ingestion orchestrator stopped"
        );
        stopped?;
        Ok(drained)
    }

    /// Recovery outcome from startup
    #[inline]
    #[must_use]
    pub fn recovery(&self) -> RecoveryReport {
        self.recovery
    }

    /// Items awaiting retry
    #[inline]
    #[must_use]
    pub fn retry_queue_size(&self) -> usize {
        self.queue.size()
    }

    /// Records in the dead-letter log
    #[inline]
    #[must_use]
    pub fn dead_letter_count(&self) -> usize {
        self.dead_letters.len()
    }

    /// Known tags
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &TagRegistry {
        &self.registry
    }

    /// The detector, for window inspection
    #[inline]
    #[must_use]
    pub fn detector(&self) -> &StreamingDetector {
        &self.detector
    }

    /// The retry queue
    #[inline]
    #[must_use]
    pub fn queue(&self) -> &Arc<DeliveryQueue> {
        &self.queue
    }
}
