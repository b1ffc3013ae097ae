//! Synthetic fermenter sensor data
//!
//! Each tag follows a slow sine around its base value with uniform noise.
//! Occasionally a reading spikes up or drops down by a few multiples of the
//! tag's variation. Values are clamped to the normal band widened by one
//! variation, so every reading stays inside the accepted input range.
//!
//! [`run_simulation`] drives an orchestrator in-process on a manual clock,
//! optionally switching the backend off for a window of batches.

use chrono::{DateTime, Duration, Utc};
use fms_common::{Bounds, Clock, ManualClock, RawMeasurement};
use fms_core::{IngestStatus, IngestionOrchestrator, MemoryStore};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::fmt;
use std::ops::Range;

/// Generator settings for one tag
#[derive(Debug, Clone, PartialEq)]
pub struct SensorProfile {
    /// Tag name
    pub tag: String,
    /// Centre of the signal
    pub base: f64,
    /// Amplitude scale of sine, noise and spikes
    pub variation: f64,
    /// Normal operating band
    pub normal: Bounds,
    /// Chance that a reading is a spike or drop
    pub anomaly_probability: f64,
}

impl SensorProfile {
    /// Create a profile
    #[must_use]
    pub fn new(
        tag: impl Into<String>,
        base: f64,
        variation: f64,
        normal: Bounds,
        anomaly_probability: f64,
    ) -> Self {
        Self {
            tag: tag.into(),
            base,
            variation,
            normal,
            anomaly_probability,
        }
    }

    /// Profiles for the three stock fermenter tags
    #[must_use]
    pub fn fermenter_defaults() -> Vec<Self> {
        vec![
            Self::new("fermenter_temp", 37.5, 1.5, Bounds::new(35.0, 40.0), 0.05),
            Self::new("fermenter_ph", 7.0, 0.3, Bounds::new(6.5, 7.5), 0.04),
            Self::new("agitator_rpm", 450.0, 50.0, Bounds::new(300.0, 600.0), 0.03),
        ]
    }

    fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.normal.min - self.variation, self.normal.max + self.variation)
    }
}

/// Seeded reading generator
#[derive(Debug)]
pub struct Simulator {
    profiles: Vec<SensorProfile>,
    rng: StdRng,
    step: u64,
}

impl Simulator {
    /// Generator over the stock profiles
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self::with_profiles(seed, SensorProfile::fermenter_defaults())
    }

    /// Generator over custom profiles
    #[must_use]
    pub fn with_profiles(seed: u64, profiles: Vec<SensorProfile>) -> Self {
        Self {
            profiles,
            rng: StdRng::seed_from_u64(seed),
            step: 0,
        }
    }

    /// One reading per profile, stamped `at`
    pub fn next_batch(&mut self, at: DateTime<Utc>) -> Vec<RawMeasurement> {
        self.step += 1;
        #[allow(clippy::cast_precision_loss)]
        let phase = (self.step as f64 * 0.1).sin();
        let timestamp = at.to_rfc3339();

        let mut batch = Vec::with_capacity(self.profiles.len());
        for profile in &self.profiles {
            let v = profile.variation;
            let mut value = profile.base + phase * v * 0.5 + self.rng.random_range(-0.4..=0.4) * v;

            if self.rng.random_bool(profile.anomaly_probability) {
                if self.rng.random_bool(0.5) {
                    value += v * self.rng.random_range(3.0..5.0);
                } else {
                    value -= v * self.rng.random_range(2.0..4.0);
                }
            }

            let value = (profile.clamp(value) * 100.0).round() / 100.0;
            batch.push(RawMeasurement::new(timestamp.clone(), profile.tag.clone(), value));
        }
        batch
    }
}

/// Settings for [`run_simulation`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulationConfig {
    /// RNG seed
    pub seed: u64,
    /// Batches to ingest
    pub batches: u64,
    /// Simulated time between batches
    pub interval: Duration,
    /// Batch indices during which the backend is down
    pub outage: Range<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            batches: 100,
            interval: Duration::seconds(1),
            outage: 0..0,
        }
    }
}

/// What happened during a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SimulationSummary {
    /// Readings generated
    pub readings: usize,
    /// Written on first attempt
    pub persisted: usize,
    /// Deferred to the retry queue
    pub queued: usize,
    /// Failed validation
    pub rejected: usize,
    /// Flagged anomalous
    pub anomalies: usize,
    /// Delivered later by retry passes
    pub retried: usize,
    /// Rows in the backend at the end
    pub stored: usize,
    /// Items still queued at the end
    pub retry_queue_size: usize,
    /// Records in the dead-letter log at the end
    pub dead_letter_count: usize,
}

impl fmt::Display for SimulationSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Simulation Summary:")?;
        writeln!(f, "  Readings:          {}", self.readings)?;
        writeln!(f, "  Persisted:         {}", self.persisted)?;
        writeln!(f, "  Queued for retry:  {}", self.queued)?;
        writeln!(f, "  Rejected:          {}", self.rejected)?;
        writeln!(f, "  Anomalies:         {}", self.anomalies)?;
        writeln!(f, "  Retried OK:        {}", self.retried)?;
        writeln!(f, "  Stored:            {}", self.stored)?;
        writeln!(f, "  Retry queue size:  {}", self.retry_queue_size)?;
        write!(f, "  Dead letters:      {}", self.dead_letter_count)
    }
}

/// Feed generated batches through `orchestrator`
///
/// The clock advances by `interval` per batch and a retry pass runs after
/// each one, so backoff plays out in simulated time.
pub async fn run_simulation(
    config: &SimulationConfig,
    orchestrator: &IngestionOrchestrator,
    store: &MemoryStore,
    clock: &ManualClock,
) -> SimulationSummary {
    let mut simulator = Simulator::new(config.seed);
    let mut summary = SimulationSummary::default();

    for batch_index in 0..config.batches {
        store.set_available(!config.outage.contains(&batch_index));

        let batch = simulator.next_batch(clock.now());
        summary.readings += batch.len();
        for resp in orchestrator.handle_batch(batch).await.results {
            match resp.status {
                IngestStatus::Success => summary.persisted += 1,
                IngestStatus::QueuedForRetry => summary.queued += 1,
                IngestStatus::Rejected => summary.rejected += 1,
            }
            if resp.is_anomaly == Some(true) {
                summary.anomalies += 1;
            }
        }

        clock.advance(config.interval);
        summary.retried += orchestrator.process_retries().await.delivered;
    }

    store.set_available(true);
    summary.stored = store.len();
    summary.retry_queue_size = orchestrator.retry_queue_size();
    summary.dead_letter_count = orchestrator.dead_letter_count();

    tracing::info!(
        readings = summary.readings,
        queued = summary.queued,
        anomalies = summary.anomalies,
        "simulation finished"
    );
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use fms_core::ServiceConfig;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn same_seed_same_readings() {
        let mut a = Simulator::new(7);
        let mut b = Simulator::new(7);
        for _ in 0..20 {
            assert_eq!(a.next_batch(start()), b.next_batch(start()));
        }
    }

    #[test]
    fn readings_stay_inside_widened_band() {
        let mut sim = Simulator::new(1);
        let profiles = SensorProfile::fermenter_defaults();
        for _ in 0..500 {
            for (raw, profile) in sim.next_batch(start()).iter().zip(&profiles) {
                assert_eq!(raw.tag, profile.tag);
                assert!(raw.value >= profile.normal.min - profile.variation);
                assert!(raw.value <= profile.normal.max + profile.variation);
            }
        }
    }

    #[test]
    fn certain_anomaly_moves_far_from_base() {
        let profile = SensorProfile::new("fermenter_ph", 7.0, 0.3, Bounds::new(6.5, 7.5), 1.0);
        let mut sim = Simulator::with_profiles(3, vec![profile]);
        for _ in 0..50 {
            let value = sim.next_batch(start())[0].value;
            // sine and noise stay within 0.9 * variation of base
            assert!((value - 7.0).abs() > 0.3, "value {value} too close to base");
        }
    }

    #[tokio::test]
    async fn outage_readings_are_queued_then_delivered() {
        let dir = TempDir::new().unwrap();
        let config = ServiceConfig::default().with_dead_letter_path(dir.path().join("dlq.jsonl"));
        let store = Arc::new(MemoryStore::new(config.registry().names()));
        let clock = Arc::new(ManualClock::new(start()));
        let orchestrator =
            IngestionOrchestrator::open_with_clock(&config, store.clone(), clock.clone())
                .await
                .unwrap();

        let sim = SimulationConfig {
            batches: 30,
            outage: 5..8,
            ..SimulationConfig::default()
        };
        let summary = run_simulation(&sim, &orchestrator, &store, &clock).await;

        assert_eq!(summary.readings, 90);
        assert_eq!(summary.queued, 9);
        assert_eq!(summary.rejected, 0);
        assert_eq!(summary.persisted + summary.queued, 90);
        assert_eq!(summary.retried, 9);
        assert_eq!(summary.stored, 90);
        assert_eq!(summary.retry_queue_size, 0);
        assert_eq!(summary.dead_letter_count, 0);
        assert_eq!(clock.now(), start() + Duration::seconds(30));
    }
}
