//! In-process measurement backend
//!
//! Reference [`MeasurementSink`] used by the server and the simulator.
//! It can be switched off to simulate a database outage.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fms_common::{Measurement, MeasurementId, MeasurementSink, SinkError};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Most rows a single query returns
pub const QUERY_LIMIT: usize = 1000;

/// A persisted measurement
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredMeasurement {
    /// Backend id, increasing from 1
    pub id: MeasurementId,
    /// The fact
    #[serde(flatten)]
    pub measurement: Measurement,
}

/// Filter for [`MemoryStore::query`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeasurementQuery {
    /// Only this tag
    pub tag: Option<String>,
    /// Not before (inclusive)
    pub from: Option<DateTime<Utc>>,
    /// Not after (inclusive)
    pub to: Option<DateTime<Utc>>,
    /// Only anomalous rows
    pub anomalies_only: bool,
}

impl MeasurementQuery {
    /// All measurements
    #[inline]
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Anomalous measurements only
    #[inline]
    #[must_use]
    pub fn anomalies() -> Self {
        Self {
            anomalies_only: true,
            ..Self::default()
        }
    }

    /// Restrict to one tag
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Restrict to a time range
    #[must_use]
    pub fn between(mut self, from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> Self {
        self.from = from;
        self.to = to;
        self
    }

    fn matches(&self, m: &Measurement) -> bool {
        self.tag.as_deref().map_or(true, |t| m.tag == t)
            && self.from.map_or(true, |from| m.timestamp >= from)
            && self.to.map_or(true, |to| m.timestamp <= to)
            && (!self.anomalies_only || m.is_anomaly)
    }
}

/// Aggregate counts over everything stored
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreTotals {
    /// Rows stored
    pub measurements: u64,
    /// Rows flagged anomalous
    pub anomalies: u64,
    /// Distinct tags seen
    pub tags: usize,
}

/// Measurement table held in memory
#[derive(Debug)]
pub struct MemoryStore {
    rows: RwLock<Vec<StoredMeasurement>>,
    next_id: AtomicU64,
    online: AtomicBool,
    known_tags: Vec<String>,
}

impl MemoryStore {
    /// Create an empty, reachable store
    #[must_use]
    pub fn new(known_tags: Vec<String>) -> Self {
        Self {
            rows: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            online: AtomicBool::new(true),
            known_tags,
        }
    }

    /// Switch the backend on or off
    pub fn set_available(&self, available: bool) {
        let was = self.online.swap(available, Ordering::SeqCst);
        if was != available {
            tracing::info!(available, "measurement store availability changed");
        }
    }

    /// Check if writes are currently accepted
    #[inline]
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Matching rows, newest first, at most [`QUERY_LIMIT`]
    #[must_use]
    pub fn query(&self, query: &MeasurementQuery) -> Vec<StoredMeasurement> {
        let rows = self.rows.read();
        let mut hits: Vec<StoredMeasurement> = rows
            .iter()
            .filter(|row| query.matches(&row.measurement))
            .cloned()
            .collect();
        drop(rows);

        hits.sort_by(|a, b| {
            b.measurement
                .timestamp
                .cmp(&a.measurement.timestamp)
                .then(b.id.cmp(&a.id))
        });
        hits.truncate(QUERY_LIMIT);
        hits
    }

    /// Distinct tags stored, or the configured tags when nothing is stored
    #[must_use]
    pub fn tags(&self) -> Vec<String> {
        let seen: BTreeSet<String> = self
            .rows
            .read()
            .iter()
            .map(|row| row.measurement.tag.clone())
            .collect();
        if seen.is_empty() {
            self.known_tags.clone()
        } else {
            seen.into_iter().collect()
        }
    }

    /// Aggregate counts
    #[must_use]
    pub fn totals(&self) -> StoreTotals {
        let rows = self.rows.read();
        let tags: BTreeSet<&str> = rows.iter().map(|r| r.measurement.tag.as_str()).collect();
        StoreTotals {
            measurements: rows.len() as u64,
            anomalies: rows.iter().filter(|r| r.measurement.is_anomaly).count() as u64,
            tags: tags.len(),
        }
    }

    /// Rows stored
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    /// Check if nothing is stored
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

#[async_trait]
impl MeasurementSink for MemoryStore {
    async fn write(&self, measurement: &Measurement) -> Result<MeasurementId, SinkError> {
        if !self.is_available() {
            return Err(SinkError::Unavailable("measurement store offline".to_string()));
        }

        let mut rows = self.rows.write();
        let id = MeasurementId(self.next_id.fetch_add(1, Ordering::SeqCst));
        rows.push(StoredMeasurement {
            id,
            measurement: measurement.clone(),
        });
        Ok(id)
    }

    async fn ping(&self) -> Result<(), SinkError> {
        if self.is_available() {
            Ok(())
        } else {
            Err(SinkError::Unavailable("measurement store offline".to_string()))
        }
    }
}
