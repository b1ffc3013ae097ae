//! Streaming detector
//!
//! Windows live in a `DashMap<tag, Arc<Mutex<TagWindow>>>`: the map shard
//! lock is held only long enough to fetch or create a tag's window, and the
//! per-tag mutex makes read-then-insert atomic for that tag alone. Calls for
//! different tags never wait on each other's mutex.

use crate::window::{TagWindow, WindowStats};
use dashmap::DashMap;
use fms_common::{Bounds, TagRegistry};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Standard deviations below this are treated as zero
const MIN_STDDEV: f64 = 1e-6;

/// Detector tuning
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Values kept per tag
    pub window_size: usize,
    /// z-score above which a value is anomalous
    pub z_threshold: f64,
    /// History required before the statistical rule applies
    pub min_samples: usize,
}

impl DetectorConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With window size
    #[inline]
    #[must_use]
    pub fn with_window_size(mut self, window_size: usize) -> Self {
        self.window_size = window_size;
        self
    }

    /// With z-score threshold
    #[inline]
    #[must_use]
    pub fn with_z_threshold(mut self, z_threshold: f64) -> Self {
        self.z_threshold = z_threshold;
        self
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            window_size: 50,
            z_threshold: 3.0,
            min_samples: 10,
        }
    }
}

/// Outcome of classifying one value
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    /// Either rule fired
    pub is_anomaly: bool,
    /// Value fell outside the tag's threshold bounds
    pub threshold_breach: bool,
    /// z-score against the pre-insertion window, when computable
    pub z_score: Option<f64>,
}

/// Per-tag rolling-window anomaly detector
#[derive(Debug)]
pub struct StreamingDetector {
    config: DetectorConfig,
    thresholds: HashMap<String, Bounds>,
    windows: DashMap<String, Arc<Mutex<TagWindow>>>,
}

impl StreamingDetector {
    /// Create a detector using the threshold bounds from `registry`
    #[must_use]
    pub fn new(config: DetectorConfig, registry: &TagRegistry) -> Self {
        let thresholds = registry
            .iter()
            .map(|spec| (spec.name.clone(), spec.threshold))
            .collect();

        Self {
            config,
            thresholds,
            windows: DashMap::new(),
        }
    }

    /// Classify `value` for `tag` and record it in the tag's window
    #[inline]
    pub fn classify(&self, tag: &str, value: f64) -> bool {
        self.evaluate(tag, value).is_anomaly
    }

    /// Classify with rule details, recording `value` in the window
    pub fn evaluate(&self, tag: &str, value: f64) -> Classification {
        let window = self.window_for(tag);
        let mut window = window.lock();

        let z_score = self.z_score(&window, value);
        let statistical = z_score.is_some_and(|z| z > self.config.z_threshold);
        let threshold_breach = self
            .thresholds
            .get(tag)
            .is_some_and(|bounds| !bounds.contains(value));

        window.push(value);
        drop(window);

        let is_anomaly = statistical || threshold_breach;
        if is_anomaly {
            tracing::debug!(tag, value, ?z_score, threshold_breach, "anomaly detected");
        }

        Classification {
            is_anomaly,
            threshold_breach,
            z_score,
        }
    }

    /// Number of values currently held for `tag`
    #[must_use]
    pub fn window_len(&self, tag: &str) -> usize {
        self.windows.get(tag).map_or(0, |w| w.value().lock().len())
    }

    /// Statistics of the current window for `tag`
    #[must_use]
    pub fn window_stats(&self, tag: &str) -> Option<WindowStats> {
        self.windows.get(tag).and_then(|w| w.value().lock().stats())
    }

    /// Number of tags with a window
    #[inline]
    #[must_use]
    pub fn tracked_tags(&self) -> usize {
        self.windows.len()
    }

    /// Get configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    fn window_for(&self, tag: &str) -> Arc<Mutex<TagWindow>> {
        if let Some(existing) = self.windows.get(tag) {
            return Arc::clone(existing.value());
        }

        let capacity = self.config.window_size;
        self.windows
            .entry(tag.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(TagWindow::new(capacity))))
            .value()
            .clone()
    }

    fn z_score(&self, window: &TagWindow, value: f64) -> Option<f64> {
        if window.len() < self.config.min_samples {
            return None;
        }
        let stats = window.stats()?;
        if stats.stddev < MIN_STDDEV {
            return None;
        }
        Some((value - stats.mean).abs() / stats.stddev)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fms_common::TagSpec;
    use proptest::prelude::*;

    fn detector() -> StreamingDetector {
        StreamingDetector::new(DetectorConfig::default(), &TagRegistry::fermenter_defaults())
    }

    /// Tag with thresholds wide enough that only the statistical rule matters
    fn open_detector() -> StreamingDetector {
        let registry = TagRegistry::new(vec![TagSpec::new(
            "probe",
            Bounds::new(-1.0e9, 1.0e9),
            Bounds::new(-1.0e9, 1.0e9),
        )]);
        StreamingDetector::new(DetectorConfig::default(), &registry)
    }

    fn feed_alternating(d: &StreamingDetector, tag: &str, low: f64, high: f64, n: usize) {
        for i in 0..n {
            d.classify(tag, if i % 2 == 0 { low } else { high });
        }
    }

    #[test]
    fn threshold_rule_fires_without_history() {
        let d = detector();
        assert!(d.classify("fermenter_temp", 46.0));
        assert!(d.classify("fermenter_ph", 5.5));
        assert!(!d.classify("agitator_rpm", 450.0));
    }

    #[test]
    fn spike_after_stable_history_is_anomalous() {
        let d = detector();
        // mean 37.0, population stddev 0.5
        feed_alternating(&d, "fermenter_temp", 36.5, 37.5, 50);

        let c = d.evaluate("fermenter_temp", 46.0);
        assert!(c.is_anomaly);
        assert!(c.threshold_breach);
        let z = c.z_score.unwrap();
        assert!((z - 18.0).abs() < 1e-9, "z = {z}");
    }

    #[test]
    fn statistical_rule_fires_inside_thresholds() {
        let d = detector();
        feed_alternating(&d, "fermenter_temp", 36.5, 37.5, 50);

        // 39.0 is inside [35, 45] but four sigma from the mean
        let c = d.evaluate("fermenter_temp", 39.0);
        assert!(c.is_anomaly);
        assert!(!c.threshold_breach);
    }

    #[test]
    fn statistical_rule_needs_min_samples() {
        let short = open_detector();
        feed_alternating(&short, "probe", 1.0, 1.1, 9);
        let c = short.evaluate("probe", 1_000.0);
        assert!(c.z_score.is_none());
        assert!(!c.is_anomaly);

        let enough = open_detector();
        feed_alternating(&enough, "probe", 1.0, 1.1, 10);
        let c = enough.evaluate("probe", 1_000.0);
        assert!(c.z_score.is_some());
        assert!(c.is_anomaly);
    }

    #[test]
    fn zero_stddev_disables_statistical_rule() {
        let d = open_detector();
        for _ in 0..20 {
            d.classify("probe", 5.0);
        }
        let c = d.evaluate("probe", 500.0);
        assert!(c.z_score.is_none());
        assert!(!c.is_anomaly);
    }

    #[test]
    fn classification_uses_pre_insertion_window() {
        let d = open_detector();
        feed_alternating(&d, "probe", 10.0, 11.0, 10);
        let before = d.window_stats("probe").unwrap();

        let c = d.evaluate("probe", 100.0);
        let expected = (100.0 - before.mean).abs() / before.stddev;
        assert!((c.z_score.unwrap() - expected).abs() < 1e-9);
        assert_eq!(d.window_len("probe"), 11);
    }

    #[test]
    fn windows_are_created_lazily_per_tag() {
        let d = detector();
        assert_eq!(d.tracked_tags(), 0);
        d.classify("fermenter_ph", 7.0);
        d.classify("agitator_rpm", 400.0);
        d.classify("fermenter_ph", 7.1);
        assert_eq!(d.tracked_tags(), 2);
        assert_eq!(d.window_len("fermenter_ph"), 2);
        assert_eq!(d.window_len("fermenter_temp"), 0);
    }

    #[test]
    fn concurrent_classification_keeps_windows_consistent() {
        let d = Arc::new(detector());
        let tags = ["fermenter_temp", "fermenter_ph", "agitator_rpm"];

        std::thread::scope(|scope| {
            for t in 0..6 {
                let d = Arc::clone(&d);
                let tag = tags[t % tags.len()];
                scope.spawn(move || {
                    for i in 0..500 {
                        d.classify(tag, f64::from(i % 7));
                    }
                });
            }
        });

        for tag in tags {
            assert_eq!(d.window_len(tag), 50);
        }
    }

    proptest! {
        #[test]
        fn prop_window_never_exceeds_capacity(
            values in prop::collection::vec(-1.0e6f64..1.0e6, 1..200),
            capacity in 1usize..60,
        ) {
            let d = StreamingDetector::new(
                DetectorConfig::default().with_window_size(capacity),
                &TagRegistry::fermenter_defaults(),
            );
            for v in &values {
                d.classify("fermenter_temp", *v);
                prop_assert!(d.window_len("fermenter_temp") <= capacity);
            }
            prop_assert_eq!(d.window_len("fermenter_temp"), values.len().min(capacity));
        }

        #[test]
        fn prop_short_history_only_threshold_fires(
            values in prop::collection::vec(0.0f64..100.0, 1..10),
        ) {
            let d = detector();
            let bounds = Bounds::new(35.0, 45.0);
            for v in values {
                let c = d.evaluate("fermenter_temp", v);
                prop_assert!(c.z_score.is_none());
                prop_assert_eq!(c.is_anomaly, !bounds.contains(v));
            }
        }
    }
}
