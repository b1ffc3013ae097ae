//! FMS Detector - streaming anomaly classification per sensor tag
//!
//! Each tag owns a bounded FIFO window of recent values. A new value is
//! anomalous when either rule fires:
//! 1. **Threshold**: the value lies outside the tag's configured bounds
//! 2. **Statistical**: with enough history, its z-score against the window
//!    (taken *before* the value is inserted) exceeds the configured limit
//!
//! # Example
//!
//! ```rust
//! use fms_common::TagRegistry;
//! use fms_detector::{DetectorConfig, StreamingDetector};
//!
//! let detector = StreamingDetector::new(DetectorConfig::default(), &TagRegistry::fermenter_defaults());
//!
//! // Above the 45.0 threshold: anomalous even with no history
//! assert!(detector.classify("fermenter_temp", 46.0));
//! assert_eq!(detector.window_len("fermenter_temp"), 1);
//! ```

pub mod detector;
pub mod window;

pub use detector::{Classification, DetectorConfig, StreamingDetector};
pub use window::{TagWindow, WindowStats};
