//! FMS Common - shared vocabulary for the fermenter monitoring service
//!
//! Every other crate in the workspace speaks in these types:
//! - [`Measurement`] and its raw ingestion shape [`RawMeasurement`]
//! - [`TagSpec`] / [`TagRegistry`] describing the known sensors
//! - [`Clock`] so time can be injected and driven by tests
//! - [`MeasurementSink`], the persistence backend seam
//!
//! # Example
//!
//! ```rust
//! use fms_common::{Measurement, TagRegistry};
//! use chrono::Utc;
//!
//! let registry = TagRegistry::fermenter_defaults();
//! assert!(registry.contains("fermenter_temp"));
//!
//! let m = Measurement::new(Utc::now(), "fermenter_temp", 37.2, false);
//! assert_eq!(m.tag, "fermenter_temp");
//! ```

pub mod clock;
pub mod error;
pub mod measurement;
pub mod sink;
pub mod tag;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{SinkError, TimestampError};
pub use measurement::{parse_timestamp, Measurement, MeasurementId, RawMeasurement};
pub use sink::MeasurementSink;
pub use tag::{Bounds, TagRegistry, TagSpec};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
