//! FMS Core - ingestion pipeline for the fermenter monitoring service
//!
//! Ties the workspace together:
//! - [`ServiceConfig`]: TOML configuration with defaults
//! - [`validate`]: boundary checks on raw readings
//! - [`IngestState`]: per-measurement state machine
//! - [`IngestionOrchestrator`]: validate, classify, persist or queue
//! - [`MemoryStore`]: reference measurement backend
//!
//! # Example
//!
//! ```rust,no_run
//! use fms_core::{IngestionOrchestrator, MemoryStore, ServiceConfig};
//! use fms_common::RawMeasurement;
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), fms_core::ServiceError> {
//! let config = ServiceConfig::default();
//! let store = Arc::new(MemoryStore::new(config.registry().names()));
//!
//! let orchestrator = IngestionOrchestrator::open(&config, store).await?;
//! orchestrator.start().await;
//!
//! let resp = orchestrator
//!     .handle(RawMeasurement::new("2024-01-01T12:00:00Z", "fermenter_temp", 37.2))
//!     .await;
//! assert!(resp.is_accepted());
//!
//! orchestrator.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod report;
pub mod state;
pub mod store;
pub mod validation;

pub use config::{DeliveryConfig, HealthConfig, ServiceConfig};
pub use error::{ConfigError, ServiceError, TransitionError, ValidationError};
pub use orchestrator::IngestionOrchestrator;
pub use report::{
    BatchResponse, HealthReport, HealthStatus, IngestResponse, IngestStatus, QueueStatus,
    StatsReport,
};
pub use state::{allowed_transitions, validate_transition, IngestState};
pub use store::{MeasurementQuery, MemoryStore, StoreTotals, StoredMeasurement, QUERY_LIMIT};
pub use validation::{validate, ValidatedMeasurement};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
