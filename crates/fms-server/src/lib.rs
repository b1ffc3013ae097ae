//! FMS Server - HTTP surface and tooling for the fermenter monitoring service
//!
//! - [`routes`]: warp filters for ingestion, queries, stats and health
//! - [`simulator`]: seeded sensor data and an in-process simulation driver
//! - [`telemetry`]: tracing subscriber setup

pub mod routes;
pub mod simulator;
pub mod telemetry;

pub use routes::{routes, AppState};
pub use simulator::{run_simulation, SensorProfile, SimulationConfig, SimulationSummary, Simulator};
