//! FMS Delivery - at-least-once persistence of measurements
//!
//! A measurement whose first write fails is never lost:
//! - [`DeliveryQueue`] retries it with exponential backoff
//! - [`RetryWorker`] drives the queue on a fixed tick
//! - after `max_retries` failed retries it moves to the [`DeadLetterStore`]
//! - [`DeadLetterStore::recover_all`] re-delivers the log at startup
//!
//! # Example
//!
//! ```rust,no_run
//! use fms_delivery::{DeadLetterStore, DeliveryQueue, RetryWorker};
//! # use fms_common::MeasurementSink;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn run(sink: Arc<dyn MeasurementSink>) -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(DeadLetterStore::open("data/failed_measurements.jsonl").await?);
//! let queue = Arc::new(DeliveryQueue::new(sink.clone(), store.clone()));
//!
//! store.recover_all(sink.as_ref(), &queue).await?;
//! let worker = RetryWorker::spawn(queue.clone(), Duration::from_secs(1));
//! // ... ingest ...
//! worker.stop().await?;
//! queue.drain_to_dead_letter().await;
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod dead_letter;
pub mod error;
pub mod queue;
pub mod record;
pub mod recovery;
pub mod worker;

pub use backoff::BackoffPolicy;
pub use dead_letter::{Compaction, DeadLetterStore};
pub use error::{DeadLetterError, RecordParseError};
pub use queue::{DeliveryQueue, DeliveryStats, DrainReport, RetryItem, TickReport};
pub use record::{CorruptLine, DeadLetterRecord, LogScan};
pub use recovery::RecoveryReport;
pub use worker::RetryWorker;
