//! Background retry worker

use crate::queue::DeliveryQueue;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::MissedTickBehavior;

/// Shortest accepted tick
const MIN_TICK: Duration = Duration::from_millis(1);

/// Long-lived task running [`DeliveryQueue::process_due`] on a fixed tick
///
/// Started and stopped explicitly. Stopping lets a pass that is already
/// running finish; it is never aborted mid-write.
#[derive(Debug)]
pub struct RetryWorker {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl RetryWorker {
    /// Spawn the worker on the current runtime
    #[must_use]
    pub fn spawn(queue: Arc<DeliveryQueue>, tick: Duration) -> Self {
        let (shutdown, mut stop) = watch::channel(false);
        let tick = tick.max(MIN_TICK);

        let handle = tokio::spawn(async move {
            tracing::info!(tick_ms = tick.as_millis(), "retry worker started");
            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = stop.changed() => break,
                    _ = interval.tick() => {
                        queue.process_due().await;
                    }
                }
            }

            tracing::info!(queued = queue.size(), "retry worker stopped");
        });

        Self { shutdown, handle }
    }

    /// Signal the worker and wait for it to exit
    ///
    /// # Errors
    /// Returns the join error if the worker task panicked.
    pub async fn stop(self) -> Result<(), JoinError> {
        // a send error only means the task already exited
        let _ = self.shutdown.send(true);
        self.handle.await
    }

    /// Check if the task has exited
    #[inline]
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}
