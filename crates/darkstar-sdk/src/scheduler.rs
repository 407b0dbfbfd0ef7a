//! Periodic maintenance driver.
//!
//! The sweep itself is a plain synchronous call on [`Darkstar`]; this module
//! only decides when to make it. Each tick reads the node's clock and runs
//! the sweep on the blocking pool so storage I/O never stalls the runtime.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::error::{SdkError, SdkResult};
use crate::node::Darkstar;

/// Spawns the background sweep loop.
pub struct SweepScheduler;

impl SweepScheduler {
    /// Start sweeping `node` every `interval`. The first sweep runs
    /// immediately. Must be called from within a tokio runtime.
    pub fn spawn(node: Arc<Darkstar>, interval: Duration) -> SdkResult<SchedulerHandle> {
        if interval.is_zero() {
            return Err(SdkError::Scheduler("interval must be positive".into()));
        }
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut runs = 0u64;
            info!(interval_ms = interval.as_millis() as u64, "sweep scheduler started");

            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {
                        let now = node.clock().now_wall();
                        let worker = Arc::clone(&node);
                        match tokio::task::spawn_blocking(move || worker.sweep(now)).await {
                            Ok(report) if report.is_clean() => debug!(run = runs, ?report, "scheduled sweep"),
                            Ok(report) => warn!(
                                run = runs,
                                failed = report.errors.len(),
                                "scheduled sweep finished with errors"
                            ),
                            Err(e) => error!(run = runs, error = %e, "sweep task panicked"),
                        }
                        runs += 1;
                    }
                }
            }

            info!(runs, "sweep scheduler stopped");
            runs
        });

        Ok(SchedulerHandle {
            stop: Some(stop_tx),
            task,
        })
    }
}

/// Handle to a running [`SweepScheduler`]. Dropping it also stops the loop.
pub struct SchedulerHandle {
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<u64>,
}

impl SchedulerHandle {
    /// Stop the loop after any in-flight sweep and return how many sweeps ran.
    pub async fn stop(mut self) -> SdkResult<u64> {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        (&mut self.task)
            .await
            .map_err(|e| SdkError::Scheduler(e.to_string()))
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl std::fmt::Debug for SchedulerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerHandle")
            .field("finished", &self.task.is_finished())
            .finish()
    }
}
