use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::coordinator::ExecutionCoordinator;

pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(10);

/// Fixed-interval driver for the coordinator
///
/// Each tick runs a sweep on its own task so a slow exchange never delays
/// the timer; the coordinator drops a tick while the previous sweep is still
/// running. `stop` waits for an in-flight sweep instead of aborting it.
pub struct Scheduler {
    coordinator: Arc<ExecutionCoordinator>,
    interval: Duration,
    cancel: CancellationToken,
    sweeps: TaskTracker,
    handle: Option<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(coordinator: Arc<ExecutionCoordinator>, interval: Duration) -> Self {
        Self {
            coordinator,
            interval,
            cancel: CancellationToken::new(),
            sweeps: TaskTracker::new(),
            handle: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Start ticking; the first sweep runs immediately
    pub fn start(&mut self) {
        if self.handle.is_some() {
            tracing::warn!("Scheduler already running");
            return;
        }

        let coordinator = self.coordinator.clone();
        let cancel = self.cancel.clone();
        let sweeps = self.sweeps.clone();
        let period = self.interval;

        tracing::info!("Trigger scheduler started (every {:?})", period);

        self.handle = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        tracing::debug!("Scheduler cancelled");
                        break;
                    }
                    _ = interval.tick() => {
                        let coordinator = coordinator.clone();
                        sweeps.spawn(async move {
                            coordinator.tick().await;
                        });
                    }
                }
            }
        }));
    }

    /// Stop ticking and wait for any running sweep to finish
    pub async fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };

        self.cancel.cancel();
        if let Err(e) = handle.await {
            tracing::error!("Scheduler loop exited abnormally: {}", e);
        }

        self.sweeps.close();
        self.sweeps.wait().await;
        tracing::info!("Trigger scheduler stopped");
    }
}
