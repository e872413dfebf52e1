//! Supervision for background work.
//!
//! Short-lived work (transfer processing, mailbox flushes) and long-running
//! services (the expiry sweep) are tracked separately so callers can wait for
//! the former to settle without stopping the latter.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::Instrument;

#[derive(Debug, Clone, Default)]
pub struct Supervisor {
    work: TaskTracker,
    services: TaskTracker,
    shutdown: CancellationToken,
}

impl Supervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token cancelled on shutdown or when cancelled directly.
    pub fn child_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Spawn a unit of background work. Must be called inside a tokio runtime.
    pub fn spawn<F>(&self, name: &'static str, task: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.work
            .spawn(task.instrument(tracing::debug_span!("task", name = name)))
    }

    /// Run `tick` every `interval` until shutdown.
    pub fn spawn_periodic<F>(&self, name: &'static str, interval: Duration, mut tick: F) -> JoinHandle<()>
    where
        F: FnMut() + Send + 'static,
    {
        let shutdown = self.shutdown.clone();
        let service = async move {
            let mut timer = tokio::time::interval(interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            timer.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::debug!("Service stopping");
                        break;
                    }
                    _ = timer.tick() => tick(),
                }
            }
        };
        self.services
            .spawn(service.instrument(tracing::debug_span!("service", name = name)))
    }

    /// Wait until all in-flight work, including work it spawns, has finished.
    pub async fn drain(&self) {
        self.work.close();
        self.work.wait().await;
        self.work.reopen();
    }

    /// Cancel everything and wait for tasks to observe it.
    pub async fn shutdown(&self) {
        tracing::info!("Supervisor shutting down");
        self.shutdown.cancel();
        self.work.close();
        self.services.close();
        self.work.wait().await;
        self.services.wait().await;
    }
}
