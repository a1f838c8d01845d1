// src/services/task_supervisor.rs
use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::errors::MarketplaceError as AppError;

/// Owns the background timers and stops them together.
pub struct TaskSupervisor {
    shutdown_token: CancellationToken,
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl fmt::Debug for TaskSupervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<_> = self.handles.iter().map(|(name, _)| *name).collect();
        f.debug_struct("TaskSupervisor")
            .field("tasks", &names)
            .field("shutdown_cancelled", &self.shutdown_token.is_cancelled())
            .finish()
    }
}

impl TaskSupervisor {
    pub fn new() -> Self {
        Self {
            shutdown_token: CancellationToken::new(),
            handles: Vec::new(),
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Cancelled with the supervisor, but cancelling it leaves the supervisor running.
    pub fn child_token(&self) -> CancellationToken {
        self.shutdown_token.child_token()
    }

    pub fn task_count(&self) -> usize {
        self.handles.len()
    }

    /// Runs `job` every `period`, first tick one period from now.
    /// A failed run is logged and the next tick still fires.
    pub fn spawn_periodic<F, Fut>(&mut self, name: &'static str, period: Duration, mut job: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), AppError>> + Send + 'static,
    {
        let token = self.shutdown_token.child_token();
        // interval_at panics on a zero period
        let period = period.max(Duration::from_millis(1));

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::debug!("Task {} started (every {:?})", name, period);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = job().await {
                            tracing::error!("Task {} failed: {}", name, e);
                        }
                    }
                }
            }

            tracing::debug!("Task {} stopped", name);
        });

        self.handles.push((name, handle));
    }

    /// Cancels every task and waits for them to finish.
    pub async fn shutdown(self) {
        self.shutdown_token.cancel();
        for (name, handle) in self.handles {
            if let Err(e) = handle.await {
                tracing::warn!("Task {} ended abnormally: {}", name, e);
            }
        }
        tracing::info!("Background tasks stopped");
    }
}

impl Default for TaskSupervisor {
    fn default() -> Self {
        Self::new()
    }
}
