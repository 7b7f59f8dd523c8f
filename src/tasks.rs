//! Background task orchestration for node roles.
//!
//! Every periodic duty of a node (heartbeat, membership refresh, replication
//! pull, dead-broker sweep, notification retry, topic sync) runs as a named task
//! in a [`BackgroundTaskRegistry`] owned by whoever started the node.
//!
//! Periodic tasks await each run before waiting for the next tick and skip
//! ticks that were missed meanwhile, so a slow run never overlaps the next one
//! of the same task.
//!
//! # Example
//!
//! ```rust,no_run
//! use herald::tasks::BackgroundTaskRegistry;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut registry = BackgroundTaskRegistry::new();
//!
//!     registry.spawn_periodic("heartbeat", Duration::from_secs(1), |_tick| async {
//!         // send heartbeat
//!     });
//!
//!     registry.shutdown_all().await;
//! }
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Status of a background task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Running,
    /// Task returned or panicked.
    Finished,
}

/// Named background tasks with a shared shutdown signal.
pub struct BackgroundTaskRegistry {
    tasks: HashMap<&'static str, JoinHandle<()>>,
    shutdown_tx: broadcast::Sender<()>,
    shutting_down: bool,
}

impl BackgroundTaskRegistry {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            tasks: HashMap::new(),
            shutdown_tx,
            shutting_down: false,
        }
    }

    /// Spawn a named background task.
    ///
    /// The task is raced against the shutdown signal. Spawning a name that is
    /// already registered aborts the previous instance.
    pub fn spawn<F>(&mut self, name: &'static str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.shutting_down {
            tracing::warn!(task = name, "Ignoring spawn during shutdown");
            return;
        }

        if let Some(old) = self.tasks.remove(name) {
            old.abort();
            tracing::debug!(task = name, "Aborted previous task instance");
        }

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = task => {
                    tracing::debug!(task = name, "Task completed");
                }
                _ = shutdown_rx.recv() => {
                    tracing::debug!(task = name, "Task received shutdown signal");
                }
            }
        });

        tracing::debug!(task = name, "Spawned background task");

        self.tasks.insert(name, handle);
    }

    /// Spawn a task that runs `task(tick)` every `interval`.
    ///
    /// The first run happens immediately. Runs never overlap: a run that
    /// outlasts the interval causes the missed ticks to be skipped.
    pub fn spawn_periodic<F, Fut>(&mut self, name: &'static str, interval: Duration, mut task: F)
    where
        F: FnMut(u64) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        self.spawn(name, async move {
            let mut tick = 0u64;
            let mut timer = tokio::time::interval(interval);
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                timer.tick().await;
                task(tick).await;
                tick = tick.wrapping_add(1);
            }
        });
    }

    /// Abort a single task. Returns false if no task had that name.
    pub fn cancel(&mut self, name: &str) -> bool {
        match self.tasks.remove(name) {
            Some(handle) => {
                handle.abort();
                tracing::debug!(task = name, "Cancelled background task");
                true
            }
            None => false,
        }
    }

    /// (name, status) for every registered task.
    pub fn health_check(&self) -> Vec<(&'static str, TaskStatus)> {
        self.tasks
            .iter()
            .map(|(name, handle)| {
                let status = if handle.is_finished() {
                    TaskStatus::Finished
                } else {
                    TaskStatus::Running
                };
                (*name, status)
            })
            .collect()
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn running_count(&self) -> usize {
        self.tasks
            .values()
            .filter(|handle| !handle.is_finished())
            .count()
    }

    /// Signal every task to stop and wait up to 5s for them.
    pub async fn shutdown_all(&mut self) {
        self.shutdown_all_with_timeout(Duration::from_secs(5)).await;
    }

    /// Signal every task to stop; tasks still running at the deadline are aborted.
    pub async fn shutdown_all_with_timeout(&mut self, timeout: Duration) {
        if self.shutting_down {
            return;
        }
        self.shutting_down = true;

        tracing::info!(
            task_count = self.tasks.len(),
            "Initiating background task shutdown"
        );

        let _ = self.shutdown_tx.send(());

        let deadline = tokio::time::Instant::now() + timeout;

        for (name, handle) in self.tasks.drain() {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());

            if remaining.is_zero() {
                tracing::warn!(task = name, "Aborting task (timeout exceeded)");
                handle.abort();
                continue;
            }

            match tokio::time::timeout(remaining, handle).await {
                Ok(Ok(())) => {
                    tracing::debug!(task = name, "Task shutdown complete");
                }
                Ok(Err(e)) => {
                    tracing::warn!(task = name, error = %e, "Task panicked during shutdown");
                }
                Err(_) => {
                    tracing::warn!(task = name, "Task did not respond to shutdown, aborting");
                }
            }
        }

        tracing::info!("All background tasks shutdown complete");
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down
    }
}

impl Default for BackgroundTaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for BackgroundTaskRegistry {
    fn drop(&mut self) {
        if !self.shutting_down {
            let _ = self.shutdown_tx.send(());
            for (name, handle) in self.tasks.drain() {
                tracing::debug!(task = name, "Aborting task on registry drop");
                handle.abort();
            }
        }
    }
}
