//! Supervision of the proxy's periodic background tasks
//!
//! Tasks are tracked by name. All of them observe one cancellation token and
//! can be joined under a deadline.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Tracks named periodic tasks sharing one shutdown signal
pub struct TaskSupervisor {
    /// Map of task name -> JoinHandle
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
    shutdown: CancellationToken,
}

impl TaskSupervisor {
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Run `tick` every `period` until cancelled; the first tick fires one
    /// period after spawning. A tick in flight is abandoned on cancellation.
    ///
    /// Spawning under an existing name aborts the previous task.
    pub fn spawn_periodic<F, Fut>(&self, name: &str, period: Duration, mut tick: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let shutdown = self.shutdown.clone();
        let task_name = name.to_string();

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        tokio::select! {
                            _ = shutdown.cancelled() => break,
                            _ = tick() => {}
                        }
                    }
                }
            }

            debug!(task = %task_name, "Background task stopped");
        });

        if let Ok(mut tasks) = self.tasks.lock() {
            // If there was a previous task, abort it first
            if let Some(old_handle) = tasks.insert(name.to_string(), handle) {
                old_handle.abort();
            }
        }
    }

    /// Signal every task to stop
    pub fn cancel(&self) {
        self.shutdown.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Names of tasks not yet joined
    pub fn task_names(&self) -> Vec<String> {
        self.tasks
            .lock()
            .map(|tasks| {
                let mut names: Vec<String> = tasks.keys().cloned().collect();
                names.sort();
                names
            })
            .unwrap_or_default()
    }

    /// Wait up to `deadline` for every task to finish.
    ///
    /// Returns `false` on timeout; unfinished tasks stay tracked so a later
    /// call can wait for them again.
    pub async fn join(&self, deadline: Duration) -> bool {
        let mut pending: Vec<(String, JoinHandle<()>)> = match self.tasks.lock() {
            Ok(mut tasks) => tasks.drain().collect(),
            Err(_) => return true,
        };

        let waited = tokio::time::timeout(deadline, async {
            for (name, handle) in pending.iter_mut() {
                if let Err(e) = handle.await {
                    if e.is_panic() {
                        warn!(task = %name, "Background task panicked");
                    }
                }
            }
        })
        .await;

        if waited.is_ok() {
            return true;
        }

        if let Ok(mut tasks) = self.tasks.lock() {
            for (name, handle) in pending {
                if !handle.is_finished() {
                    tasks.entry(name).or_insert(handle);
                }
            }
        }
        false
    }

    /// Abort every tracked task without waiting
    pub fn abort_all(&self) {
        if let Ok(mut tasks) = self.tasks.lock() {
            for (_, handle) in tasks.drain() {
                handle.abort();
            }
        }
    }
}

impl Default for TaskSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_first_tick_after_one_period() {
        let supervisor = TaskSupervisor::new();
        let ticks = Arc::new(AtomicUsize::new(0));

        let counter = ticks.clone();
        supervisor.spawn_periodic("counter", Duration::from_secs(10), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_then_join() {
        let supervisor = TaskSupervisor::new();
        supervisor.spawn_periodic("a", Duration::from_secs(1), || async {});
        supervisor.spawn_periodic("b", Duration::from_secs(1), || async {});
        assert_eq!(supervisor.task_names(), vec!["a".to_string(), "b".to_string()]);

        supervisor.cancel();
        assert!(supervisor.join(Duration::from_secs(1)).await);
        assert!(supervisor.task_names().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_long_tick() {
        let supervisor = TaskSupervisor::new();
        supervisor.spawn_periodic("slow", Duration::from_secs(1), || async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });

        // Let the first tick start
        tokio::time::sleep(Duration::from_secs(2)).await;

        supervisor.cancel();
        assert!(supervisor.join(Duration::from_secs(1)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_times_out_and_can_retry() {
        let supervisor = TaskSupervisor::new();
        supervisor.spawn_periodic("ticker", Duration::from_secs(1), || async {});

        // Not cancelled, so the task never finishes
        assert!(!supervisor.join(Duration::from_secs(5)).await);
        assert_eq!(supervisor.task_names(), vec!["ticker".to_string()]);

        supervisor.cancel();
        assert!(supervisor.join(Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn test_replacing_task() {
        let supervisor = TaskSupervisor::new();
        supervisor.spawn_periodic("sweep", Duration::from_secs(10), || async {});
        supervisor.spawn_periodic("sweep", Duration::from_secs(10), || async {});

        // Should still be only one task
        assert_eq!(supervisor.task_names().len(), 1);
        supervisor.abort_all();
        assert!(supervisor.task_names().is_empty());
    }
}
