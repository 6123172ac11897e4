//! Keyed handle pool with idle eviction

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

struct Pooled<T> {
    handle: T,
    last_used: Instant,
}

/// At most one handle per key; callers borrow clones.
pub struct IdlePool<T> {
    entries: DashMap<String, Pooled<T>>,
}

impl<T: Clone> IdlePool<T> {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Borrow the handle for `key`, creating it with `make` on first use
    pub fn get_or_try_insert<E>(
        &self,
        key: &str,
        make: impl FnOnce() -> Result<T, E>,
    ) -> Result<T, E> {
        let now = Instant::now();
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                let pooled = entry.get_mut();
                pooled.last_used = now;
                debug!(key = %key, "Reusing pooled handle");
                Ok(pooled.handle.clone())
            }
            Entry::Vacant(entry) => {
                let handle = make()?;
                entry.insert(Pooled {
                    handle: handle.clone(),
                    last_used: now,
                });
                debug!(key = %key, "Created pooled handle");
                Ok(handle)
            }
        }
    }

    /// Drop handles unused for at least `threshold`
    pub fn evict_idle(&self, threshold: Duration) -> usize {
        let now = Instant::now();
        let mut evicted = 0;

        self.entries.retain(|key, pooled| {
            let keep = now.saturating_duration_since(pooled.last_used) < threshold;
            if !keep {
                debug!(key = %key, "Evicting idle handle");
                evicted += 1;
            }
            keep
        });

        evicted
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

impl<T: Clone> Default for IdlePool<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Evict idle handles every `period` until `shutdown` fires.
///
/// Outside a tokio runtime no sweep runs and eviction is left to explicit
/// `evict_idle` calls.
pub(crate) fn spawn_idle_sweep<T>(
    name: &'static str,
    pool: Arc<IdlePool<T>>,
    period: Duration,
    threshold: Duration,
    shutdown: CancellationToken,
) where
    T: Clone + Send + Sync + 'static,
{
    let Ok(runtime) = Handle::try_current() else {
        warn!(pool = name, "No tokio runtime, idle sweep disabled");
        return;
    };

    runtime.spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!(pool = name, "Idle sweep stopped");
                    break;
                }
                _ = ticker.tick() => {
                    let evicted = pool.evict_idle(threshold);
                    if evicted > 0 {
                        debug!(pool = name, evicted, remaining = pool.len(), "Idle handles evicted");
                    }
                }
            }
        }
    });
}
