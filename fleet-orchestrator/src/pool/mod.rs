//! Worker pool management.
//!
//! The pool owns the set of live workers and keeps it filled up to the
//! concurrency ceiling while uncovered work remains. The underlying machines
//! are created, deleted and reset through a [`ComputeProvider`].

mod command;
mod recording;
mod simulated;

pub use command::CommandProvider;
pub use recording::RecordingProvider;
pub use simulated::{SimBehavior, SimulatedFleet};

use crate::error::{ComputeResult, Result};
use crate::watchdog::Watchdog;
use async_trait::async_trait;
use dashmap::DashMap;
use fleet_core::ArmedTimer;
use fleet_types::{ImageClass, WorkerName};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Trait for worker infrastructure backends.
#[async_trait]
pub trait ComputeProvider: Send + Sync {
    /// Create a worker named `name` from `image_class`.
    async fn create(&self, name: &WorkerName, image_class: &ImageClass) -> ComputeResult<()>;

    /// Delete a worker.
    async fn delete(&self, name: &WorkerName) -> ComputeResult<()>;

    /// Return a worker to a clean execution-ready state.
    async fn reset(&self, name: &WorkerName) -> ComputeResult<()>;
}

/// A worker the pool has just created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Launched {
    /// Unique worker name.
    pub name: WorkerName,
    /// Image class it was created from.
    pub image_class: ImageClass,
    /// Timer guarding its first READY.
    pub watchdog: ArmedTimer,
}

/// Lifecycle counters, monotonically increasing.
#[derive(Debug, Default)]
pub struct PoolStats {
    /// Workers created.
    pub launches_total: AtomicU64,
    /// Workers destroyed.
    pub destroys_total: AtomicU64,
    /// Workers reset.
    pub resets_total: AtomicU64,
}

/// The set of live workers and the provider behind them.
pub struct WorkerPool {
    provider: Arc<dyn ComputeProvider>,
    watchdog: Arc<dyn Watchdog>,
    ceiling: usize,
    live: DashMap<WorkerName, ImageClass>,
    replenish_lock: Mutex<()>,
    stats: PoolStats,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("ceiling", &self.ceiling)
            .field("live", &self.live.len())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl WorkerPool {
    /// Create an empty pool holding at most `ceiling` workers.
    pub fn new(provider: Arc<dyn ComputeProvider>, watchdog: Arc<dyn Watchdog>, ceiling: usize) -> Self {
        Self {
            provider,
            watchdog,
            ceiling,
            live: DashMap::new(),
            replenish_lock: Mutex::new(()),
            stats: PoolStats::default(),
        }
    }

    /// Concurrency ceiling.
    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    /// Number of live workers.
    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Number of live workers of one image class.
    pub fn live_of(&self, image_class: &ImageClass) -> usize {
        self.live.iter().filter(|e| e.value() == image_class).count()
    }

    /// Whether `name` is a live worker.
    pub fn is_live(&self, name: &WorkerName) -> bool {
        self.live.contains_key(name)
    }

    /// Lifecycle counters.
    pub fn stats(&self) -> &PoolStats {
        &self.stats
    }

    /// Create one worker of `image_class` and arm its watchdog.
    ///
    /// The name is reserved before the provider is called, so an event from
    /// the new worker is never mistaken for one from a destroyed worker.
    pub async fn launch(&self, image_class: &ImageClass) -> Result<Launched> {
        let name = loop {
            let candidate = WorkerName::generate(image_class);
            if let dashmap::mapref::entry::Entry::Vacant(slot) = self.live.entry(candidate.clone()) {
                slot.insert(image_class.clone());
                break candidate;
            }
        };

        if let Err(e) = self.provider.create(&name, image_class).await {
            self.live.remove(&name);
            tracing::error!(target: "audit", worker = %name, image = %image_class, "launch failed: {}", e);
            return Err(e.into());
        }

        let watchdog = match self.watchdog.arm(&name).await {
            Ok(timer) => timer,
            Err(e) => {
                tracing::error!(target: "audit", worker = %name, "launched without watchdog: {}", e);
                return Err(e.into());
            }
        };

        self.stats.launches_total.fetch_add(1, Ordering::Relaxed);
        tracing::info!(target: "audit", worker = %name, image = %image_class, live = self.live.len(), "worker launched");

        Ok(Launched {
            name,
            image_class: image_class.clone(),
            watchdog,
        })
    }

    /// Delete a worker and cancel its watchdog.
    ///
    /// Destroying a worker that is not live is a no-op.
    pub async fn destroy(&self, name: &WorkerName) -> Result<()> {
        if !self.is_live(name) {
            tracing::debug!("destroy of {} skipped: not live", name);
            return Ok(());
        }

        self.provider.delete(name).await?;
        self.watchdog.disarm(name).await?;
        self.live.remove(name);

        self.stats.destroys_total.fetch_add(1, Ordering::Relaxed);
        tracing::info!(target: "audit", worker = %name, live = self.live.len(), "worker destroyed");
        Ok(())
    }

    /// Reset a worker in place.
    pub async fn reset(&self, name: &WorkerName) -> Result<()> {
        self.provider.reset(name).await?;

        self.stats.resets_total.fetch_add(1, Ordering::Relaxed);
        tracing::info!(target: "audit", worker = %name, "worker reset");
        Ok(())
    }

    /// Launch workers, round-robin over image classes, until the ceiling is
    /// reached or no class has uncovered work left.
    ///
    /// A class is uncovered while its TO_START backlog exceeds its live
    /// workers. `on_launch` is called for every worker as soon as it exists.
    /// Returns the number of workers launched.
    pub async fn replenish<F>(&self, backlog: &BTreeMap<ImageClass, u64>, mut on_launch: F) -> Result<usize>
    where
        F: FnMut(Launched) + Send,
    {
        let _guard = self.replenish_lock.lock().await;
        let mut launched = 0;

        loop {
            let mut progressed = false;

            for (class, pending) in backlog {
                if self.live.len() >= self.ceiling {
                    return Ok(launched);
                }
                if (self.live_of(class) as u64) < *pending {
                    on_launch(self.launch(class).await?);
                    launched += 1;
                    progressed = true;
                }
            }

            if !progressed {
                return Ok(launched);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fabric::{MemoryFabric, MessagingFabric};
    use crate::watchdog::TimerWatchdog;
    use std::time::Duration;

    async fn pool(ceiling: usize) -> (RecordingProvider, Arc<TimerWatchdog>, WorkerPool) {
        let fabric = Arc::new(MemoryFabric::new(Duration::from_millis(10)));
        fabric.create_topic("host").await.unwrap();
        let watchdog = Arc::new(TimerWatchdog::new(fabric, "host", Duration::from_secs(60)));
        let provider = RecordingProvider::new();
        let pool = WorkerPool::new(Arc::new(provider.clone()), watchdog.clone(), ceiling);
        (provider, watchdog, pool)
    }

    fn backlog(entries: &[(&str, u64)]) -> BTreeMap<ImageClass, u64> {
        entries
            .iter()
            .map(|(class, n)| (ImageClass::new(*class), *n))
            .collect()
    }

    #[tokio::test]
    async fn launch_creates_unique_workers_with_timer() {
        let (provider, watchdog, pool) = pool(4).await;
        let class = ImageClass::new("img");

        let a = pool.launch(&class).await.unwrap();
        let b = pool.launch(&class).await.unwrap();

        assert_ne!(a.name, b.name);
        assert_eq!(pool.live_count(), 2);
        assert_eq!(watchdog.armed(), 2);
        assert_eq!(provider.created().len(), 2);
    }

    #[tokio::test]
    async fn failed_launch_frees_the_name() {
        let (provider, _watchdog, pool) = pool(4).await;
        provider.fail_next_create("quota exceeded");

        let err = pool.launch(&ImageClass::new("img")).await.unwrap_err();
        assert!(err.to_string().contains("quota exceeded"));
        assert_eq!(pool.live_count(), 0);
    }

    #[tokio::test]
    async fn destroy_disarms_and_removes() {
        let (provider, watchdog, pool) = pool(4).await;
        let launched = pool.launch(&ImageClass::new("img")).await.unwrap();

        pool.destroy(&launched.name).await.unwrap();
        assert_eq!(pool.live_count(), 0);
        assert_eq!(watchdog.armed(), 0);
        assert_eq!(provider.deleted(), vec![launched.name.clone()]);

        // Second destroy is a no-op.
        pool.destroy(&launched.name).await.unwrap();
        assert_eq!(provider.deleted().len(), 1);
    }

    #[tokio::test]
    async fn failed_destroy_keeps_worker_live() {
        let (provider, _watchdog, pool) = pool(4).await;
        let launched = pool.launch(&ImageClass::new("img")).await.unwrap();
        provider.fail_next_delete("api unavailable");

        assert!(pool.destroy(&launched.name).await.is_err());
        assert!(pool.is_live(&launched.name));
    }

    #[tokio::test]
    async fn replenish_stops_at_ceiling() {
        let (_provider, _watchdog, pool) = pool(3).await;
        let mut seen = Vec::new();

        let n = pool
            .replenish(&backlog(&[("a", 10), ("b", 10)]), |l| seen.push(l))
            .await
            .unwrap();

        assert_eq!(n, 3);
        assert_eq!(pool.live_count(), 3);
        assert_eq!(seen.len(), 3);
        // Round-robin: both classes got a worker.
        assert!(pool.live_of(&ImageClass::new("a")) >= 1);
        assert!(pool.live_of(&ImageClass::new("b")) >= 1);
    }

    #[tokio::test]
    async fn replenish_covers_backlog_only() {
        let (_provider, _watchdog, pool) = pool(10).await;

        let n = pool
            .replenish(&backlog(&[("a", 1), ("b", 2), ("c", 0)]), |_| {})
            .await
            .unwrap();

        assert_eq!(n, 3);
        assert_eq!(pool.live_of(&ImageClass::new("a")), 1);
        assert_eq!(pool.live_of(&ImageClass::new("b")), 2);
        assert_eq!(pool.live_of(&ImageClass::new("c")), 0);

        // Already covered: nothing more to launch.
        let again = pool
            .replenish(&backlog(&[("a", 1), ("b", 2)]), |_| {})
            .await
            .unwrap();
        assert_eq!(again, 0);
    }

    #[tokio::test]
    async fn reset_goes_through_provider() {
        let (provider, _watchdog, pool) = pool(1).await;
        let launched = pool.launch(&ImageClass::new("img")).await.unwrap();

        pool.reset(&launched.name).await.unwrap();
        assert_eq!(provider.resets(), vec![launched.name]);
        assert_eq!(pool.stats().resets_total.load(Ordering::Relaxed), 1);
    }
}
