//! Per-worker watchdog timers.
//!
//! Each worker has at most one armed timer. When it fires, a timeout event
//! is published to the host topic like any worker event, carrying the
//! handle of the timer so a replaced timer can be told apart.

use crate::error::WatchdogError;
use crate::fabric::MessagingFabric;
use async_trait::async_trait;
use dashmap::DashMap;
use fleet_core::ArmedTimer;
use fleet_types::{WatchdogRef, WorkerEvent, WorkerName};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Trait for timer services.
#[async_trait]
pub trait Watchdog: Send + Sync {
    /// Schedule one timeout for `worker`, replacing any armed timer.
    ///
    /// Returns the handle of the new timer and when it fires.
    async fn arm(&self, worker: &WorkerName) -> Result<ArmedTimer, WatchdogError>;

    /// Cancel the armed timer of `worker`. Missing timers are ignored.
    async fn disarm(&self, worker: &WorkerName) -> Result<(), WatchdogError>;

    /// Cancel every timer and refuse to arm new ones.
    async fn shutdown(&self);

    /// Number of armed timers.
    fn armed(&self) -> usize;
}

/// Tokio-backed timers publishing to the fabric.
pub struct TimerWatchdog {
    fabric: Arc<dyn MessagingFabric>,
    host_topic: String,
    deadline: Duration,
    timers: Arc<DashMap<WorkerName, (WatchdogRef, JoinHandle<()>)>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for TimerWatchdog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerWatchdog")
            .field("host_topic", &self.host_topic)
            .field("deadline", &self.deadline)
            .field("armed", &self.timers.len())
            .finish()
    }
}

impl TimerWatchdog {
    /// Create timers that fire `deadline` after arming.
    pub fn new(fabric: Arc<dyn MessagingFabric>, host_topic: impl Into<String>, deadline: Duration) -> Self {
        Self {
            fabric,
            host_topic: host_topic.into(),
            deadline,
            timers: Arc::new(DashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Configured deadline.
    pub fn deadline(&self) -> Duration {
        self.deadline
    }
}

#[async_trait]
impl Watchdog for TimerWatchdog {
    async fn arm(&self, worker: &WorkerName) -> Result<ArmedTimer, WatchdogError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(WatchdogError::Closed(worker.clone()));
        }

        let timer = ArmedTimer::new(WatchdogRef::new(), Instant::now(), self.deadline);
        let handle = timer.handle;
        let fabric = Arc::clone(&self.fabric);
        let timers = Arc::clone(&self.timers);
        let host_topic = self.host_topic.clone();
        let name = worker.clone();

        // The task waits until its entry is in the table, so removing the
        // entry on fire never races the insert below.
        let (registered, wait_registered) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            if wait_registered.await.is_err() {
                return;
            }
            tokio::time::sleep_until(tokio::time::Instant::from_std(timer.expires_at)).await;
            timers.remove_if(&name, |_, (armed, _)| *armed == handle);

            let event = WorkerEvent::Timeout {
                worker: name.clone(),
                watchdog: Some(handle),
            };
            tracing::debug!("Watchdog {:?} fired for {}", handle, name);
            if let Err(e) = fabric.publish(&host_topic, event.to_message()).await {
                tracing::error!("Watchdog for {} could not publish timeout: {}", name, e);
            }
        });

        if let Some((_, previous)) = self.timers.insert(worker.clone(), (handle, task)) {
            previous.abort();
        }
        let _ = registered.send(());
        Ok(timer)
    }

    async fn disarm(&self, worker: &WorkerName) -> Result<(), WatchdogError> {
        if let Some((_, (handle, task))) = self.timers.remove(worker) {
            task.abort();
            tracing::debug!("Watchdog {:?} disarmed for {}", handle, worker);
        }
        Ok(())
    }

    async fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        let workers: Vec<WorkerName> = self.timers.iter().map(|e| e.key().clone()).collect();
        for worker in &workers {
            if let Some((_, (_, task))) = self.timers.remove(worker) {
                task.abort();
            }
        }
        tracing::debug!("Watchdog shut down, {} timers cancelled", workers.len());
    }

    fn armed(&self) -> usize {
        self.timers.len()
    }
}

impl Drop for TimerWatchdog {
    fn drop(&mut self) {
        for entry in self.timers.iter() {
            entry.value().1.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fabric::MemoryFabric;

    async fn setup(deadline: Duration) -> (Arc<MemoryFabric>, TimerWatchdog) {
        let fabric = Arc::new(MemoryFabric::new(Duration::from_millis(10)));
        fabric.create_topic("host").await.unwrap();
        let watchdog = TimerWatchdog::new(fabric.clone(), "host", deadline);
        (fabric, watchdog)
    }

    #[tokio::test]
    async fn fired_timer_publishes_timeout_with_handle() {
        let (fabric, watchdog) = setup(Duration::from_millis(20)).await;
        let mut sub = fabric.subscribe("host").await.unwrap();
        let worker = WorkerName::new("img-000001");

        let handle = watchdog.arm(&worker).await.unwrap().handle;
        let delivery = tokio::time::timeout(Duration::from_secs(1), sub.next())
            .await
            .unwrap()
            .unwrap();

        let event = WorkerEvent::try_from(delivery.message()).unwrap();
        assert_eq!(
            event,
            WorkerEvent::Timeout {
                worker,
                watchdog: Some(handle)
            }
        );
        delivery.ack();

        tokio::task::yield_now().await;
        assert_eq!(watchdog.armed(), 0);
    }

    #[tokio::test]
    async fn disarmed_timer_never_fires() {
        let (fabric, watchdog) = setup(Duration::from_millis(20)).await;
        let worker = WorkerName::new("img-000001");

        watchdog.arm(&worker).await.unwrap();
        watchdog.disarm(&worker).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(fabric.pending("host"), 0);
        assert_eq!(watchdog.armed(), 0);
    }

    #[tokio::test]
    async fn rearm_replaces_previous_timer() {
        let (fabric, watchdog) = setup(Duration::from_millis(40)).await;
        let mut sub = fabric.subscribe("host").await.unwrap();
        let worker = WorkerName::new("img-000001");

        let first = watchdog.arm(&worker).await.unwrap().handle;
        let second = watchdog.arm(&worker).await.unwrap().handle;
        assert_ne!(first, second);
        assert_eq!(watchdog.armed(), 1);

        let delivery = tokio::time::timeout(Duration::from_secs(1), sub.next())
            .await
            .unwrap()
            .unwrap();
        let event = WorkerEvent::try_from(delivery.message()).unwrap();
        assert!(matches!(event, WorkerEvent::Timeout { watchdog: Some(h), .. } if h == second));
        delivery.ack();

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(fabric.pending("host"), 0);
    }

    #[tokio::test]
    async fn disarm_missing_timer_is_noop() {
        let (_fabric, watchdog) = setup(Duration::from_secs(60)).await;
        watchdog
            .disarm(&WorkerName::new("img-unknown"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn immediate_deadline_leaves_no_entry_behind() {
        let (fabric, watchdog) = setup(Duration::ZERO).await;
        let mut sub = fabric.subscribe("host").await.unwrap();

        for i in 0..20 {
            watchdog
                .arm(&WorkerName::new(format!("img-{:06}", i)))
                .await
                .unwrap();
        }
        for _ in 0..20 {
            let delivery = tokio::time::timeout(Duration::from_secs(1), sub.next())
                .await
                .unwrap()
                .unwrap();
            delivery.ack();
        }

        tokio::task::yield_now().await;
        assert_eq!(watchdog.armed(), 0);
    }

    #[tokio::test]
    async fn arm_reports_expiry_after_deadline() {
        let (_fabric, watchdog) = setup(Duration::from_secs(60)).await;
        let before = Instant::now();
        let timer = watchdog.arm(&WorkerName::new("img-000001")).await.unwrap();
        assert!(timer.expires_at >= before + Duration::from_secs(60));
    }

    #[tokio::test]
    async fn shutdown_cancels_timers_and_refuses_new_ones() {
        let (fabric, watchdog) = setup(Duration::from_millis(20)).await;
        let worker = WorkerName::new("img-000001");
        watchdog.arm(&worker).await.unwrap();

        watchdog.shutdown().await;
        assert_eq!(watchdog.armed(), 0);
        assert!(matches!(
            watchdog.arm(&worker).await,
            Err(WatchdogError::Closed(_))
        ));

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(fabric.pending("host"), 0);
    }
}
