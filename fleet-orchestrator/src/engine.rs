//! Event-driven orchestration engine.
//!
//! The [`Orchestrator`] owns the worker table and handles to the store,
//! fabric, watchdog and pool. Each inbound event is classified by the
//! worker's [`WorkerInstance::plan`] under that worker's lock, the required
//! side effects are carried out, and the transition is applied to the
//! record. Events for different workers are handled in parallel.
//!
//! Every handler is safe to run again on redelivery: the record is checked
//! before acting and every store write is guarded by the status it replaces.

use crate::config::ExperimentConfig;
use crate::error::{OrchestratorError, Result};
use crate::fabric::MessagingFabric;
use crate::pool::{ComputeProvider, WorkerPool};
use crate::storage::TestCaseStore;
use crate::watchdog::Watchdog;
use dashmap::DashMap;
use fleet_core::{RetryDecision, RetryPolicy, Stale, Step, WorkerInstance};
use fleet_types::{
    Dispatch, EventKind, FabricMessage, Outcome, TestCase, TestCaseId, WorkerEvent, WorkerName,
};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{watch, Mutex};

/// Operational counters for the engine.
///
/// All counters are monotonically increasing (reset only on restart).
#[derive(Debug, Default)]
pub struct EngineMetrics {
    /// Inbound events parsed.
    pub events_total: AtomicU64,
    /// Test cases dispatched to a worker.
    pub dispatches_total: AtomicU64,
    /// Results processed.
    pub results_total: AtomicU64,
    /// Results reporting DETECTED.
    pub detections_total: AtomicU64,
    /// Timeouts of running workers processed.
    pub timeouts_total: AtomicU64,
    /// Timed-out test cases returned to TO_START.
    pub requeues_total: AtomicU64,
    /// Test cases that exhausted their retries.
    pub failures_total: AtomicU64,
    /// Workers reset again after timing out while launching.
    pub revives_total: AtomicU64,
    /// Workers retired because their class had no work left.
    pub retired_total: AtomicU64,
    /// Events discarded as stale.
    pub stale_events_total: AtomicU64,
    /// Events whose handler failed and were left for redelivery.
    pub handler_errors_total: AtomicU64,
}

/// What handling one message amounted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handled {
    /// The event changed the worker's state.
    Applied(EventKind),
    /// The event no longer applied and was discarded.
    Stale(Stale),
    /// The experiment had already completed.
    AfterShutdown,
}

/// Orchestration context for one experiment.
pub struct Orchestrator {
    experiment: String,
    artifact: String,
    retry: RetryPolicy,
    store: Arc<dyn TestCaseStore>,
    fabric: Arc<dyn MessagingFabric>,
    watchdog: Arc<dyn Watchdog>,
    pool: WorkerPool,
    /// One record per live worker; the mutex serializes its events.
    workers: DashMap<WorkerName, Arc<Mutex<WorkerInstance>>>,
    metrics: EngineMetrics,
    completed: AtomicBool,
    done: watch::Sender<bool>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("experiment", &self.experiment)
            .field("retry", &self.retry)
            .field("pool", &self.pool)
            .field("workers", &self.workers.len())
            .field("metrics", &self.metrics)
            .field("completed", &self.is_complete())
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Create an orchestrator for `experiment`.
    ///
    /// The pool is bounded by `experiment.max_workers`.
    pub fn new(
        experiment: &ExperimentConfig,
        store: Arc<dyn TestCaseStore>,
        fabric: Arc<dyn MessagingFabric>,
        watchdog: Arc<dyn Watchdog>,
        provider: Arc<dyn ComputeProvider>,
    ) -> Self {
        let pool = WorkerPool::new(provider, Arc::clone(&watchdog), experiment.max_workers);
        let (done, _) = watch::channel(false);

        Self {
            experiment: experiment.name.clone(),
            artifact: experiment.artifact.clone(),
            retry: experiment.retry_policy(),
            store,
            fabric,
            watchdog,
            pool,
            workers: DashMap::new(),
            metrics: EngineMetrics::default(),
            completed: AtomicBool::new(false),
            done,
        }
    }

    /// Experiment name.
    pub fn experiment(&self) -> &str {
        &self.experiment
    }

    /// Get access to the test case store.
    pub fn store(&self) -> &Arc<dyn TestCaseStore> {
        &self.store
    }

    /// Get access to the messaging fabric.
    pub fn fabric(&self) -> &Arc<dyn MessagingFabric> {
        &self.fabric
    }

    /// Get access to the timer service.
    pub fn watchdog(&self) -> &Arc<dyn Watchdog> {
        &self.watchdog
    }

    /// Get access to the worker pool.
    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Get access to the operational metrics.
    pub fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }

    /// Whether the experiment has completed.
    pub fn is_complete(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    /// Watch channel that turns `true` once, when the experiment completes.
    pub fn completion(&self) -> watch::Receiver<bool> {
        self.done.subscribe()
    }

    /// Copy of a worker's record.
    pub async fn worker_snapshot(&self, name: &WorkerName) -> Option<WorkerInstance> {
        let record = self.workers.get(name).map(|r| Arc::clone(r.value()))?;
        let worker = record.lock().await;
        Some(worker.clone())
    }

    /// Names of all registered workers.
    pub fn worker_names(&self) -> Vec<WorkerName> {
        self.workers.iter().map(|r| r.key().clone()).collect()
    }

    /// Prepare a run: requeue orphaned assignments, fill the pool, and
    /// signal completion right away if there is nothing to do.
    pub async fn start(&self) -> Result<()> {
        let orphans = self.store.requeue_orphans(&self.experiment).await?;
        if orphans > 0 {
            tracing::warn!(
                "Returned {} orphaned test cases of {} to TO_START",
                orphans,
                self.experiment
            );
        }

        let launched = self.replenish().await?;
        tracing::info!(
            "Experiment {} started with {} workers (ceiling {})",
            self.experiment,
            launched,
            self.pool.ceiling()
        );

        self.check_completion().await?;
        Ok(())
    }

    /// Handle one message from the host topic.
    ///
    /// An `Ok` return means the message may be acknowledged. Errors leave it
    /// for redelivery.
    pub async fn handle(&self, message: &FabricMessage) -> Result<Handled> {
        if self.is_complete() {
            tracing::info!("Dropping event after completion: {:?}", message.attributes);
            return Ok(Handled::AfterShutdown);
        }

        let event = WorkerEvent::try_from(message).map_err(|e| {
            tracing::error!("Protocol violation in {:?}: {}", message.attributes, e);
            e
        })?;
        self.metrics.events_total.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("Event {:?} from {}", event.kind(), event.worker());

        let handled = self.apply(&event).await?;
        self.check_completion().await?;
        Ok(handled)
    }

    async fn apply(&self, event: &WorkerEvent) -> Result<Handled> {
        let name = event.worker();

        let Some(record) = self.workers.get(name).map(|r| Arc::clone(r.value())) else {
            if self.pool.is_live(name) {
                return Err(OrchestratorError::UnknownWorker(name.clone()));
            }
            return Ok(self.stale(event, Stale::Retired));
        };

        let mut worker = record.lock().await;
        // Destroyed while this event waited for the lock.
        if !self.pool.is_live(name) {
            return Ok(self.stale(event, Stale::Retired));
        }

        match worker.plan(event, Instant::now()) {
            Step::Claim { result_channel } => {
                worker.record_channel(result_channel.clone());
                match self
                    .store
                    .claim_next(&self.experiment, worker.image_class())
                    .await?
                {
                    Some(test_case) => {
                        self.dispatch(&mut worker, &test_case, &result_channel)
                            .await?
                    }
                    None => self.retire(&mut worker, &result_channel).await?,
                }
            }
            Step::Record { test_case, outcome } => {
                self.record(&mut worker, test_case, outcome).await?
            }
            Step::Requeue { test_case } => self.requeue(&mut worker, test_case).await?,
            Step::Revive => {
                tracing::warn!(
                    "Worker {} timed out before becoming ready, resetting again",
                    worker.name()
                );
                self.metrics.revives_total.fetch_add(1, Ordering::Relaxed);
                self.recycle(&mut worker).await?;
            }
            Step::Ignore(reason) => return Ok(self.stale(event, reason)),
        }

        Ok(Handled::Applied(event.kind()))
    }

    fn stale(&self, event: &WorkerEvent, reason: Stale) -> Handled {
        self.metrics
            .stale_events_total
            .fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            "Ignoring stale {:?} event from {}: {:?}",
            event.kind(),
            event.worker(),
            reason
        );
        Handled::Stale(reason)
    }

    /// Send a claimed test case to the worker and mark it RUNNING.
    ///
    /// If the dispatch cannot be published the row is released without
    /// counting a retry and the event is left for redelivery.
    async fn dispatch(
        &self,
        worker: &mut WorkerInstance,
        test_case: &TestCase,
        channel: &str,
    ) -> Result<()> {
        let timer = match self.watchdog.arm(worker.name()).await {
            Ok(timer) => timer,
            Err(e) => {
                self.release_claim(test_case.id).await?;
                return Err(e.into());
            }
        };

        let dispatch = Dispatch {
            flags: test_case.flags.clone(),
            artifact: self.artifact.clone(),
        };
        if let Err(e) = self
            .fabric
            .publish(channel, dispatch.to_message(worker.image_class()))
            .await
        {
            tracing::error!(
                "Dispatch of test case {} to {} failed: {}",
                test_case.id,
                worker.name(),
                e
            );
            worker.rearm(timer);
            self.release_claim(test_case.id).await?;
            return Err(e.into());
        }

        worker.assign(test_case.id, timer);
        self.metrics.dispatches_total.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            "Dispatched test case {} (attempt {}) to {}",
            test_case.id,
            test_case.retry_count + 1,
            worker.name()
        );
        Ok(())
    }

    /// Hand back a claimed row that never reached its worker.
    async fn release_claim(&self, test_case: TestCaseId) -> Result<()> {
        if let Err(e) = self.store.release(test_case).await {
            tracing::error!(
                "Test case {} stays RUNNING until the pool drains: {}",
                test_case,
                e
            );
            return Err(e.into());
        }
        Ok(())
    }

    /// No work left for the worker's class: destroy it and refill the pool.
    async fn retire(&self, worker: &mut WorkerInstance, channel: &str) -> Result<()> {
        tracing::info!(
            "No work left for {} ({}), destroying",
            worker.name(),
            worker.image_class()
        );

        self.pool.destroy(worker.name()).await?;
        worker.clear_watchdog();
        self.workers.remove(worker.name());
        self.metrics.retired_total.fetch_add(1, Ordering::Relaxed);

        self.fabric.delete_topic(channel).await?;
        self.replenish().await?;
        Ok(())
    }

    async fn record(
        &self,
        worker: &mut WorkerInstance,
        test_case: TestCaseId,
        outcome: Outcome,
    ) -> Result<()> {
        if self.store.record_outcome(test_case, outcome).await? {
            tracing::info!(
                "Test case {} finished on {}: {}",
                test_case,
                worker.name(),
                outcome.as_str()
            );
        } else {
            tracing::warn!(
                "Test case {} had already left RUNNING, {} not written",
                test_case,
                outcome.as_str()
            );
        }

        self.metrics.results_total.fetch_add(1, Ordering::Relaxed);
        if outcome == Outcome::Detected {
            self.metrics.detections_total.fetch_add(1, Ordering::Relaxed);
        }

        self.watchdog.disarm(worker.name()).await?;
        worker.clear_watchdog();
        self.recycle(worker).await
    }

    /// The worker went silent while running `test_case`.
    async fn requeue(&self, worker: &mut WorkerInstance, test_case: TestCaseId) -> Result<()> {
        self.metrics.timeouts_total.fetch_add(1, Ordering::Relaxed);

        match self.store.record_timeout(test_case, &self.retry).await? {
            Some(RetryDecision::Requeue { retry_count }) => {
                self.metrics.requeues_total.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    "Worker {} timed out on test case {}, requeued (retry {}/{})",
                    worker.name(),
                    test_case,
                    retry_count,
                    self.retry.max_retries()
                );
            }
            Some(RetryDecision::Exhausted { retry_count }) => {
                self.metrics.failures_total.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    "Test case {} FAILED after {} timed-out attempts",
                    test_case,
                    retry_count
                );
            }
            None => {
                tracing::warn!(
                    "Test case {} had already left RUNNING, timeout not counted",
                    test_case
                );
            }
        }

        self.recycle(worker).await
    }

    /// Put the worker back into LAUNCHING under a fresh timer, then reset it.
    ///
    /// The record changes before the reset is attempted: a redelivered copy
    /// of the triggering event is stale from here on, and a failed reset is
    /// retried when the fresh timer fires.
    async fn recycle(&self, worker: &mut WorkerInstance) -> Result<()> {
        let timer = self.watchdog.arm(worker.name()).await?;
        let channel = worker.result_channel().map(str::to_owned);
        worker.release(timer);

        if let Some(channel) = channel {
            self.fabric.delete_topic(&channel).await?;
        }
        self.pool.reset(worker.name()).await?;
        Ok(())
    }

    /// Launch workers for uncovered work and register them.
    async fn replenish(&self) -> Result<usize> {
        if self.is_complete() {
            return Ok(0);
        }

        let backlog = self.store.eligible_by_class(&self.experiment).await?;
        self.pool
            .replenish(&backlog, |launched| {
                self.workers.insert(
                    launched.name.clone(),
                    Arc::new(Mutex::new(WorkerInstance::launching(
                        launched.name,
                        launched.image_class,
                        launched.watchdog,
                    ))),
                );
            })
            .await
    }

    /// Signal completion once no work and no worker is left.
    ///
    /// With work left but an empty pool (a failed launch), the pool is
    /// refilled instead. A RUNNING row with no live worker left to hold it
    /// goes back to TO_START first. Returns whether the experiment is
    /// complete.
    async fn check_completion(&self) -> Result<bool> {
        if self.pool.live_count() > 0 {
            return Ok(false);
        }

        let stranded = self.store.requeue_orphans(&self.experiment).await?;
        if stranded > 0 {
            tracing::error!(
                "Returned {} test cases left RUNNING by an empty pool to TO_START",
                stranded
            );
        }

        let backlog = self.store.count_eligible(&self.experiment).await?;
        if backlog > 0 {
            let launched = self.replenish().await?;
            tracing::warn!(
                "Pool empty with {} test cases left, launched {} workers",
                backlog,
                launched
            );
            return Ok(false);
        }

        if self
            .completed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            tracing::info!("Experiment {} complete", self.experiment);
            self.done.send_replace(true);
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::fabric::MemoryFabric;
    use crate::pool::RecordingProvider;
    use crate::storage::SqliteStore;
    use crate::watchdog::TimerWatchdog;
    use fleet_core::Lifecycle;
    use fleet_types::{ImageClass, NewTestCase, TestStatus};
    use std::time::Duration;

    struct Harness {
        orchestrator: Orchestrator,
        provider: RecordingProvider,
        fabric: Arc<MemoryFabric>,
        store: Arc<SqliteStore>,
    }

    async fn harness(rows: usize, max_workers: usize) -> Harness {
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let cases: Vec<NewTestCase> = (0..rows)
            .map(|i| NewTestCase {
                experiment_name: "exp".into(),
                batch_label: None,
                image_class: ImageClass::new("img"),
                flags: format!("-case={} ", i),
            })
            .collect();
        store.bulk_insert(&cases).await.unwrap();

        let fabric = Arc::new(MemoryFabric::new(Duration::from_millis(10)));
        fabric.create_topic("host").await.unwrap();
        let watchdog = Arc::new(TimerWatchdog::new(
            fabric.clone(),
            "host",
            Duration::from_secs(60),
        ));
        let provider = RecordingProvider::new();

        let mut experiment = Config::default().experiment;
        experiment.name = "exp".into();
        experiment.max_workers = max_workers;

        let orchestrator = Orchestrator::new(
            &experiment,
            store.clone(),
            fabric.clone(),
            watchdog,
            Arc::new(provider.clone()),
        );
        Harness {
            orchestrator,
            provider,
            fabric,
            store,
        }
    }

    async fn ready(h: &Harness, worker: &WorkerName, topic: &str) -> Result<Handled> {
        if !h.fabric.has_topic(topic) {
            h.fabric.create_topic(topic).await.unwrap();
        }
        let event = WorkerEvent::Ready {
            worker: worker.clone(),
            result_channel: topic.into(),
        };
        h.orchestrator.handle(&event.to_message()).await
    }

    #[tokio::test]
    async fn start_launches_up_to_ceiling() {
        let h = harness(5, 2).await;
        h.orchestrator.start().await.unwrap();

        assert_eq!(h.provider.created().len(), 2);
        assert_eq!(h.orchestrator.worker_names().len(), 2);
        assert!(!h.orchestrator.is_complete());
    }

    #[tokio::test]
    async fn start_with_no_work_completes_immediately() {
        let h = harness(0, 2).await;
        let completion = h.orchestrator.completion();
        h.orchestrator.start().await.unwrap();

        assert!(h.orchestrator.is_complete());
        assert!(*completion.borrow());
        assert!(h.provider.created().is_empty());
    }

    #[tokio::test]
    async fn ready_dispatches_to_worker_topic() {
        let h = harness(1, 1).await;
        h.orchestrator.start().await.unwrap();
        let name = h.provider.last_created().unwrap();

        let handled = ready(&h, &name, "guest-1").await.unwrap();
        assert_eq!(handled, Handled::Applied(EventKind::Ready));

        let worker = h.orchestrator.worker_snapshot(&name).await.unwrap();
        let Lifecycle::Running { test_case } = worker.lifecycle() else {
            panic!("worker should be running");
        };
        assert_eq!(
            h.store.get(test_case).await.unwrap().unwrap().status,
            TestStatus::Running
        );

        let mut sub = h.fabric.subscribe("guest-1").await.unwrap();
        let delivery = sub.next().await.unwrap();
        let dispatch = Dispatch::from_message(delivery.message()).unwrap();
        assert_eq!(dispatch.flags, "-case=0 ");
        assert_eq!(dispatch.artifact, "payload.exe");
        delivery.ack();
    }

    #[tokio::test]
    async fn result_records_and_resets() {
        let h = harness(1, 1).await;
        h.orchestrator.start().await.unwrap();
        let name = h.provider.last_created().unwrap();
        ready(&h, &name, "guest-1").await.unwrap();

        let result = WorkerEvent::Result {
            worker: name.clone(),
            outcome: Outcome::Detected,
        };
        h.orchestrator.handle(&result.to_message()).await.unwrap();

        let rows = h.store.list("exp").await.unwrap();
        assert_eq!(rows[0].status, TestStatus::Detected);
        assert_eq!(h.provider.resets(), vec![name.clone()]);
        assert!(!h.fabric.has_topic("guest-1"));

        let worker = h.orchestrator.worker_snapshot(&name).await.unwrap();
        assert_eq!(worker.lifecycle(), Lifecycle::Launching);
        assert!(worker.result_channel().is_none());
    }

    #[tokio::test]
    async fn result_while_launching_is_stale() {
        let h = harness(1, 1).await;
        h.orchestrator.start().await.unwrap();
        let name = h.provider.last_created().unwrap();

        let result = WorkerEvent::Result {
            worker: name,
            outcome: Outcome::NotDetected,
        };
        assert_eq!(
            h.orchestrator.handle(&result.to_message()).await.unwrap(),
            Handled::Stale(Stale::NotRunning)
        );
        assert_eq!(
            h.orchestrator
                .metrics()
                .stale_events_total
                .load(Ordering::Relaxed),
            1
        );
    }

    #[tokio::test]
    async fn event_for_pending_launch_is_retried() {
        let h = harness(1, 1).await;
        // Launched through the pool but not registered with the engine.
        let launched = h
            .orchestrator
            .pool()
            .launch(&ImageClass::new("img"))
            .await
            .unwrap();

        let err = ready(&h, &launched.name, "guest-1").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::UnknownWorker(_)));
    }

    #[tokio::test]
    async fn event_for_unknown_worker_is_stale() {
        let h = harness(1, 1).await;
        h.orchestrator.start().await.unwrap();

        let handled = ready(&h, &WorkerName::new("img-ffffff"), "guest-x")
            .await
            .unwrap();
        assert_eq!(handled, Handled::Stale(Stale::Retired));
    }

    #[tokio::test]
    async fn protocol_violation_is_an_error() {
        let h = harness(1, 1).await;
        let message = FabricMessage::new()
            .with_attribute(fleet_types::attributes::WORKER_NAME, "img-000001")
            .with_attribute(fleet_types::attributes::STATUS, "READY");

        assert!(matches!(
            h.orchestrator.handle(&message).await,
            Err(OrchestratorError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn failed_dispatch_releases_the_row() {
        let h = harness(1, 1).await;
        h.orchestrator.start().await.unwrap();
        let name = h.provider.last_created().unwrap();

        // No such topic: publishing the dispatch fails.
        let event = WorkerEvent::Ready {
            worker: name.clone(),
            result_channel: "guest-missing".into(),
        };
        assert!(h.orchestrator.handle(&event.to_message()).await.is_err());

        let rows = h.store.list("exp").await.unwrap();
        assert_eq!((rows[0].status, rows[0].retry_count), (TestStatus::ToStart, 0));
        let worker = h.orchestrator.worker_snapshot(&name).await.unwrap();
        assert_eq!(worker.lifecycle(), Lifecycle::Launching);
        assert!(worker.watchdog().is_some());
    }

    #[tokio::test]
    async fn failed_reset_leaves_worker_recoverable() {
        let h = harness(1, 1).await;
        h.orchestrator.start().await.unwrap();
        let name = h.provider.last_created().unwrap();
        ready(&h, &name, "guest-1").await.unwrap();
        h.provider.fail_next_reset("api unavailable");

        let result = WorkerEvent::Result {
            worker: name.clone(),
            outcome: Outcome::NotDetected,
        }
        .to_message();
        assert!(h.orchestrator.handle(&result).await.is_err());

        // The outcome is written and a redelivery changes nothing.
        assert_eq!(
            h.orchestrator.handle(&result).await.unwrap(),
            Handled::Stale(Stale::NotRunning)
        );
        let rows = h.store.list("exp").await.unwrap();
        assert_eq!(rows[0].status, TestStatus::NotDetected);

        // The fresh timer revives the worker.
        let timeout = WorkerEvent::Timeout {
            worker: name.clone(),
            watchdog: h.orchestrator.worker_snapshot(&name).await.unwrap().watchdog(),
        };
        assert_eq!(
            h.orchestrator.handle(&timeout.to_message()).await.unwrap(),
            Handled::Applied(EventKind::Timeout)
        );
        assert_eq!(h.provider.resets(), vec![name]);
    }

    #[tokio::test]
    async fn stranded_running_row_is_requeued_when_pool_drains() {
        let h = harness(1, 1).await;
        h.orchestrator.start().await.unwrap();
        let name = h.provider.last_created().unwrap();

        // A claim whose release failed: RUNNING with no worker holding it.
        let stranded = h
            .store
            .claim_next("exp", &ImageClass::new("img"))
            .await
            .unwrap()
            .unwrap();

        // Nothing to claim, so the worker is retired and the pool drains.
        assert_eq!(
            ready(&h, &name, "guest-1").await.unwrap(),
            Handled::Applied(EventKind::Ready)
        );

        assert!(!h.orchestrator.is_complete());
        let row = h.store.get(stranded.id).await.unwrap().unwrap();
        assert_eq!((row.status, row.retry_count), (TestStatus::ToStart, 0));
        assert_eq!(h.provider.created().len(), 2);
        assert_eq!(h.orchestrator.pool().live_count(), 1);
    }

    #[tokio::test]
    async fn events_after_completion_are_dropped() {
        let h = harness(0, 1).await;
        h.orchestrator.start().await.unwrap();

        let handled = ready(&h, &WorkerName::new("img-000001"), "guest-1")
            .await
            .unwrap();
        assert_eq!(handled, Handled::AfterShutdown);
    }
}
