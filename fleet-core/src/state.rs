//! Worker lifecycle state machine.
//!
//! A [`WorkerInstance`] is the orchestrator's record of one worker node. It
//! never performs I/O: [`WorkerInstance::plan`] classifies an inbound event
//! into a [`Step`] the caller must carry out, and the mutators
//! ([`assign`](WorkerInstance::assign), [`release`](WorkerInstance::release))
//! record the outcome once the caller's side effects have completed.
//!
//! ```text
//!            Ready / claim succeeded
//!   LAUNCHING ───────────────────────► RUNNING { test_case }
//!       ▲                                  │
//!       │   Result / Timeout (requeue)     │
//!       └──────────────────────────────────┘
//!   LAUNCHING ── Timeout ──► LAUNCHING (revive)
//! ```

use fleet_types::{ImageClass, Outcome, TestCaseId, WatchdogRef, WorkerEvent, WorkerName};
use std::time::Instant;

/// Lifecycle state of a worker.
///
/// The assignment lives inside `Running`, so a worker has an assigned test
/// case exactly when it is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Booting or resetting, no test case assigned.
    Launching,
    /// Executing an assigned test case.
    Running {
        /// The test case this worker holds.
        test_case: TestCaseId,
    },
}

/// What an inbound event requires the orchestrator to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Claim the next eligible test case and dispatch it on `result_channel`.
    Claim {
        /// Topic announced by the worker.
        result_channel: String,
    },
    /// Write `outcome` as the terminal status of `test_case`, then reset.
    Record {
        /// The finished test case.
        test_case: TestCaseId,
        /// Reported classification.
        outcome: Outcome,
    },
    /// The in-flight test case is lost: count a retry, then reset.
    Requeue {
        /// The lost test case.
        test_case: TestCaseId,
    },
    /// The worker never became ready: reset it again.
    Revive,
    /// The event no longer applies to this worker.
    Ignore(Stale),
}

/// Why an event was discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stale {
    /// The event names a different worker.
    WrongWorker,
    /// A READY arrived while the worker already runs a test case.
    AlreadyRunning,
    /// A result arrived while no test case is assigned.
    NotRunning,
    /// A timeout from a timer that has since been replaced or cancelled.
    SupersededTimer,
    /// The worker has been destroyed, or never belonged to this orchestrator.
    Retired,
}

/// A timer armed for a worker, with the instant it is due to fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArmedTimer {
    /// Handle returned by the timer service.
    pub handle: WatchdogRef,
    /// When the timer fires.
    pub expires_at: Instant,
}

impl ArmedTimer {
    /// A timer armed at `armed_at` that fires `deadline` later.
    pub fn new(handle: WatchdogRef, armed_at: Instant, deadline: std::time::Duration) -> Self {
        Self {
            handle,
            expires_at: armed_at + deadline,
        }
    }
}

/// The orchestrator's record of one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerInstance {
    name: WorkerName,
    image_class: ImageClass,
    lifecycle: Lifecycle,
    result_channel: Option<String>,
    watchdog: Option<ArmedTimer>,
}

impl WorkerInstance {
    /// A freshly launched worker, guarded by `watchdog` until it reports READY.
    pub fn launching(name: WorkerName, image_class: ImageClass, watchdog: ArmedTimer) -> Self {
        Self {
            name,
            image_class,
            lifecycle: Lifecycle::Launching,
            result_channel: None,
            watchdog: Some(watchdog),
        }
    }

    /// Worker name.
    pub fn name(&self) -> &WorkerName {
        &self.name
    }

    /// Image class the worker was launched from.
    pub fn image_class(&self) -> &ImageClass {
        &self.image_class
    }

    /// Current lifecycle state.
    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    /// The assigned test case, if running.
    pub fn assigned_test_case(&self) -> Option<TestCaseId> {
        match self.lifecycle {
            Lifecycle::Running { test_case } => Some(test_case),
            Lifecycle::Launching => None,
        }
    }

    /// Per-worker topic announced with the last READY.
    pub fn result_channel(&self) -> Option<&str> {
        self.result_channel.as_deref()
    }

    /// Handle of the currently armed watchdog.
    pub fn watchdog(&self) -> Option<WatchdogRef> {
        self.watchdog.map(|timer| timer.handle)
    }

    /// Classify an inbound event received at `now` against the current state.
    ///
    /// Pure: the record is not modified.
    pub fn plan(&self, event: &WorkerEvent, now: Instant) -> Step {
        if event.worker() != &self.name {
            return Step::Ignore(Stale::WrongWorker);
        }

        match (self.lifecycle, event) {
            (Lifecycle::Launching, WorkerEvent::Ready { result_channel, .. }) => Step::Claim {
                result_channel: result_channel.clone(),
            },
            (Lifecycle::Running { .. }, WorkerEvent::Ready { .. }) => {
                Step::Ignore(Stale::AlreadyRunning)
            }

            (Lifecycle::Running { test_case }, WorkerEvent::Result { outcome, .. }) => {
                Step::Record {
                    test_case,
                    outcome: *outcome,
                }
            }
            (Lifecycle::Launching, WorkerEvent::Result { .. }) => Step::Ignore(Stale::NotRunning),

            (_, WorkerEvent::Timeout { watchdog, .. }) if !self.timer_matches(*watchdog, now) => {
                Step::Ignore(Stale::SupersededTimer)
            }
            (Lifecycle::Running { test_case }, WorkerEvent::Timeout { .. }) => {
                Step::Requeue { test_case }
            }
            (Lifecycle::Launching, WorkerEvent::Timeout { .. }) => Step::Revive,
        }
    }

    /// A timeout applies when it names the armed timer. One without a handle
    /// applies only once the armed timer is overdue.
    fn timer_matches(&self, fired: Option<WatchdogRef>, now: Instant) -> bool {
        match (fired, self.watchdog) {
            (None, Some(armed)) => now >= armed.expires_at,
            (Some(fired), Some(armed)) => fired == armed.handle,
            (_, None) => false,
        }
    }

    /// Remember the topic announced with READY.
    pub fn record_channel(&mut self, result_channel: String) {
        self.result_channel = Some(result_channel);
    }

    /// Transition to RUNNING after `test_case` was claimed and dispatched.
    pub fn assign(&mut self, test_case: TestCaseId, watchdog: ArmedTimer) {
        self.lifecycle = Lifecycle::Running { test_case };
        self.watchdog = Some(watchdog);
    }

    /// Transition back to LAUNCHING after a reset, guarded by a fresh timer.
    ///
    /// Clears the assignment and the per-worker topic and returns the test
    /// case that was held, if any.
    pub fn release(&mut self, watchdog: ArmedTimer) -> Option<TestCaseId> {
        let previous = self.assigned_test_case();
        self.lifecycle = Lifecycle::Launching;
        self.result_channel = None;
        self.watchdog = Some(watchdog);
        previous
    }

    /// Record a replacement timer without changing the lifecycle.
    pub fn rearm(&mut self, watchdog: ArmedTimer) {
        self.watchdog = Some(watchdog);
    }

    /// Forget the armed timer (the worker is being destroyed).
    pub fn clear_watchdog(&mut self) {
        self.watchdog = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const DEADLINE: Duration = Duration::from_secs(60);

    fn timer() -> ArmedTimer {
        ArmedTimer::new(WatchdogRef::new(), Instant::now(), DEADLINE)
    }

    fn worker() -> WorkerInstance {
        WorkerInstance::launching(WorkerName::new("img-000001"), ImageClass::new("img"), timer())
    }

    fn plan(w: &WorkerInstance, event: &WorkerEvent) -> Step {
        w.plan(event, Instant::now())
    }

    fn ready() -> WorkerEvent {
        WorkerEvent::Ready {
            worker: WorkerName::new("img-000001"),
            result_channel: "guest_topic1".into(),
        }
    }

    fn result(outcome: Outcome) -> WorkerEvent {
        WorkerEvent::Result {
            worker: WorkerName::new("img-000001"),
            outcome,
        }
    }

    fn timeout(watchdog: Option<WatchdogRef>) -> WorkerEvent {
        WorkerEvent::Timeout {
            worker: WorkerName::new("img-000001"),
            watchdog,
        }
    }

    #[test]
    fn starts_launching_with_timer() {
        let w = worker();
        assert_eq!(w.lifecycle(), Lifecycle::Launching);
        assert!(w.assigned_test_case().is_none());
        assert!(w.watchdog().is_some());
    }

    #[test]
    fn ready_while_launching_claims() {
        assert_eq!(
            plan(&worker(), &ready()),
            Step::Claim {
                result_channel: "guest_topic1".into()
            }
        );
    }

    #[test]
    fn ready_while_running_is_stale() {
        let mut w = worker();
        w.assign(TestCaseId::new(7), timer());
        assert_eq!(plan(&w, &ready()), Step::Ignore(Stale::AlreadyRunning));
    }

    #[test]
    fn result_while_running_records() {
        let mut w = worker();
        w.assign(TestCaseId::new(7), timer());
        assert_eq!(
            plan(&w, &result(Outcome::Detected)),
            Step::Record {
                test_case: TestCaseId::new(7),
                outcome: Outcome::Detected
            }
        );
    }

    #[test]
    fn result_while_launching_is_stale() {
        assert_eq!(
            plan(&worker(), &result(Outcome::NotDetected)),
            Step::Ignore(Stale::NotRunning)
        );
    }

    #[test]
    fn timeout_while_running_requeues_assigned_case() {
        let mut w = worker();
        let armed = timer();
        w.assign(TestCaseId::new(9), armed);
        assert_eq!(
            plan(&w, &timeout(Some(armed.handle))),
            Step::Requeue {
                test_case: TestCaseId::new(9)
            }
        );
    }

    #[test]
    fn timeout_while_launching_revives() {
        let w = worker();
        assert_eq!(plan(&w, &timeout(w.watchdog())), Step::Revive);
    }

    #[test]
    fn timeout_without_handle_waits_for_deadline() {
        let mut w = worker();
        let armed_at = Instant::now();
        w.assign(TestCaseId::new(5), ArmedTimer::new(WatchdogRef::new(), armed_at, DEADLINE));

        assert_eq!(
            w.plan(&timeout(None), armed_at + DEADLINE / 2),
            Step::Ignore(Stale::SupersededTimer)
        );
        assert_eq!(
            w.plan(&timeout(None), armed_at + DEADLINE),
            Step::Requeue {
                test_case: TestCaseId::new(5)
            }
        );
    }

    #[test]
    fn timeout_without_handle_is_stale_after_rearm() {
        let mut w = worker();
        let first = Instant::now();
        w.assign(TestCaseId::new(5), ArmedTimer::new(WatchdogRef::new(), first, DEADLINE));
        let fired = first + DEADLINE;
        assert!(matches!(w.plan(&timeout(None), fired), Step::Requeue { .. }));

        // Requeued, reset, and claimed again right after.
        w.release(ArmedTimer::new(WatchdogRef::new(), fired, DEADLINE));
        w.assign(TestCaseId::new(5), ArmedTimer::new(WatchdogRef::new(), fired, DEADLINE));
        assert_eq!(
            w.plan(&timeout(None), fired + Duration::from_secs(1)),
            Step::Ignore(Stale::SupersededTimer)
        );
    }

    #[test]
    fn timeout_from_replaced_timer_is_stale() {
        let mut w = worker();
        let old = timer();
        w.assign(TestCaseId::new(9), old);
        w.release(timer());
        assert_eq!(
            plan(&w, &timeout(Some(old.handle))),
            Step::Ignore(Stale::SupersededTimer)
        );
    }

    #[test]
    fn timeout_without_armed_timer_is_stale() {
        let mut w = worker();
        w.clear_watchdog();
        assert_eq!(plan(&w, &timeout(None)), Step::Ignore(Stale::SupersededTimer));
    }

    #[test]
    fn event_for_other_worker_is_ignored() {
        let event = WorkerEvent::Ready {
            worker: WorkerName::new("img-999999"),
            result_channel: "t".into(),
        };
        assert_eq!(plan(&worker(), &event), Step::Ignore(Stale::WrongWorker));
    }

    #[test]
    fn release_clears_assignment_and_channel() {
        let mut w = worker();
        w.record_channel("guest_topic1".into());
        w.assign(TestCaseId::new(3), timer());

        let fresh = timer();
        assert_eq!(w.release(fresh), Some(TestCaseId::new(3)));
        assert_eq!(w.lifecycle(), Lifecycle::Launching);
        assert!(w.result_channel().is_none());
        assert_eq!(w.watchdog(), Some(fresh.handle));
    }

    #[test]
    fn rearm_keeps_lifecycle() {
        let mut w = worker();
        let replaced = w.watchdog().unwrap();
        let fresh = timer();
        w.rearm(fresh);

        assert_eq!(w.lifecycle(), Lifecycle::Launching);
        assert_eq!(plan(&w, &timeout(Some(replaced))), Step::Ignore(Stale::SupersededTimer));
        assert_eq!(plan(&w, &timeout(Some(fresh.handle))), Step::Revive);
    }

    #[test]
    fn result_then_late_timeout_is_noop() {
        // Result processed first: the running timer is replaced on release.
        let mut w = worker();
        let running_timer = timer();
        w.assign(TestCaseId::new(4), running_timer);
        assert!(matches!(plan(&w, &result(Outcome::NotDetected)), Step::Record { .. }));
        w.release(timer());

        assert_eq!(
            plan(&w, &timeout(Some(running_timer.handle))),
            Step::Ignore(Stale::SupersededTimer)
        );
        assert_eq!(
            plan(&w, &result(Outcome::NotDetected)),
            Step::Ignore(Stale::NotRunning)
        );
    }
}
