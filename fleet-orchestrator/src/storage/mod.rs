//! Storage layer for the orchestrator.
//!
//! The test case table is the single source of truth for remaining work and
//! retry counts. Every status write is guarded by the status it expects to
//! replace, so replaying an already-applied write changes nothing.

mod sqlite;

pub use sqlite::SqliteStore;

use crate::error::StorageError;
use async_trait::async_trait;
use fleet_core::{RetryDecision, RetryPolicy};
use fleet_types::{ImageClass, NewTestCase, Outcome, TestCase, TestCaseId, TestStatus};
use serde::Serialize;
use std::collections::BTreeMap;

/// Row counts per status for one experiment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    /// Waiting for a worker.
    pub to_start: u64,
    /// Assigned to a worker.
    pub running: u64,
    /// Finished, payload detected.
    pub detected: u64,
    /// Finished, payload not detected.
    pub not_detected: u64,
    /// Retries exhausted.
    pub failed: u64,
}

impl StatusCounts {
    /// Add `count` rows of `status`.
    pub fn add(&mut self, status: TestStatus, count: u64) {
        let slot = match status {
            TestStatus::ToStart => &mut self.to_start,
            TestStatus::Running => &mut self.running,
            TestStatus::Detected => &mut self.detected,
            TestStatus::NotDetected => &mut self.not_detected,
            TestStatus::Failed => &mut self.failed,
        };
        *slot += count;
    }

    /// Rows in a terminal status.
    pub fn finished(&self) -> u64 {
        self.detected + self.not_detected + self.failed
    }

    /// All rows.
    pub fn total(&self) -> u64 {
        self.to_start + self.running + self.finished()
    }
}

/// Trait for test case storage backends.
#[async_trait]
pub trait TestCaseStore: Send + Sync {
    /// Insert new rows as TO_START with zero retries.
    ///
    /// Returns the number of rows inserted.
    async fn bulk_insert(&self, rows: &[NewTestCase]) -> Result<u64, StorageError>;

    /// Atomically claim the lowest-id TO_START row of `image_class`.
    ///
    /// The claimed row is RUNNING when returned; no two callers can claim
    /// the same row.
    async fn claim_next(
        &self,
        experiment: &str,
        image_class: &ImageClass,
    ) -> Result<Option<TestCase>, StorageError>;

    /// Return a RUNNING row to TO_START without counting a retry.
    ///
    /// Returns `false` if the row was not RUNNING.
    async fn release(&self, id: TestCaseId) -> Result<bool, StorageError>;

    /// Overwrite the status of a row that has not finished.
    ///
    /// DETECTED, NOT_DETECTED and FAILED rows are never rewritten; trying is
    /// reported as an inconsistency.
    async fn set_status(&self, id: TestCaseId, status: TestStatus) -> Result<(), StorageError>;

    /// Write a reported outcome, only if the row is still RUNNING.
    ///
    /// Returns `false` if the row had already left RUNNING.
    async fn record_outcome(&self, id: TestCaseId, outcome: Outcome) -> Result<bool, StorageError>;

    /// Increment the retry count of a row.
    ///
    /// Returns the new count.
    async fn increment_retry(&self, id: TestCaseId) -> Result<u32, StorageError>;

    /// Count a lost attempt against a RUNNING row and apply `policy`.
    ///
    /// Returns `None` if the row had already left RUNNING.
    async fn record_timeout(
        &self,
        id: TestCaseId,
        policy: &RetryPolicy,
    ) -> Result<Option<RetryDecision>, StorageError>;

    /// Return every RUNNING row of an experiment to TO_START.
    ///
    /// Used at startup, when no worker can hold an assignment yet.
    async fn requeue_orphans(&self, experiment: &str) -> Result<u64, StorageError>;

    /// Count TO_START rows across all image classes.
    async fn count_eligible(&self, experiment: &str) -> Result<u64, StorageError>;

    /// Count TO_START rows per image class.
    async fn eligible_by_class(
        &self,
        experiment: &str,
    ) -> Result<BTreeMap<ImageClass, u64>, StorageError>;

    /// Get a row by id.
    async fn get(&self, id: TestCaseId) -> Result<Option<TestCase>, StorageError>;

    /// All rows of an experiment, ordered by id.
    async fn list(&self, experiment: &str) -> Result<Vec<TestCase>, StorageError>;

    /// Row counts per status.
    async fn status_counts(&self, experiment: &str) -> Result<StatusCounts, StorageError>;
}
