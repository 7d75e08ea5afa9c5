//! Recording compute provider for testing.
//!
//! Captures every create/delete/reset call and allows forcing failures.

use super::ComputeProvider;
use crate::error::{ComputeError, ComputeResult};
use async_trait::async_trait;
use fleet_types::{ImageClass, WorkerName};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Compute provider that only records calls.
#[derive(Debug, Default, Clone)]
pub struct RecordingProvider {
    inner: Arc<Mutex<RecordingInner>>,
}

#[derive(Debug, Default)]
struct RecordingInner {
    created: Vec<(WorkerName, ImageClass)>,
    deleted: Vec<WorkerName>,
    resets: Vec<WorkerName>,
    fail_next_create: Option<String>,
    fail_next_delete: Option<String>,
    fail_next_reset: Option<String>,
}

impl RecordingProvider {
    /// Create a new recording provider.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RecordingInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Workers created, in order.
    pub fn created(&self) -> Vec<(WorkerName, ImageClass)> {
        self.lock().created.clone()
    }

    /// Name of the most recently created worker.
    pub fn last_created(&self) -> Option<WorkerName> {
        self.lock().created.last().map(|(name, _)| name.clone())
    }

    /// Workers deleted, in order.
    pub fn deleted(&self) -> Vec<WorkerName> {
        self.lock().deleted.clone()
    }

    /// Workers reset, in order (repeats included).
    pub fn resets(&self) -> Vec<WorkerName> {
        self.lock().resets.clone()
    }

    /// Cause the next create() to fail with the given reason.
    pub fn fail_next_create(&self, reason: &str) {
        self.lock().fail_next_create = Some(reason.to_string());
    }

    /// Cause the next delete() to fail with the given reason.
    pub fn fail_next_delete(&self, reason: &str) {
        self.lock().fail_next_delete = Some(reason.to_string());
    }

    /// Cause the next reset() to fail with the given reason.
    pub fn fail_next_reset(&self, reason: &str) {
        self.lock().fail_next_reset = Some(reason.to_string());
    }
}

#[async_trait]
impl ComputeProvider for RecordingProvider {
    async fn create(&self, name: &WorkerName, image_class: &ImageClass) -> ComputeResult<()> {
        let mut inner = self.lock();

        if let Some(reason) = inner.fail_next_create.take() {
            return Err(ComputeError::Create {
                worker: name.clone(),
                reason,
            });
        }

        inner.created.push((name.clone(), image_class.clone()));
        Ok(())
    }

    async fn delete(&self, name: &WorkerName) -> ComputeResult<()> {
        let mut inner = self.lock();

        if let Some(reason) = inner.fail_next_delete.take() {
            return Err(ComputeError::Delete {
                worker: name.clone(),
                reason,
            });
        }

        inner.deleted.push(name.clone());
        Ok(())
    }

    async fn reset(&self, name: &WorkerName) -> ComputeResult<()> {
        let mut inner = self.lock();

        if let Some(reason) = inner.fail_next_reset.take() {
            return Err(ComputeError::Reset {
                worker: name.clone(),
                reason,
            });
        }

        inner.resets.push(name.clone());
        Ok(())
    }
}
