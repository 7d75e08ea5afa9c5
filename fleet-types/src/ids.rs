//! Identity types for the fleet.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Tag selecting which worker image may run a test case.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageClass(String);

impl ImageClass {
    /// Create an image class from its name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Get the image class name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ImageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ImageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ImageClass({})", self.0)
    }
}

/// Unique name of a worker instance within the pool.
///
/// Generated names are the image class followed by a six character random
/// suffix, e.g. `win10-defender-3fa91c`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerName(String);

impl WorkerName {
    /// Wrap an existing worker name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Generate a fresh name for a worker of the given image class.
    pub fn generate(class: &ImageClass) -> Self {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Self(format!("{}-{}", class.as_str(), &suffix[..6]))
    }

    /// Get the worker name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for WorkerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WorkerName({})", self.0)
    }
}

/// Store-assigned identifier of a test case row.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TestCaseId(i64);

impl TestCaseId {
    /// Create a TestCaseId from the raw row id.
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the raw row id.
    pub const fn value(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for TestCaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for TestCaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TestCaseId({})", self.0)
    }
}

/// Handle of one armed watchdog timer.
///
/// Every arm produces a new handle, so a timeout event carrying an older
/// handle can be recognised as stale.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WatchdogRef(uuid::Uuid);

impl WatchdogRef {
    /// Create a new random WatchdogRef.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Parse a handle from its string form.
    pub fn parse(s: &str) -> Option<Self> {
        uuid::Uuid::parse_str(s).ok().map(Self)
    }
}

impl Default for WatchdogRef {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WatchdogRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for WatchdogRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WatchdogRef({})", &self.0.simple().to_string()[..8])
    }
}
