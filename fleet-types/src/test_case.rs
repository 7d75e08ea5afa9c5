//! Test case rows and their statuses.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{ImageClass, ProtocolError, TestCaseId};

/// Execution status of a test case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TestStatus {
    /// Waiting to be claimed by a worker.
    ToStart,
    /// Claimed and dispatched to a worker.
    Running,
    /// The payload was detected.
    Detected,
    /// The payload ran without detection.
    NotDetected,
    /// Retries exhausted.
    Failed,
}

impl TestStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [TestStatus; 5] = [
        TestStatus::ToStart,
        TestStatus::Running,
        TestStatus::Detected,
        TestStatus::NotDetected,
        TestStatus::Failed,
    ];

    /// The persisted string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ToStart => "TO_START",
            Self::Running => "RUNNING",
            Self::Detected => "DETECTED",
            Self::NotDetected => "NOT_DETECTED",
            Self::Failed => "FAILED",
        }
    }

    /// Whether this status never changes again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Detected | Self::NotDetected | Self::Failed)
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TestStatus {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TO_START" => Ok(Self::ToStart),
            "RUNNING" => Ok(Self::Running),
            "DETECTED" => Ok(Self::Detected),
            "NOT_DETECTED" => Ok(Self::NotDetected),
            "FAILED" => Ok(Self::Failed),
            other => Err(ProtocolError::UnknownTestStatus(other.to_string())),
        }
    }
}

/// Result a worker reports for a finished test case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    /// The payload was detected.
    Detected,
    /// The payload was not detected.
    NotDetected,
}

impl Outcome {
    /// The wire form of this outcome.
    pub fn as_str(&self) -> &'static str {
        self.status().as_str()
    }

    /// The terminal status this outcome writes.
    pub fn status(&self) -> TestStatus {
        match self {
            Self::Detected => TestStatus::Detected,
            Self::NotDetected => TestStatus::NotDetected,
        }
    }
}

impl From<Outcome> for TestStatus {
    fn from(outcome: Outcome) -> Self {
        outcome.status()
    }
}

/// A test case row as held by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    /// Store-assigned id.
    pub id: TestCaseId,
    /// Experiment this row belongs to.
    pub experiment_name: String,
    /// Pinned flag for batch runs (`flag=value`), `None` for all-permutations runs.
    pub batch_label: Option<String>,
    /// Worker image that may run this case.
    pub image_class: ImageClass,
    /// Opaque flag string handed to the worker.
    pub flags: String,
    /// Current status.
    pub status: TestStatus,
    /// Number of timed-out attempts so far.
    pub retry_count: u32,
}

/// A test case to be inserted. Rows always start as TO_START with zero retries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTestCase {
    /// Experiment this row belongs to.
    pub experiment_name: String,
    /// Pinned flag for batch runs.
    pub batch_label: Option<String>,
    /// Worker image that may run this case.
    pub image_class: ImageClass,
    /// Opaque flag string handed to the worker.
    pub flags: String,
}
