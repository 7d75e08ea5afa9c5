//! Error types for the fleet orchestrator.

use fleet_types::{ProtocolError, TestCaseId, WorkerName};
use std::path::PathBuf;

/// Main error type for orchestrator operations.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// An inbound message violated the event protocol.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Messaging fabric error.
    #[error("fabric error: {0}")]
    Fabric(#[from] FabricError),

    /// Worker infrastructure error.
    #[error("compute error: {0}")]
    Compute(#[from] ComputeError),

    /// Timer service error.
    #[error("watchdog error: {0}")]
    Watchdog(#[from] WatchdogError),

    /// The pool launched this worker but the engine has not registered it yet.
    ///
    /// The event is left unacknowledged and handled again on redelivery.
    #[error("worker not registered yet: {0}")]
    UnknownWorker(WorkerName),
}

/// Storage layer errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A row that must exist exactly once did not.
    #[error("store inconsistency for test case {id}: {reason}")]
    Inconsistent {
        /// The test case concerned.
        id: TestCaseId,
        /// What was found instead.
        reason: String,
    },

    /// A persisted status string is not a known status.
    #[error("invalid status in store: {0}")]
    InvalidStatus(String),

    /// Database path error.
    #[error("invalid database path: {path}")]
    InvalidPath {
        /// The invalid path.
        path: PathBuf,
    },
}

/// Messaging fabric errors.
#[derive(Debug, thiserror::Error)]
pub enum FabricError {
    /// Publishing or subscribing to a topic that does not exist.
    #[error("topic not found: {0}")]
    TopicNotFound(String),

    /// Creating a topic that already exists.
    #[error("topic already exists: {0}")]
    TopicExists(String),

    /// A message could not be encoded or decoded.
    #[error("message codec error: {0}")]
    Codec(#[source] ProtocolError),
}

/// Worker infrastructure errors.
#[derive(Debug, thiserror::Error)]
pub enum ComputeError {
    /// Creating a worker failed.
    #[error("failed to create worker {worker}: {reason}")]
    Create {
        /// Worker being created.
        worker: WorkerName,
        /// Failure detail.
        reason: String,
    },

    /// Deleting a worker failed.
    #[error("failed to delete worker {worker}: {reason}")]
    Delete {
        /// Worker being deleted.
        worker: WorkerName,
        /// Failure detail.
        reason: String,
    },

    /// Resetting a worker failed.
    #[error("failed to reset worker {worker}: {reason}")]
    Reset {
        /// Worker being reset.
        worker: WorkerName,
        /// Failure detail.
        reason: String,
    },

    /// The infrastructure command could not be started.
    #[error("failed to run {program}: {source}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A command template is empty.
    #[error("empty {0} command template")]
    EmptyTemplate(&'static str),
}

/// Timer service errors.
#[derive(Debug, thiserror::Error)]
pub enum WatchdogError {
    /// The timer service was shut down.
    #[error("watchdog shut down, cannot arm timer for {0}")]
    Closed(WorkerName),
}

/// Result type alias for orchestrator operations.
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Result type alias for compute operations.
pub type ComputeResult<T> = std::result::Result<T, ComputeError>;
