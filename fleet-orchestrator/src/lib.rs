//! # fleet-orchestrator
//!
//! Permutation test fleet orchestrator.
//!
//! This crate runs a finite set of test cases on a bounded, self-replenishing
//! pool of disposable workers:
//! - Assigns each test case to at most one worker at a time
//! - Detects silent workers with per-worker watchdog timers
//! - Retries lost test cases up to a bound, then marks them FAILED
//! - Destroys workers when their image class has no work left
//!
//! ## Architecture
//!
//! ```text
//!  worker ──READY/RESULT──┐          ┌──dispatch──► worker topic
//!  watchdog ──TIMEOUT─────┤          │
//!                         ▼          │
//!                 host topic ──► Orchestrator ──► WorkerPool ──► ComputeProvider
//!                                    │
//!                              ┌─────┴──────┐
//!                              │   SQLite   │
//!                              │ test_cases │
//!                              └────────────┘
//! ```
//!
//! ## Protocol
//!
//! Inbound events carry `workerName` plus either a `status` (READY with
//! `workerTopic`, DETECTED, NOT_DETECTED) or no status at all (a watchdog
//! timeout, optionally with `watchdogRef`). Dispatches carry `testFlags` and
//! `payload`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod engine;
pub mod error;
pub mod fabric;
pub mod http;
pub mod pool;
pub mod runtime;
pub mod storage;
pub mod watchdog;

pub use engine::{EngineMetrics, Handled, Orchestrator};
pub use error::{OrchestratorError, Result};
pub use runtime::{run, RunSummary};
