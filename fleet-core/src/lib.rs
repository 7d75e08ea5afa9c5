//! # fleet-core
//!
//! Pure logic for the permutest fleet orchestrator (no I/O, instant tests).
//!
//! This crate implements the worker lifecycle state machine, the bounded
//! retry policy and test case generation without any store, network or timer
//! I/O.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects. The orchestrator asks a [`WorkerInstance`] what an
//! inbound event means ([`Step`]), performs the I/O that step requires, and
//! then applies the resulting transition back onto the record.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod permutations;
pub mod retry;
pub mod state;

pub use permutations::{
    flag_strings, generate, parse_images, parse_selection, BatchPin, Flag, PermutationError,
    Selection, SelectionSpec, DEFAULT_ROOT, FLAGS,
};
pub use retry::{RetryDecision, RetryPolicy, DEFAULT_MAX_RETRIES};
pub use state::{ArmedTimer, Lifecycle, Stale, Step, WorkerInstance};
