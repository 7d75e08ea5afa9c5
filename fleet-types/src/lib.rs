//! # fleet-types
//!
//! Wire and data types for the permutest fleet orchestrator.
//!
//! This crate provides the foundational types used across all fleet crates:
//! - [`WorkerName`], [`ImageClass`], [`TestCaseId`], [`WatchdogRef`] - Identity types
//! - [`TestCase`], [`NewTestCase`], [`TestStatus`], [`Outcome`] - Test case rows
//! - [`FabricMessage`] - Attribute-carrying message moved by the messaging fabric
//! - [`WorkerEvent`], [`Dispatch`] - Typed inbound events and outbound assignments
//! - [`ProtocolError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod ids;
mod messages;
mod test_case;

pub use error::ProtocolError;
pub use ids::{ImageClass, TestCaseId, WatchdogRef, WorkerName};
pub use messages::{
    attributes, Dispatch, EventKind, FabricMessage, WorkerEvent, STATUS_READY,
};
pub use test_case::{NewTestCase, Outcome, TestCase, TestStatus};
