//! Messages moved by the messaging fabric.
//!
//! Every message is a small opaque body plus a string attribute map. The
//! orchestrator interprets inbound messages as [`WorkerEvent`]s purely from
//! their attributes; outbound assignments are [`Dispatch`]es.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{ImageClass, Outcome, ProtocolError, WatchdogRef, WorkerName};

/// Attribute names used on the wire.
pub mod attributes {
    /// Worker the message concerns. Present on every inbound message.
    pub const WORKER_NAME: &str = "workerName";
    /// Worker-reported status. Absent on timer-originated messages.
    pub const STATUS: &str = "status";
    /// Per-worker topic announced with READY.
    pub const WORKER_TOPIC: &str = "workerTopic";
    /// Handle of the watchdog timer that fired.
    pub const WATCHDOG_REF: &str = "watchdogRef";
    /// Flag string of a dispatched test case.
    pub const TEST_FLAGS: &str = "testFlags";
    /// Artifact reference of a dispatched test case.
    pub const PAYLOAD: &str = "payload";
    /// Image class of the worker, informational.
    pub const IMAGE_CLASS: &str = "imageClass";
}

/// Status value a worker sends once it is ready for work.
pub const STATUS_READY: &str = "READY";

/// A message as carried by the fabric.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FabricMessage {
    /// Opaque body. The orchestrator protocol carries everything in attributes.
    pub data: Vec<u8>,
    /// String attributes.
    pub attributes: BTreeMap<String, String>,
}

impl FabricMessage {
    /// Create an empty message.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style attribute setter.
    pub fn with_attribute(mut self, key: &str, value: impl Into<String>) -> Self {
        self.attributes.insert(key.to_string(), value.into());
        self
    }

    /// Look up an attribute.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Serialize to MessagePack bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        rmp_serde::to_vec(self).map_err(ProtocolError::Serialization)
    }

    /// Deserialize from MessagePack bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        rmp_serde::from_slice(bytes).map_err(ProtocolError::Deserialization)
    }
}

/// Discriminant of a [`WorkerEvent`], used for logging and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Worker announced readiness.
    Ready,
    /// Worker reported an outcome.
    Result,
    /// Watchdog deadline elapsed.
    Timeout,
}

/// A typed inbound event for the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    /// Worker finished booting (or resetting) and listens on `result_channel`.
    Ready {
        /// Worker that is ready.
        worker: WorkerName,
        /// Per-worker topic the next dispatch goes to.
        result_channel: String,
    },
    /// Worker finished its assigned test case.
    Result {
        /// Worker reporting.
        worker: WorkerName,
        /// Classification of the run.
        outcome: Outcome,
    },
    /// No qualifying event arrived before the worker's deadline.
    Timeout {
        /// Worker that timed out.
        worker: WorkerName,
        /// Timer that fired, when the timer service supplied it.
        watchdog: Option<WatchdogRef>,
    },
}

impl WorkerEvent {
    /// The worker this event concerns.
    pub fn worker(&self) -> &WorkerName {
        match self {
            Self::Ready { worker, .. } | Self::Result { worker, .. } | Self::Timeout { worker, .. } => {
                worker
            }
        }
    }

    /// The kind of event.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Ready { .. } => EventKind::Ready,
            Self::Result { .. } => EventKind::Result,
            Self::Timeout { .. } => EventKind::Timeout,
        }
    }

    /// Encode as a fabric message, the way workers and timers publish it.
    pub fn to_message(&self) -> FabricMessage {
        let msg = FabricMessage::new().with_attribute(attributes::WORKER_NAME, self.worker().as_str());
        match self {
            Self::Ready { result_channel, .. } => msg
                .with_attribute(attributes::STATUS, STATUS_READY)
                .with_attribute(attributes::WORKER_TOPIC, result_channel.clone()),
            Self::Result { outcome, .. } => msg.with_attribute(attributes::STATUS, outcome.as_str()),
            Self::Timeout { watchdog, .. } => match watchdog {
                Some(handle) => msg.with_attribute(attributes::WATCHDOG_REF, handle.to_string()),
                None => msg,
            },
        }
    }
}

impl TryFrom<&FabricMessage> for WorkerEvent {
    type Error = ProtocolError;

    fn try_from(msg: &FabricMessage) -> Result<Self, Self::Error> {
        let worker = msg
            .attribute(attributes::WORKER_NAME)
            .map(WorkerName::new)
            .ok_or(ProtocolError::MissingAttribute {
                attribute: attributes::WORKER_NAME,
                context: "inbound event",
            })?;

        let Some(status) = msg.attribute(attributes::STATUS) else {
            let watchdog = match msg.attribute(attributes::WATCHDOG_REF) {
                Some(raw) => Some(WatchdogRef::parse(raw).ok_or_else(|| {
                    ProtocolError::InvalidAttribute {
                        attribute: attributes::WATCHDOG_REF,
                        value: raw.to_string(),
                    }
                })?),
                None => None,
            };
            return Ok(Self::Timeout { worker, watchdog });
        };

        match status {
            STATUS_READY => {
                let result_channel = msg
                    .attribute(attributes::WORKER_TOPIC)
                    .ok_or(ProtocolError::MissingAttribute {
                        attribute: attributes::WORKER_TOPIC,
                        context: "READY",
                    })?
                    .to_string();
                Ok(Self::Ready {
                    worker,
                    result_channel,
                })
            }
            "DETECTED" => Ok(Self::Result {
                worker,
                outcome: Outcome::Detected,
            }),
            "NOT_DETECTED" => Ok(Self::Result {
                worker,
                outcome: Outcome::NotDetected,
            }),
            other => Err(ProtocolError::UnknownStatus(other.to_string())),
        }
    }
}

/// Assignment of a test case, published on a worker's own topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatch {
    /// Flag string to execute the artifact with.
    pub flags: String,
    /// Reference to the artifact to fetch and execute.
    pub artifact: String,
}

impl Dispatch {
    /// Encode as a fabric message.
    pub fn to_message(&self, class: &ImageClass) -> FabricMessage {
        FabricMessage::new()
            .with_attribute(attributes::TEST_FLAGS, self.flags.clone())
            .with_attribute(attributes::PAYLOAD, self.artifact.clone())
            .with_attribute(attributes::IMAGE_CLASS, class.as_str())
    }

    /// Decode from a fabric message, as a worker does.
    pub fn from_message(msg: &FabricMessage) -> Result<Self, ProtocolError> {
        let flags = msg
            .attribute(attributes::TEST_FLAGS)
            .ok_or(ProtocolError::MissingAttribute {
                attribute: attributes::TEST_FLAGS,
                context: "dispatch",
            })?;
        let artifact = msg
            .attribute(attributes::PAYLOAD)
            .ok_or(ProtocolError::MissingAttribute {
                attribute: attributes::PAYLOAD,
                context: "dispatch",
            })?;
        Ok(Self {
            flags: flags.to_string(),
            artifact: artifact.to_string(),
        })
    }
}
