//! Error types for fleet wire handling.

use thiserror::Error;

/// Errors raised while interpreting fabric messages.
///
/// Every variant is a protocol violation: the offending message cannot be
/// processed and must not be acknowledged.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A required attribute is absent for the apparent event kind.
    #[error("missing attribute '{attribute}' ({context})")]
    MissingAttribute {
        /// Name of the missing attribute.
        attribute: &'static str,
        /// What kind of message was being parsed.
        context: &'static str,
    },

    /// The `status` attribute holds a value no worker is allowed to send.
    #[error("unknown worker status: {0}")]
    UnknownStatus(String),

    /// An attribute is present but its value does not parse.
    #[error("invalid value for attribute '{attribute}': {value}")]
    InvalidAttribute {
        /// Name of the attribute.
        attribute: &'static str,
        /// Raw value received.
        value: String,
    },

    /// A stored status string is not one of the known statuses.
    #[error("unknown test case status: {0}")]
    UnknownTestStatus(String),

    /// MessagePack serialization failed
    #[error("serialization failed: {0}")]
    Serialization(#[source] rmp_serde::encode::Error),

    /// MessagePack deserialization failed
    #[error("deserialization failed: {0}")]
    Deserialization(#[source] rmp_serde::decode::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ProtocolError::MissingAttribute {
            attribute: "workerTopic",
            context: "READY",
        };
        assert_eq!(err.to_string(), "missing attribute 'workerTopic' (READY)");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ProtocolError>();
    }
}
