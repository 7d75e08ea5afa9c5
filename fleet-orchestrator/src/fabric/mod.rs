//! Messaging fabric: topics with at-least-once delivery.
//!
//! The orchestrator consumes one host topic; every worker gets its own topic
//! for dispatches. A [`Delivery`] that is dropped without [`Delivery::ack`]
//! is handed out again after the fabric's redelivery delay.

mod memory;

pub use memory::MemoryFabric;

use crate::error::FabricError;
use async_trait::async_trait;
use fleet_types::FabricMessage;

/// Trait for messaging fabric backends.
#[async_trait]
pub trait MessagingFabric: Send + Sync {
    /// Create a topic.
    ///
    /// Fails with [`FabricError::TopicExists`] if it already exists.
    async fn create_topic(&self, topic: &str) -> Result<(), FabricError>;

    /// Delete a topic and drop its undelivered messages.
    ///
    /// Returns `false` if the topic did not exist.
    async fn delete_topic(&self, topic: &str) -> Result<bool, FabricError>;

    /// Publish a message to a topic.
    async fn publish(&self, topic: &str, message: FabricMessage) -> Result<(), FabricError>;

    /// Subscribe to a topic.
    ///
    /// Subscribers of the same topic compete for its messages.
    async fn subscribe(&self, topic: &str) -> Result<Box<dyn Subscription>, FabricError>;
}

/// A stream of deliveries from one topic.
#[async_trait]
pub trait Subscription: Send {
    /// Wait for the next delivery.
    ///
    /// Returns `None` once the topic has been deleted.
    async fn next(&mut self) -> Option<Delivery>;
}

/// Backend side of a delivery.
pub trait DeliveryHandle: Send {
    /// Settle the delivery for good.
    fn ack(self: Box<Self>);

    /// Hand the message back for redelivery.
    fn nack(self: Box<Self>);
}

/// One delivered message awaiting acknowledgment.
pub struct Delivery {
    message: FabricMessage,
    handle: Option<Box<dyn DeliveryHandle>>,
}

impl Delivery {
    /// Wrap a message and its backend handle.
    pub fn new(message: FabricMessage, handle: Box<dyn DeliveryHandle>) -> Self {
        Self {
            message,
            handle: Some(handle),
        }
    }

    /// The delivered message.
    pub fn message(&self) -> &FabricMessage {
        &self.message
    }

    /// Acknowledge: the message will not be delivered again.
    pub fn ack(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.ack();
        }
    }

    /// Reject: the message is delivered again after the redelivery delay.
    pub fn nack(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.nack();
        }
    }
}

impl Drop for Delivery {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.nack();
        }
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("message", &self.message)
            .field("settled", &self.handle.is_none())
            .finish()
    }
}
