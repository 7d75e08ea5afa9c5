//! In-process messaging fabric.
//!
//! Messages are stored in their MessagePack wire form, exactly as a networked
//! fabric would carry them, and decoded on delivery.

use super::{Delivery, DeliveryHandle, MessagingFabric, Subscription};
use crate::error::FabricError;
use async_trait::async_trait;
use dashmap::DashMap;
use fleet_types::FabricMessage;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;

/// Pending messages of one topic.
#[derive(Debug, Default)]
struct TopicQueue {
    messages: Mutex<VecDeque<Vec<u8>>>,
    notify: Notify,
    closed: AtomicBool,
}

impl TopicQueue {
    fn push(&self, bytes: Vec<u8>) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(bytes);
        self.notify.notify_one();
    }

    fn pop(&self) -> Option<Vec<u8>> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    fn len(&self) -> usize {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.notify.notify_waiters();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// In-process fabric with at-least-once delivery.
#[derive(Debug)]
pub struct MemoryFabric {
    topics: DashMap<String, Arc<TopicQueue>>,
    redelivery_delay: Duration,
}

impl MemoryFabric {
    /// Create a fabric that redelivers unacknowledged messages after `redelivery_delay`.
    pub fn new(redelivery_delay: Duration) -> Self {
        Self {
            topics: DashMap::new(),
            redelivery_delay,
        }
    }

    /// Whether a topic exists.
    pub fn has_topic(&self, topic: &str) -> bool {
        self.topics.contains_key(topic)
    }

    /// Number of existing topics.
    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    /// Messages waiting in a topic (excluding those out for delivery).
    pub fn pending(&self, topic: &str) -> usize {
        self.topics.get(topic).map(|q| q.len()).unwrap_or(0)
    }

    fn queue(&self, topic: &str) -> Result<Arc<TopicQueue>, FabricError> {
        self.topics
            .get(topic)
            .map(|q| Arc::clone(q.value()))
            .ok_or_else(|| FabricError::TopicNotFound(topic.to_string()))
    }
}

#[async_trait]
impl MessagingFabric for MemoryFabric {
    async fn create_topic(&self, topic: &str) -> Result<(), FabricError> {
        match self.topics.entry(topic.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(FabricError::TopicExists(topic.to_string()))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(Arc::new(TopicQueue::default()));
                tracing::debug!("Created topic {}", topic);
                Ok(())
            }
        }
    }

    async fn delete_topic(&self, topic: &str) -> Result<bool, FabricError> {
        match self.topics.remove(topic) {
            Some((_, queue)) => {
                queue.close();
                tracing::debug!("Deleted topic {}", topic);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn publish(&self, topic: &str, message: FabricMessage) -> Result<(), FabricError> {
        let bytes = message.to_bytes().map_err(FabricError::Codec)?;
        self.queue(topic)?.push(bytes);
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<Box<dyn Subscription>, FabricError> {
        Ok(Box::new(MemorySubscription {
            queue: self.queue(topic)?,
            redelivery_delay: self.redelivery_delay,
        }))
    }
}

struct MemorySubscription {
    queue: Arc<TopicQueue>,
    redelivery_delay: Duration,
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next(&mut self) -> Option<Delivery> {
        loop {
            let notified = self.queue.notify.notified();

            if self.queue.is_closed() {
                return None;
            }

            if let Some(bytes) = self.queue.pop() {
                match FabricMessage::from_bytes(&bytes) {
                    Ok(message) => {
                        let handle = MemoryDeliveryHandle {
                            queue: Arc::clone(&self.queue),
                            bytes,
                            redelivery_delay: self.redelivery_delay,
                        };
                        return Some(Delivery::new(message, Box::new(handle)));
                    }
                    Err(e) => {
                        // Undecodable bytes can never be handled; drop them.
                        tracing::error!("Dropping undecodable message: {}", e);
                        continue;
                    }
                }
            }

            notified.await;
        }
    }
}

struct MemoryDeliveryHandle {
    queue: Arc<TopicQueue>,
    bytes: Vec<u8>,
    redelivery_delay: Duration,
}

impl DeliveryHandle for MemoryDeliveryHandle {
    fn ack(self: Box<Self>) {}

    fn nack(self: Box<Self>) {
        let MemoryDeliveryHandle {
            queue,
            bytes,
            redelivery_delay,
        } = *self;

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    tokio::time::sleep(redelivery_delay).await;
                    queue.push(bytes);
                });
            }
            Err(_) => queue.push(bytes),
        }
    }
}
