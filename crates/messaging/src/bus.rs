//! Publish/subscribe with consumer groups and at-least-once delivery.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};

use crate::error::BusError;
use crate::message::Message;

/// Publishes messages to the topic named in [`Message::topic`].
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Returns once the bus has durably accepted the message.
    async fn publish(&self, message: Message) -> Result<(), BusError>;
}

/// Opens consumer-group subscriptions.
#[async_trait]
pub trait Subscriber: Send + Sync {
    /// Joins `group` on `topic`.
    ///
    /// Every group receives every message of the topic. Subscriptions that
    /// share a group compete for its messages.
    async fn subscribe(&self, topic: &str, group: &str) -> Result<Subscription, BusError>;
}

#[async_trait]
impl<P: Publisher + ?Sized> Publisher for Arc<P> {
    async fn publish(&self, message: Message) -> Result<(), BusError> {
        (**self).publish(message).await
    }
}

#[derive(Debug)]
struct Pending {
    message: Message,
    attempt: u32,
}

/// A consumer group's view of a topic.
pub struct Subscription {
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<Pending>>>,
    requeue: mpsc::UnboundedSender<Pending>,
}

impl Subscription {
    /// Waits for the next delivery.
    pub async fn next(&self) -> Option<Delivery> {
        let pending = self.receiver.lock().await.recv().await?;
        Some(Delivery {
            message: pending.message,
            attempt: pending.attempt,
            requeue: Some(self.requeue.clone()),
        })
    }
}

/// A message handed to one subscriber of a group.
///
/// The delivery must be settled with [`ack`](Delivery::ack) or
/// [`nack`](Delivery::nack). An unsettled delivery that is dropped, for
/// example because its consumer shut down, is redelivered to the group.
#[derive(Debug)]
pub struct Delivery {
    message: Message,
    attempt: u32,
    requeue: Option<mpsc::UnboundedSender<Pending>>,
}

impl Delivery {
    /// The delivered message.
    pub fn message(&self) -> &Message {
        &self.message
    }

    /// Starts at 1 and grows with every redelivery to the group.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Settles the delivery; the group will not see this copy again.
    pub fn ack(mut self) {
        self.requeue = None;
    }

    /// Returns the message to the group for redelivery.
    pub fn nack(mut self) {
        self.redeliver();
    }

    fn redeliver(&mut self) {
        if let Some(requeue) = self.requeue.take() {
            // The receiver lives as long as the bus; a send can only fail
            // after the bus itself was dropped.
            let _ = requeue.send(Pending {
                message: self.message.clone(),
                attempt: self.attempt.saturating_add(1),
            });
        }
    }
}

impl Drop for Delivery {
    fn drop(&mut self) {
        self.redeliver();
    }
}

struct Group {
    sender: mpsc::UnboundedSender<Pending>,
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<Pending>>>,
}

#[derive(Default)]
struct Topic {
    log: Vec<Message>,
    groups: HashMap<String, Group>,
}

/// In-memory bus for tests and single-process deployments.
///
/// A message reaches the groups subscribed when it is published. Messages
/// for a topic nobody has joined yet are dropped unless the bus was built
/// [`with_history`](InMemoryBus::with_history).
#[derive(Clone, Default)]
pub struct InMemoryBus {
    topics: Arc<Mutex<HashMap<String, Topic>>>,
    fail_publish: Arc<AtomicBool>,
    keep_history: bool,
}

impl InMemoryBus {
    /// Creates a bus that holds no message once it has been handed to the
    /// subscribed groups.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a bus that keeps every published message.
    ///
    /// A group that joins late first receives everything published before
    /// it subscribed, and [`published`](InMemoryBus::published) reports the
    /// full log. Memory grows with every publish.
    pub fn with_history() -> Self {
        Self {
            keep_history: true,
            ..Self::default()
        }
    }

    /// Makes every publish fail until reset.
    pub fn set_fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// Every message published to `topic`, in publish order.
    ///
    /// Always empty on a bus built without history.
    pub async fn published(&self, topic: &str) -> Vec<Message> {
        self.topics
            .lock()
            .await
            .get(topic)
            .map(|topic| topic.log.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Publisher for InMemoryBus {
    async fn publish(&self, message: Message) -> Result<(), BusError> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(BusError::Unavailable("publishing disabled".to_string()));
        }

        let mut topics = self.topics.lock().await;
        let topic = topics.entry(message.topic.clone()).or_default();
        for group in topic.groups.values() {
            let _ = group.sender.send(Pending {
                message: message.clone(),
                attempt: 1,
            });
        }
        if self.keep_history {
            topic.log.push(message);
        }
        Ok(())
    }
}

#[async_trait]
impl Subscriber for InMemoryBus {
    async fn subscribe(&self, topic: &str, group: &str) -> Result<Subscription, BusError> {
        let mut topics = self.topics.lock().await;
        let topic = topics.entry(topic.to_string()).or_default();

        if !topic.groups.contains_key(group) {
            let (sender, receiver) = mpsc::unbounded_channel();
            for message in &topic.log {
                let _ = sender.send(Pending {
                    message: message.clone(),
                    attempt: 1,
                });
            }
            topic.groups.insert(
                group.to_string(),
                Group {
                    sender,
                    receiver: Arc::new(Mutex::new(receiver)),
                },
            );
        }

        let group = &topic.groups[group];
        Ok(Subscription {
            receiver: Arc::clone(&group.receiver),
            requeue: group.sender.clone(),
        })
    }
}
