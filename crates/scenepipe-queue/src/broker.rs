//! Broker abstraction.
//!
//! A [`Broker`] is one live connection. Its methods take `&mut self`: a
//! connection belongs to exactly one task for its whole life and is never
//! shared between consumers or concurrent publishers.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::QueueResult;

/// A message handed to a consumer, not yet acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Queue the message came from
    pub queue: String,
    /// Broker-assigned message id, used to acknowledge
    pub tag: String,
    /// Serialized job or result
    pub payload: String,
    /// How many times this message has been handed out, this time included
    pub delivery_count: u64,
}

/// Point-to-point durable queues with manual acknowledgement.
#[async_trait]
pub trait Broker: Send {
    /// Create the queue if missing. Idempotent.
    async fn declare_queue(&mut self, queue: &str) -> QueueResult<()>;

    /// Append a payload, returning its broker tag.
    async fn publish(&mut self, queue: &str, payload: &str) -> QueueResult<String>;

    /// Wait up to `block` for one message.
    ///
    /// At most one message is in flight per call (prefetch of one). Messages
    /// left unacknowledged past the broker's idle threshold are handed out
    /// again before new ones.
    async fn receive(&mut self, queue: &str, block: Duration) -> QueueResult<Option<Delivery>>;

    /// Remove a delivered message permanently.
    async fn ack(&mut self, delivery: &Delivery) -> QueueResult<()>;

    /// Park a message on the queue's dead letter queue and acknowledge it.
    async fn dead_letter(&mut self, delivery: &Delivery, reason: &str) -> QueueResult<()>;

    /// Release unacknowledged work back to the broker and close.
    async fn close(&mut self) -> QueueResult<()>;
}

/// Opens new broker connections.
#[async_trait]
pub trait Connector: Send + Sync {
    type Broker: Broker;

    /// One connection attempt.
    async fn connect(&self) -> QueueResult<Self::Broker>;
}
