//! In-process broker.
//!
//! Same delivery contract as the Redis backend, for tests and single-process
//! runs: messages are handed out one at a time, stay owned by the receiving
//! connection until acknowledged, are handed to that connection again on
//! its next receive if still unacknowledged, and return to the head of the
//! queue when the connection is closed or dropped.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

use crate::broker::{Broker, Connector, Delivery};
use crate::error::{QueueError, QueueResult};
use crate::queues;

#[derive(Debug, Clone)]
struct StoredMessage {
    tag: String,
    payload: String,
    delivery_count: u64,
}

#[derive(Debug, Default)]
struct QueueState {
    ready: VecDeque<StoredMessage>,
    acked: Vec<String>,
}

#[derive(Debug, Default)]
struct Shared {
    queues: Mutex<HashMap<String, QueueState>>,
    published: Notify,
    next_tag: AtomicU64,
    connect_attempts: AtomicU64,
    reachable_from: Mutex<Option<Instant>>,
    never_reachable: std::sync::atomic::AtomicBool,
}

impl Shared {
    fn queues(&self) -> MutexGuard<'_, HashMap<String, QueueState>> {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, queue: &str, message: StoredMessage, front: bool) {
        let mut queues = self.queues();
        let state = queues.entry(queue.to_string()).or_default();
        if front {
            state.ready.push_front(message);
        } else {
            state.ready.push_back(message);
        }
        drop(queues);
        self.published.notify_waiters();
    }
}

/// Handle to an in-process broker. Clones share the same queues.
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    shared: Arc<Shared>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse connections until `delay` from now has passed.
    pub fn unreachable_for(self, delay: Duration) -> Self {
        *self
            .shared
            .reachable_from
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Instant::now() + delay);
        self
    }

    /// Refuse every connection.
    pub fn never_reachable(self) -> Self {
        self.shared.never_reachable.store(true, Ordering::SeqCst);
        self
    }

    /// Connection attempts seen so far, successful or not.
    pub fn connect_attempts(&self) -> u64 {
        self.shared.connect_attempts.load(Ordering::SeqCst)
    }

    /// Payloads waiting on `queue`, in delivery order.
    pub fn pending_payloads(&self, queue: &str) -> Vec<String> {
        self.shared
            .queues()
            .get(queue)
            .map(|q| q.ready.iter().map(|m| m.payload.clone()).collect())
            .unwrap_or_default()
    }

    /// Tags acknowledged on `queue`, in order.
    pub fn acked_tags(&self, queue: &str) -> Vec<String> {
        self.shared
            .queues()
            .get(queue)
            .map(|q| q.acked.clone())
            .unwrap_or_default()
    }

    /// Seed a message without going through a connection.
    pub fn inject(&self, queue: &str, payload: impl Into<String>) -> String {
        let tag = self.next_tag();
        self.shared.push(
            queue,
            StoredMessage {
                tag: tag.clone(),
                payload: payload.into(),
                delivery_count: 0,
            },
            false,
        );
        tag
    }

    fn next_tag(&self) -> String {
        let n = self.shared.next_tag.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{}-0", n)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    type Broker = MemoryBroker;

    async fn connect(&self) -> QueueResult<MemoryBroker> {
        self.shared.connect_attempts.fetch_add(1, Ordering::SeqCst);

        if self.shared.never_reachable.load(Ordering::SeqCst) {
            return Err(QueueError::connection_failed("broker unreachable"));
        }
        let reachable_from = *self
            .shared
            .reachable_from
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if reachable_from.is_some_and(|at| Instant::now() < at) {
            return Err(QueueError::connection_failed("broker not ready"));
        }

        Ok(MemoryBroker {
            connector: self.clone(),
            unacked: HashMap::new(),
        })
    }
}

/// One connection to a [`MemoryConnector`] broker.
#[derive(Debug)]
pub struct MemoryBroker {
    connector: MemoryConnector,
    /// Deliveries owned by this connection, keyed by queue
    unacked: HashMap<String, StoredMessage>,
}

impl MemoryBroker {
    fn take(&mut self, queue: &str) -> Option<Delivery> {
        // Prefetch of one: an unacknowledged message comes back first.
        if let Some(message) = self.unacked.get_mut(queue) {
            message.delivery_count += 1;
            return Some(to_delivery(queue, message));
        }

        let mut message = self
            .connector
            .shared
            .queues()
            .get_mut(queue)
            .and_then(|q| q.ready.pop_front())?;
        message.delivery_count += 1;
        let delivery = to_delivery(queue, &message);
        self.unacked.insert(queue.to_string(), message);
        Some(delivery)
    }

    fn release_unacked(&mut self) {
        for (queue, message) in self.unacked.drain() {
            debug!(queue = %queue, tag = %message.tag, "Returning unacknowledged message");
            self.connector.shared.push(&queue, message, true);
        }
    }
}

fn to_delivery(queue: &str, message: &StoredMessage) -> Delivery {
    Delivery {
        queue: queue.to_string(),
        tag: message.tag.clone(),
        payload: message.payload.clone(),
        delivery_count: message.delivery_count,
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn declare_queue(&mut self, queue: &str) -> QueueResult<()> {
        self.connector
            .shared
            .queues()
            .entry(queue.to_string())
            .or_default();
        Ok(())
    }

    async fn publish(&mut self, queue: &str, payload: &str) -> QueueResult<String> {
        Ok(self.connector.inject(queue, payload))
    }

    async fn receive(&mut self, queue: &str, block: Duration) -> QueueResult<Option<Delivery>> {
        let deadline = Instant::now() + block;
        loop {
            // Register interest before checking so a publish in between is not missed.
            let shared = Arc::clone(&self.connector.shared);
            let published = shared.published.notified();

            if let Some(delivery) = self.take(queue) {
                return Ok(Some(delivery));
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() || tokio::time::timeout(remaining, published).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn ack(&mut self, delivery: &Delivery) -> QueueResult<()> {
        let owned = self
            .unacked
            .get(&delivery.queue)
            .is_some_and(|m| m.tag == delivery.tag);
        if !owned {
            return Err(QueueError::ack_failed(format!(
                "{} is not in flight on {}",
                delivery.tag, delivery.queue
            )));
        }

        self.unacked.remove(&delivery.queue);
        self.connector
            .shared
            .queues()
            .entry(delivery.queue.clone())
            .or_default()
            .acked
            .push(delivery.tag.clone());
        Ok(())
    }

    async fn dead_letter(&mut self, delivery: &Delivery, reason: &str) -> QueueResult<()> {
        let record = serde_json::json!({
            "payload": delivery.payload,
            "error": reason,
            "original_id": delivery.tag,
            "delivery_count": delivery.delivery_count,
        });
        self.connector
            .inject(&queues::dead_letter(&delivery.queue), record.to_string());
        self.ack(delivery).await
    }

    async fn close(&mut self) -> QueueResult<()> {
        self.release_unacked();
        Ok(())
    }
}

impl Drop for MemoryBroker {
    fn drop(&mut self) {
        self.release_unacked();
    }
}
