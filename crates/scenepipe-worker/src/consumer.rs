//! Result consumer loop.
//!
//! One consumer owns one broker connection and one result queue. Messages
//! are handled one at a time; a failure or panic while handling a message
//! leaves that message unacknowledged for redelivery and the loop moves on.

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::watch;
use tracing::{error, info, warn};

use scenepipe_models::JobId;
use scenepipe_queue::{connect_with_deadline, Broker, BrokerConfig, Connector, Delivery, QueueResult};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::metrics;

/// Handles the payload of one result queue.
#[async_trait]
pub trait ResultHandler: Send + Sync {
    /// Queue this handler consumes.
    fn queue(&self) -> &'static str;

    /// Handle one payload, returning the job id it belonged to.
    ///
    /// Must be safe to call again with the same payload: every result can be
    /// delivered more than once.
    async fn handle(&self, payload: &str) -> WorkerResult<JobId>;
}

/// Consumer loop settings.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// How long one receive blocks before the stop flag is re-checked
    pub block_timeout: Duration,
    /// Acknowledge messages whose handler succeeded
    pub ack_on_success: bool,
    /// Deliveries after which a message is dead-lettered instead of handled
    pub max_deliveries: u64,
    /// Startup connection deadline
    pub connect_deadline: Duration,
    /// Pause after a failed receive
    pub error_backoff: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            block_timeout: Duration::from_secs(1),
            ack_on_success: true,
            max_deliveries: 5,
            connect_deadline: Duration::from_secs(120),
            error_backoff: Duration::from_secs(5),
        }
    }
}

impl ConsumerConfig {
    pub fn new(broker: &BrokerConfig, worker: &WorkerConfig) -> Self {
        Self {
            block_timeout: worker.block_timeout,
            max_deliveries: broker.max_deliveries,
            connect_deadline: broker.connect_deadline,
            ..Default::default()
        }
    }

    pub fn with_ack_on_success(mut self, ack_on_success: bool) -> Self {
        self.ack_on_success = ack_on_success;
        self
    }
}

/// Lifecycle of a consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Connecting,
    Subscribed,
    Processing,
    Stopped,
}

impl ConsumerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsumerState::Connecting => "connecting",
            ConsumerState::Subscribed => "subscribed",
            ConsumerState::Processing => "processing",
            ConsumerState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for ConsumerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened to one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Handled and acknowledged
    Acked,
    /// Handled, acknowledgement disabled
    Unacked,
    /// Handler failed or panicked; left for redelivery
    Failed,
    /// Over the delivery limit; moved to the dead letter queue
    DeadLettered,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Acked => "acked",
            Outcome::Unacked => "unacked",
            Outcome::Failed => "failed",
            Outcome::DeadLettered => "dead_lettered",
        }
    }
}

/// Counters over a consumer's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub received: u64,
    pub acked: u64,
    pub unacked: u64,
    pub failed: u64,
    pub dead_lettered: u64,
}

impl ConsumerStats {
    fn record(&mut self, outcome: Outcome) {
        self.received += 1;
        match outcome {
            Outcome::Acked => self.acked += 1,
            Outcome::Unacked => self.unacked += 1,
            Outcome::Failed => self.failed += 1,
            Outcome::DeadLettered => self.dead_lettered += 1,
        }
    }
}

/// Consumes one result queue until shutdown.
pub struct ResultConsumer<B: Broker, H: ResultHandler> {
    broker: B,
    handler: H,
    config: ConsumerConfig,
    shutdown: watch::Receiver<bool>,
    state: ConsumerState,
    stats: ConsumerStats,
}

impl<B: Broker, H: ResultHandler> ResultConsumer<B, H> {
    /// Open a dedicated connection and declare the handler's queue.
    ///
    /// Fails with [`scenepipe_queue::QueueError::ConnectDeadlineExceeded`] if
    /// the broker stays unreachable for `config.connect_deadline`.
    pub async fn connect<C>(
        connector: &C,
        handler: H,
        config: ConsumerConfig,
        shutdown: watch::Receiver<bool>,
    ) -> QueueResult<Self>
    where
        C: Connector<Broker = B>,
    {
        let queue = handler.queue();
        info!(queue, state = %ConsumerState::Connecting, "Consumer state changed");

        let broker = connect_with_deadline(connector, &[queue], config.connect_deadline).await?;

        let mut consumer = Self {
            broker,
            handler,
            config,
            shutdown,
            state: ConsumerState::Connecting,
            stats: ConsumerStats::default(),
        };
        consumer.set_state(ConsumerState::Subscribed);
        Ok(consumer)
    }

    pub fn state(&self) -> ConsumerState {
        self.state
    }

    pub fn stats(&self) -> ConsumerStats {
        self.stats
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Consume until the shutdown flag is set or its sender is dropped.
    ///
    /// A message being handled when shutdown arrives is finished first.
    /// Unacknowledged work is then released to the broker.
    pub async fn run(mut self) -> ConsumerStats {
        let queue = self.handler.queue();

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            let received = tokio::select! {
                changed = self.shutdown.changed() => match changed {
                    Ok(()) => continue,
                    Err(_) => break,
                },
                received = self.broker.receive(queue, self.config.block_timeout) => received,
            };

            match received {
                Ok(Some(delivery)) => {
                    self.process(delivery).await;
                }
                Ok(None) => {}
                Err(e) => {
                    error!(queue, "Error receiving from queue: {}", e);
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.error_backoff) => {}
                        _ = self.shutdown.changed() => {}
                    }
                }
            }
        }

        self.stop().await
    }

    /// Wait up to one block timeout for a message and handle it.
    pub async fn process_next(&mut self) -> QueueResult<Option<Outcome>> {
        let queue = self.handler.queue();
        match self.broker.receive(queue, self.config.block_timeout).await? {
            Some(delivery) => Ok(Some(self.process(delivery).await)),
            None => Ok(None),
        }
    }

    async fn process(&mut self, delivery: Delivery) -> Outcome {
        self.set_state(ConsumerState::Processing);

        let outcome = self.handle_delivery(&delivery).await;
        self.stats.record(outcome);
        metrics::record_message(&delivery.queue, outcome.as_str());

        self.set_state(ConsumerState::Subscribed);
        outcome
    }

    async fn handle_delivery(&mut self, delivery: &Delivery) -> Outcome {
        if delivery.delivery_count > self.config.max_deliveries {
            let reason = format!(
                "delivered {} times, limit is {}",
                delivery.delivery_count, self.config.max_deliveries
            );
            return match self.broker.dead_letter(delivery, &reason).await {
                Ok(()) => {
                    warn!(
                        queue = %delivery.queue,
                        tag = %delivery.tag,
                        delivery_count = delivery.delivery_count,
                        "Message dead-lettered"
                    );
                    Outcome::DeadLettered
                }
                Err(e) => {
                    error!(queue = %delivery.queue, tag = %delivery.tag, "Failed to dead-letter message: {}", e);
                    Outcome::Failed
                }
            };
        }

        let result = AssertUnwindSafe(self.handler.handle(&delivery.payload))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(WorkerError::Panicked(panic_message(panic.as_ref()))));

        match result {
            Ok(job_id) if self.config.ack_on_success => match self.broker.ack(delivery).await {
                Ok(()) => {
                    info!(job_id = %job_id, queue = %delivery.queue, tag = %delivery.tag, "Result acknowledged");
                    Outcome::Acked
                }
                Err(e) => {
                    error!(job_id = %job_id, queue = %delivery.queue, tag = %delivery.tag, "Failed to acknowledge result: {}", e);
                    Outcome::Failed
                }
            },
            Ok(job_id) => {
                warn!(
                    job_id = %job_id,
                    queue = %delivery.queue,
                    tag = %delivery.tag,
                    "Result handled, acknowledgement disabled"
                );
                Outcome::Unacked
            }
            Err(e) => {
                error!(
                    queue = %delivery.queue,
                    tag = %delivery.tag,
                    delivery_count = delivery.delivery_count,
                    retryable = e.is_retryable(),
                    "Result handling failed: {}", e
                );
                Outcome::Failed
            }
        }
    }

    async fn stop(mut self) -> ConsumerStats {
        if let Err(e) = self.broker.close().await {
            warn!(queue = self.handler.queue(), "Error closing broker connection: {}", e);
        }
        self.set_state(ConsumerState::Stopped);

        let stats = self.stats;
        info!(
            queue = self.handler.queue(),
            received = stats.received,
            acked = stats.acked,
            failed = stats.failed,
            dead_lettered = stats.dead_lettered,
            "Consumer stopped"
        );
        stats
    }

    fn set_state(&mut self, state: ConsumerState) {
        self.state = state;
        info!(queue = self.handler.queue(), state = %state, "Consumer state changed");
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scenepipe_queue::{queues, MemoryConnector, QueueError};
    use tokio_test::assert_ok;

    /// Handles payloads by name: "ok:<id>", "fail", "panic".
    struct ScriptedHandler;

    #[async_trait]
    impl ResultHandler for ScriptedHandler {
        fn queue(&self) -> &'static str {
            queues::NERF_OUT
        }

        async fn handle(&self, payload: &str) -> WorkerResult<JobId> {
            match payload {
                "fail" => Err(WorkerError::download_failed("503")),
                "panic" => panic!("handler blew up"),
                other => Ok(JobId::from(other.trim_start_matches("ok:"))),
            }
        }
    }

    fn test_config() -> ConsumerConfig {
        ConsumerConfig {
            block_timeout: Duration::from_millis(20),
            connect_deadline: Duration::from_secs(1),
            error_backoff: Duration::from_millis(10),
            ..Default::default()
        }
    }

    async fn consumer(
        connector: &MemoryConnector,
        config: ConsumerConfig,
    ) -> (ResultConsumer<scenepipe_queue::MemoryBroker, ScriptedHandler>, watch::Sender<bool>) {
        let (tx, rx) = watch::channel(false);
        let consumer = assert_ok!(ResultConsumer::connect(connector, ScriptedHandler, config, rx).await);
        (consumer, tx)
    }

    #[tokio::test]
    async fn test_success_is_acked_exactly_once() {
        let connector = MemoryConnector::new();
        let tag = connector.inject(queues::NERF_OUT, "ok:a");
        let (mut consumer, _tx) = consumer(&connector, test_config()).await;

        assert_eq!(consumer.state(), ConsumerState::Subscribed);
        assert_eq!(consumer.process_next().await.unwrap(), Some(Outcome::Acked));
        assert_eq!(consumer.process_next().await.unwrap(), None);

        assert_eq!(connector.acked_tags(queues::NERF_OUT), vec![tag]);
        assert_eq!(consumer.stats().acked, 1);
    }

    #[tokio::test]
    async fn test_failure_is_not_acked_and_comes_back() {
        let connector = MemoryConnector::new();
        connector.inject(queues::NERF_OUT, "fail");
        let (mut consumer, _tx) = consumer(&connector, test_config()).await;

        assert_eq!(consumer.process_next().await.unwrap(), Some(Outcome::Failed));
        assert!(connector.acked_tags(queues::NERF_OUT).is_empty());

        // Redelivered to the same consumer.
        assert_eq!(consumer.process_next().await.unwrap(), Some(Outcome::Failed));
        assert_eq!(consumer.stats().failed, 2);
        assert_eq!(consumer.state(), ConsumerState::Subscribed);
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let connector = MemoryConnector::new();
        connector.inject(queues::NERF_OUT, "panic");
        connector.inject(queues::NERF_OUT, "ok:after");
        let (mut consumer, tx) = consumer(&connector, test_config()).await;

        assert_eq!(consumer.process_next().await.unwrap(), Some(Outcome::Failed));

        // The panicking message is redelivered until it is dead-lettered,
        // and the consumer keeps going to the next message.
        let task = tokio::spawn(consumer.run());
        tokio::time::sleep(Duration::from_millis(200)).await;
        tx.send(true).unwrap();
        let stats = task.await.unwrap();

        assert_eq!(stats.dead_lettered, 1);
        assert_eq!(stats.acked, 1);
        assert_eq!(connector.pending_payloads(&queues::dead_letter(queues::NERF_OUT)).len(), 1);
    }

    #[tokio::test]
    async fn test_dead_letter_after_max_deliveries() {
        let connector = MemoryConnector::new();
        connector.inject(queues::NERF_OUT, "fail");
        let config = ConsumerConfig {
            max_deliveries: 2,
            ..test_config()
        };
        let (mut consumer, _tx) = consumer(&connector, config).await;

        assert_eq!(consumer.process_next().await.unwrap(), Some(Outcome::Failed));
        assert_eq!(consumer.process_next().await.unwrap(), Some(Outcome::Failed));
        assert_eq!(consumer.process_next().await.unwrap(), Some(Outcome::DeadLettered));
        assert_eq!(consumer.process_next().await.unwrap(), None);

        let parked = connector.pending_payloads(&queues::dead_letter(queues::NERF_OUT));
        assert_eq!(parked.len(), 1);
        assert!(parked[0].contains("fail"));
    }

    #[tokio::test]
    async fn test_ack_disabled_leaves_message_pending() {
        let connector = MemoryConnector::new();
        connector.inject(queues::NERF_OUT, "ok:b");
        let config = test_config().with_ack_on_success(false);
        let (mut consumer, _tx) = consumer(&connector, config).await;

        assert_eq!(consumer.process_next().await.unwrap(), Some(Outcome::Unacked));
        assert!(connector.acked_tags(queues::NERF_OUT).is_empty());
        assert_eq!(consumer.process_next().await.unwrap(), Some(Outcome::Unacked));
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown_and_releases_work() {
        let connector = MemoryConnector::new();
        let (consumer, tx) = consumer(&connector, test_config()).await;

        let task = tokio::spawn(consumer.run());
        connector.inject(queues::NERF_OUT, "ok:c");
        tokio::time::sleep(Duration::from_millis(100)).await;

        tx.send(true).unwrap();
        let stats = task.await.unwrap();

        assert_eq!(stats.received, 1);
        assert_eq!(stats.acked, 1);
        assert!(connector.pending_payloads(queues::NERF_OUT).is_empty());
    }

    /// Signals when handling starts, then holds until released.
    struct GatedHandler {
        started: tokio::sync::Mutex<Option<tokio::sync::oneshot::Sender<()>>>,
        release: tokio::sync::Mutex<Option<tokio::sync::oneshot::Receiver<()>>>,
    }

    #[async_trait]
    impl ResultHandler for GatedHandler {
        fn queue(&self) -> &'static str {
            queues::NERF_OUT
        }

        async fn handle(&self, payload: &str) -> WorkerResult<JobId> {
            if let Some(started) = self.started.lock().await.take() {
                let _ = started.send(());
            }
            if let Some(release) = self.release.lock().await.take() {
                let _ = release.await;
            }
            Ok(JobId::from(payload.trim_start_matches("ok:")))
        }
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_message_in_flight() {
        let connector = MemoryConnector::new();
        let tag = connector.inject(queues::NERF_OUT, "ok:slow");
        connector.inject(queues::NERF_OUT, "ok:later");

        let (started_tx, started_rx) = tokio::sync::oneshot::channel();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel();
        let handler = GatedHandler {
            started: tokio::sync::Mutex::new(Some(started_tx)),
            release: tokio::sync::Mutex::new(Some(release_rx)),
        };
        let (tx, rx) = watch::channel(false);
        let consumer = assert_ok!(ResultConsumer::connect(&connector, handler, test_config(), rx).await);

        let task = tokio::spawn(consumer.run());
        assert_ok!(started_rx.await);

        tx.send(true).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!task.is_finished());

        release_tx.send(()).unwrap();
        let stats = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(stats.received, 1);
        assert_eq!(stats.acked, 1);
        assert_eq!(connector.acked_tags(queues::NERF_OUT), vec![tag]);
    }

    #[tokio::test]
    async fn test_run_stops_when_shutdown_sender_dropped() {
        let connector = MemoryConnector::new();
        let (consumer, tx) = consumer(&connector, test_config()).await;

        let task = tokio::spawn(consumer.run());
        drop(tx);

        let stats = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stats, ConsumerStats::default());
    }

    #[tokio::test]
    async fn test_connect_gives_up_after_deadline() {
        let connector = MemoryConnector::new().never_reachable();
        let (_tx, rx) = watch::channel(false);
        let config = ConsumerConfig {
            connect_deadline: Duration::from_millis(50),
            ..test_config()
        };

        let result = ResultConsumer::connect(&connector, ScriptedHandler, config, rx).await;
        assert!(matches!(result, Err(QueueError::ConnectDeadlineExceeded { .. })));
    }
}
