//! Redis Streams broker.
//!
//! Each queue is a stream. Consumers read through a consumer group, so a
//! message delivered to one instance is not seen by another until it has
//! sat unacknowledged for `claim_min_idle`, at which point any instance
//! may claim it (redelivery after a crash). A message this consumer left
//! unacknowledged itself is handed back to it before anything new.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::streams::{StreamClaimReply, StreamId, StreamPendingCountReply, StreamReadReply};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::broker::{Broker, Connector, Delivery};
use crate::config::BrokerConfig;
use crate::error::{QueueError, QueueResult};
use crate::queues;

const PAYLOAD_FIELD: &str = "payload";

/// Opens [`RedisBroker`] connections.
pub struct RedisConnector {
    client: redis::Client,
    config: BrokerConfig,
}

impl RedisConnector {
    pub fn new(config: BrokerConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url())?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl Connector for RedisConnector {
    type Broker = RedisBroker;

    async fn connect(&self) -> QueueResult<RedisBroker> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;

        let consumer = format!("consumer-{}", Uuid::new_v4());
        debug!("Connected to broker as {}", consumer);

        Ok(RedisBroker {
            conn,
            group: self.config.consumer_group.clone(),
            consumer,
            claim_min_idle: self.config.claim_min_idle,
        })
    }
}

/// One Redis connection owned by one publisher or consumer.
pub struct RedisBroker {
    conn: MultiplexedConnection,
    group: String,
    consumer: String,
    claim_min_idle: Duration,
}

impl RedisBroker {
    /// Consumer name inside the group.
    pub fn consumer_name(&self) -> &str {
        &self.consumer
    }

    /// Claim one message left pending by any consumer for too long.
    async fn claim_stale(&mut self, queue: &str) -> QueueResult<Option<Delivery>> {
        let idle_ms = self.claim_min_idle.as_millis() as u64;

        let pending: StreamPendingCountReply = redis::cmd("XPENDING")
            .arg(queue)
            .arg(&self.group)
            .arg("IDLE")
            .arg(idle_ms)
            .arg("-")
            .arg("+")
            .arg(1)
            .query_async(&mut self.conn)
            .await?;

        let Some(stale) = pending.ids.into_iter().next() else {
            return Ok(None);
        };

        let claimed: StreamClaimReply = redis::cmd("XCLAIM")
            .arg(queue)
            .arg(&self.group)
            .arg(&self.consumer)
            .arg(idle_ms)
            .arg(&stale.id)
            .query_async(&mut self.conn)
            .await?;

        // Another instance may have claimed it first.
        let Some(entry) = claimed.ids.into_iter().next() else {
            return Ok(None);
        };

        info!(
            queue = queue,
            tag = %entry.id,
            previous_consumer = %stale.consumer,
            times_delivered = stale.times_delivered,
            "Reclaimed unacknowledged message"
        );
        Ok(Some(to_delivery(queue, entry, stale.times_delivered as u64 + 1)))
    }

    /// Re-read the oldest message this consumer was handed but never acked.
    async fn read_own_pending(&mut self, queue: &str) -> QueueResult<Option<Delivery>> {
        let reply: Option<StreamReadReply> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.group)
            .arg(&self.consumer)
            .arg("COUNT")
            .arg(1)
            .arg("STREAMS")
            .arg(queue)
            .arg("0") // This consumer's pending entries
            .query_async(&mut self.conn)
            .await?;

        let Some(entry) = reply
            .into_iter()
            .flat_map(|r| r.keys)
            .flat_map(|k| k.ids)
            .next()
        else {
            return Ok(None);
        };

        // The read above already bumped the counter.
        let pending: StreamPendingCountReply = redis::cmd("XPENDING")
            .arg(queue)
            .arg(&self.group)
            .arg(&entry.id)
            .arg(&entry.id)
            .arg(1)
            .arg(&self.consumer)
            .query_async(&mut self.conn)
            .await?;
        let delivery_count = pending
            .ids
            .first()
            .map(|p| p.times_delivered as u64)
            .unwrap_or(1);

        debug!(
            queue = queue,
            tag = %entry.id,
            delivery_count = delivery_count,
            "Redelivering own unacknowledged message"
        );
        Ok(Some(to_delivery(queue, entry, delivery_count)))
    }

    async fn read_new(&mut self, queue: &str, block: Duration) -> QueueResult<Option<Delivery>> {
        let reply: Option<StreamReadReply> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.group)
            .arg(&self.consumer)
            .arg("COUNT")
            .arg(1)
            .arg("BLOCK")
            .arg(block.as_millis() as u64)
            .arg("STREAMS")
            .arg(queue)
            .arg(">") // Only new messages
            .query_async(&mut self.conn)
            .await?;

        let entry = reply
            .into_iter()
            .flat_map(|r| r.keys)
            .flat_map(|k| k.ids)
            .next();

        Ok(entry.map(|e| to_delivery(queue, e, 1)))
    }
}

fn to_delivery(queue: &str, entry: StreamId, delivery_count: u64) -> Delivery {
    let payload = entry.get::<String>(PAYLOAD_FIELD).unwrap_or_else(|| {
        warn!(queue = queue, tag = %entry.id, "Stream entry has no payload field");
        String::new()
    });
    Delivery {
        queue: queue.to_string(),
        tag: entry.id,
        payload,
        delivery_count,
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn declare_queue(&mut self, queue: &str) -> QueueResult<()> {
        // Start at 0 so results published before the group existed are read.
        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(queue)
            .arg(&self.group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut self.conn)
            .await;

        match result {
            Ok(_) => info!("Created consumer group {} on {}", self.group, queue),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!("Consumer group {} already exists on {}", self.group, queue);
            }
            Err(e) => return Err(QueueError::Redis(e)),
        }
        Ok(())
    }

    async fn publish(&mut self, queue: &str, payload: &str) -> QueueResult<String> {
        let tag: String = redis::cmd("XADD")
            .arg(queue)
            .arg("*")
            .arg(PAYLOAD_FIELD)
            .arg(payload)
            .query_async(&mut self.conn)
            .await?;
        Ok(tag)
    }

    async fn receive(&mut self, queue: &str, block: Duration) -> QueueResult<Option<Delivery>> {
        if let Some(delivery) = self.read_own_pending(queue).await? {
            return Ok(Some(delivery));
        }
        if let Some(delivery) = self.claim_stale(queue).await? {
            return Ok(Some(delivery));
        }
        self.read_new(queue, block).await
    }

    async fn ack(&mut self, delivery: &Delivery) -> QueueResult<()> {
        let acked: u64 = redis::cmd("XACK")
            .arg(&delivery.queue)
            .arg(&self.group)
            .arg(&delivery.tag)
            .query_async(&mut self.conn)
            .await?;

        if acked == 0 {
            // Already acked by an instance that reclaimed it.
            warn!(queue = %delivery.queue, tag = %delivery.tag, "Message was not pending");
        }

        redis::cmd("XDEL")
            .arg(&delivery.queue)
            .arg(&delivery.tag)
            .query_async::<()>(&mut self.conn)
            .await?;

        debug!(queue = %delivery.queue, tag = %delivery.tag, "Acknowledged message");
        Ok(())
    }

    async fn dead_letter(&mut self, delivery: &Delivery, reason: &str) -> QueueResult<()> {
        redis::cmd("XADD")
            .arg(queues::dead_letter(&delivery.queue))
            .arg("*")
            .arg(PAYLOAD_FIELD)
            .arg(&delivery.payload)
            .arg("error")
            .arg(reason)
            .arg("original_id")
            .arg(&delivery.tag)
            .arg("delivery_count")
            .arg(delivery.delivery_count)
            .arg("failed_at")
            .arg(chrono::Utc::now().to_rfc3339())
            .query_async::<()>(&mut self.conn)
            .await?;

        self.ack(delivery).await?;

        warn!(
            queue = %delivery.queue,
            tag = %delivery.tag,
            "Moved message to dead letter queue: {}",
            reason
        );
        Ok(())
    }

    async fn close(&mut self) -> QueueResult<()> {
        // Pending entries stay in the group's PEL and are reclaimed by the
        // next consumer once idle; dropping the connection is all that's left.
        debug!("Closing broker connection {}", self.consumer);
        Ok(())
    }
}
