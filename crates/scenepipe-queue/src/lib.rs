//! Durable job queues for the SfM and NeRF stages.
//!
//! This crate provides:
//! - A [`Broker`] abstraction with Redis Streams and in-memory backends
//! - Startup connection gating with a retry deadline
//! - The job publisher for `sfm-in` / `nerf-in`

pub mod broker;
pub mod config;
pub mod connection;
pub mod error;
pub mod memory;
pub mod publisher;
pub mod redis_streams;

pub use broker::{Broker, Connector, Delivery};
pub use config::{BrokerConfig, PublisherConfig};
pub use connection::connect_with_deadline;
pub use error::{QueueError, QueueResult};
pub use memory::{MemoryBroker, MemoryConnector};
pub use publisher::JobPublisher;
pub use redis_streams::{RedisBroker, RedisConnector};

/// Queue names shared with the external workers.
pub mod queues {
    /// SfM jobs to workers
    pub const SFM_IN: &str = "sfm-in";
    /// NeRF jobs to workers
    pub const NERF_IN: &str = "nerf-in";
    /// SfM results from workers
    pub const SFM_OUT: &str = "sfm-out";
    /// NeRF results from workers
    pub const NERF_OUT: &str = "nerf-out";

    /// Dead letter queue for `queue`.
    pub fn dead_letter(queue: &str) -> String {
        format!("{}:dlq", queue)
    }
}
