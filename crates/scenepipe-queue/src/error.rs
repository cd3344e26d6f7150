//! Queue error types.

use std::time::Duration;

use thiserror::Error;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Broker unreachable after {waited:?} ({attempts} attempts)")]
    ConnectDeadlineExceeded { waited: Duration, attempts: u64 },

    #[error("Ack failed: {0}")]
    AckFailed(String),

    #[error("Invalid job: {0}")]
    InvalidJob(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl QueueError {
    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::ConnectionFailed(msg.into())
    }

    pub fn ack_failed(msg: impl Into<String>) -> Self {
        Self::AckFailed(msg.into())
    }

    pub fn invalid_job(msg: impl Into<String>) -> Self {
        Self::InvalidJob(msg.into())
    }

    /// Transport-level failure: the broker could not be reached or dropped
    /// the connection. Only these are retried while connecting.
    pub fn is_connection_error(&self) -> bool {
        match self {
            QueueError::ConnectionFailed(_) => true,
            QueueError::Redis(e) => {
                e.is_connection_refusal()
                    || e.is_connection_dropped()
                    || e.is_io_error()
                    || e.is_timeout()
            }
            _ => false,
        }
    }
}
