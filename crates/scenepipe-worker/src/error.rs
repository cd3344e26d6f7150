//! Worker error types.

use thiserror::Error;

use scenepipe_queue::QueueError;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("No usable frames: {0}")]
    NoUsableFrames(String),

    #[error("Persistence failed: {0}")]
    Persistence(String),

    #[error("Handler panicked: {0}")]
    Panicked(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn download_failed(msg: impl Into<String>) -> Self {
        Self::DownloadFailed(msg.into())
    }

    pub fn invalid_payload(msg: impl Into<String>) -> Self {
        Self::InvalidPayload(msg.into())
    }

    pub fn no_usable_frames(msg: impl Into<String>) -> Self {
        Self::NoUsableFrames(msg.into())
    }

    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::Persistence(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Whether a redelivery of the same message could succeed.
    ///
    /// Only used for logging: every failed message is left unacknowledged
    /// and comes back until it is dead-lettered.
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkerError::DownloadFailed(_)
            | WorkerError::Persistence(_)
            | WorkerError::Http(_)
            | WorkerError::Io(_) => true,
            WorkerError::Queue(e) => e.is_connection_error(),
            _ => false,
        }
    }
}
