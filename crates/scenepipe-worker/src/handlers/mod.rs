//! Handlers for the two result queues.

mod nerf;
mod sfm;

pub use nerf::NerfResultHandler;
pub use sfm::SfmResultHandler;

use crate::error::{WorkerError, WorkerResult};

fn parse<T: serde::de::DeserializeOwned>(payload: &str) -> WorkerResult<T> {
    serde_json::from_str(payload).map_err(|e| WorkerError::invalid_payload(e.to_string()))
}
