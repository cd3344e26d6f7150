//! Result ingestion for the SfM and NeRF stages.
//!
//! This crate provides:
//! - Result consumers: one broker connection and one loop per result queue
//! - SfM result handling: artifact download, frame down-sampling, persistence
//! - NeRF result handling: rendered video download and persistence
//! - The persistence collaborator interface and local stores
//! - Graceful shutdown

pub mod artifact;
pub mod config;
pub mod consumer;
pub mod error;
pub mod handlers;
pub mod logging;
pub mod metrics;
pub mod scene;

pub use artifact::{ArtifactStore, ArtifactTransfer, HttpTransfer};
pub use config::WorkerConfig;
pub use consumer::{ConsumerConfig, ConsumerState, ConsumerStats, Outcome, ResultConsumer, ResultHandler};
pub use error::{WorkerError, WorkerResult};
pub use handlers::{NerfResultHandler, SfmResultHandler};
pub use logging::{init_tracing, JobLogger};
pub use scene::{InMemorySceneStore, JsonSceneStore, PersistCall, SceneManager, SceneRecord};
