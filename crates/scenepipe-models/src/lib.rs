//! Shared data models for the ScenePipe pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Job identifiers
//! - Scene entities handed to persistence (video, reconstruction, render)
//! - Wire payloads exchanged with SfM and NeRF workers

pub mod job;
pub mod payload;
pub mod scene;

// Re-export common types
pub use job::JobId;
pub use payload::{NerfJob, NerfResult, SfmJob, SfmResult};
pub use scene::{Frame, Matrix, Nerf, Sfm, Video};
