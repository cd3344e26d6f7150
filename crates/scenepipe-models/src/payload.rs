//! Wire payloads exchanged with the SfM and NeRF workers.
//!
//! Field names are part of the worker protocol and must not change.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{Frame, JobId, Matrix, Nerf, Sfm, Video};

/// Job published on `sfm-in`: reconstruct camera poses from a video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SfmJob {
    pub id: JobId,
    /// Worker-fetchable URL of the video
    pub file_path: String,
}

/// Job published on `nerf-in`: synthesize a render from a reconstruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct NerfJob {
    pub id: JobId,
    pub vid_width: u32,
    pub vid_height: u32,
    pub intrinsic_matrix: Matrix,
    /// Frames with worker-fetchable URLs
    pub frames: Vec<Frame>,
}

/// Reconstruction delivered on `sfm-out`.
///
/// Frame counts are typically in the hundreds to thousands, before sampling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SfmResult {
    pub id: JobId,
    pub vid_width: u32,
    pub vid_height: u32,
    pub intrinsic_matrix: Matrix,
    pub frames: Vec<Frame>,
}

impl SfmResult {
    /// Split into the entities persisted for this job.
    pub fn into_entities(self) -> (JobId, Video, Sfm) {
        let video = Video::with_dimensions(self.vid_width, self.vid_height);
        let sfm = Sfm {
            intrinsic_matrix: self.intrinsic_matrix,
            frames: self.frames,
        };
        (self.id, video, sfm)
    }
}

/// Render delivered on `nerf-out`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct NerfResult {
    pub id: JobId,
    /// URL of the rendered video
    pub rendered_video_path: String,
}

impl NerfResult {
    /// Convert into the persisted render entity.
    pub fn into_entity(self) -> (JobId, Nerf) {
        let nerf = Nerf {
            rendered_video_path: self.rendered_video_path,
        };
        (self.id, nerf)
    }
}
