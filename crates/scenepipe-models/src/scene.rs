//! Scene entities handed to the persistence layer.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Row-major numeric matrix as carried on the wire.
///
/// Extrinsic matrices are 4x4 with the translation in column 3, rows 0-2.
/// Shape is only checked where the geometry is actually used.
pub type Matrix = Vec<Vec<f64>>;

/// One camera observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Frame {
    /// Image reference: a URL while in transit, a data-dir relative path once stored
    pub file_path: String,
    /// Camera pose
    pub extrinsic_matrix: Matrix,
}

impl Frame {
    pub fn new(file_path: impl Into<String>, extrinsic_matrix: Matrix) -> Self {
        Self {
            file_path: file_path.into(),
            extrinsic_matrix,
        }
    }
}

/// Uploaded video.
///
/// The upload path knows the file, the SfM result knows the dimensions, so
/// every field is optional and stores merge what is present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Video {
    /// Data-dir relative path of the uploaded file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    /// Frame width in pixels
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    /// Frame height in pixels
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

impl Video {
    /// Video known only by its stored file.
    pub fn from_file(file_path: impl Into<String>) -> Self {
        Self {
            file_path: Some(file_path.into()),
            ..Default::default()
        }
    }

    /// Video known only by its dimensions.
    pub fn with_dimensions(width: u32, height: u32) -> Self {
        Self {
            file_path: None,
            width: Some(width),
            height: Some(height),
        }
    }

    /// Upsert `other` into `self`: present fields win, absent fields keep
    /// the current value.
    pub fn merge(&mut self, other: Video) {
        if other.file_path.is_some() {
            self.file_path = other.file_path;
        }
        if other.width.is_some() {
            self.width = other.width;
        }
        if other.height.is_some() {
            self.height = other.height;
        }
    }
}

/// Reconstruction produced by the SfM worker, after down-sampling.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Sfm {
    /// Camera intrinsics shared by all frames
    pub intrinsic_matrix: Matrix,
    /// Sampled frames with local paths
    pub frames: Vec<Frame>,
}

/// Rendered output of the NeRF worker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Nerf {
    /// Data-dir relative path of the rendered video
    pub rendered_video_path: String,
}
