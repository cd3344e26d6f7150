//! Frame sampler: angular clustering with one representative per cluster.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, warn};

use scenepipe_models::Frame;

use crate::angle::{angular_coordinate, GeometryError};
use crate::config::SamplerConfig;
use crate::kmeans::{kmeans, Point};

/// A frame left out of clustering because its pose is unusable.
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedFrame {
    pub index: usize,
    pub error: GeometryError,
}

/// Outcome of sampling.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sample {
    /// Selected input indices, ascending and distinct
    pub indices: Vec<usize>,
    /// Frames skipped for bad geometry
    pub rejected: Vec<RejectedFrame>,
}

impl Sample {
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// Selects a spatially representative subset of frames.
#[derive(Debug, Clone, Default)]
pub struct FrameSampler {
    config: SamplerConfig,
}

impl FrameSampler {
    pub fn new(config: SamplerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    /// Sample with an RNG seeded from the config, or from the OS if unset.
    pub fn sample(&self, frames: &[Frame]) -> Sample {
        let mut rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        self.sample_with_rng(frames, &mut rng)
    }

    /// Sample using the given RNG for both clustering restarts and random
    /// selection.
    ///
    /// Frames whose pose fails angle computation are skipped and reported
    /// in [`Sample::rejected`]; the remaining frames are still sampled.
    pub fn sample_with_rng<R: Rng + ?Sized>(&self, frames: &[Frame], rng: &mut R) -> Sample {
        let mut points: Vec<Point> = Vec::with_capacity(frames.len());
        let mut origin: Vec<usize> = Vec::with_capacity(frames.len());
        let mut rejected = Vec::new();

        for (index, frame) in frames.iter().enumerate() {
            match angular_coordinate(&frame.extrinsic_matrix) {
                Ok(angle) => {
                    points.push(angle.as_point());
                    origin.push(index);
                }
                Err(error) => {
                    warn!(frame = index, file_path = %frame.file_path, "Skipping frame: {}", error);
                    rejected.push(RejectedFrame { index, error });
                }
            }
        }

        if points.is_empty() {
            return Sample {
                indices: Vec::new(),
                rejected,
            };
        }

        let target = self.config.target_count.max(1);
        let fit = kmeans(&points, target, &self.config.kmeans, rng);

        let mut indices: Vec<usize> = fit
            .clusters()
            .iter()
            .zip(&fit.centroids)
            .filter(|(members, _)| !members.is_empty())
            .map(|(members, centroid)| {
                let local = self.config.selection.select(members, &points, centroid, rng);
                origin[local]
            })
            .collect();
        indices.sort_unstable();

        if indices.len() < target && points.len() >= target {
            warn!(
                requested = target,
                formed = indices.len(),
                "Fewer non-empty clusters than requested"
            );
        }

        debug!(
            input = frames.len(),
            clustered = points.len(),
            selected = indices.len(),
            inertia = fit.inertia,
            policy = %self.config.selection,
            "Sampled frames"
        );

        Sample { indices, rejected }
    }
}

/// Sample `frames` down to at most `target_count` representatives using the
/// default configuration.
pub fn sample(frames: &[Frame], target_count: usize) -> Vec<usize> {
    FrameSampler::new(SamplerConfig::default().with_target_count(target_count))
        .sample(frames)
        .indices
}
