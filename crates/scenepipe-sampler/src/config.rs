//! Sampler configuration.

use crate::kmeans::{KMeansConfig, MIN_N_INIT};
use crate::selection::SelectionPolicy;

/// Frame sampler configuration.
#[derive(Debug, Clone)]
pub struct SamplerConfig {
    /// Number of clusters, i.e. the most frames that survive sampling
    pub target_count: usize,
    /// Clustering parameters
    pub kmeans: KMeansConfig,
    /// Representative choice per cluster
    pub selection: SelectionPolicy,
    /// Fixed RNG seed; `None` draws from the OS
    pub seed: Option<u64>,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            target_count: 100,
            kmeans: KMeansConfig::default(),
            selection: SelectionPolicy::default(),
            seed: None,
        }
    }
}

impl SamplerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            target_count: std::env::var("SAMPLER_TARGET_COUNT")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|&n: &usize| n > 0)
                .unwrap_or(defaults.target_count),
            kmeans: KMeansConfig {
                n_init: std::env::var("SAMPLER_N_INIT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.kmeans.n_init)
                    .max(MIN_N_INIT),
                ..defaults.kmeans
            },
            selection: std::env::var("SAMPLER_SELECTION")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.selection),
            seed: std::env::var("SAMPLER_SEED").ok().and_then(|s| s.parse().ok()),
        }
    }

    /// Set the target count. Zero is raised to one.
    pub fn with_target_count(mut self, target_count: usize) -> Self {
        self.target_count = target_count.max(1);
        self
    }

    /// Set the selection policy.
    pub fn with_selection(mut self, selection: SelectionPolicy) -> Self {
        self.selection = selection;
        self
    }

    /// Pin the RNG seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}
