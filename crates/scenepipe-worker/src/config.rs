//! Worker configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Root of the local artifact directory
    pub data_dir: PathBuf,
    /// Timeout for a single artifact download
    pub download_timeout: Duration,
    /// Maximum concurrent frame downloads per SfM result
    pub max_download_parallel: usize,
    /// How long one receive call blocks before re-checking for shutdown
    pub block_timeout: Duration,
    /// Whether the NeRF consumer acknowledges successfully handled results
    pub nerf_ack_on_success: bool,
    /// Prometheus listener address, disabled when unset
    pub metrics_addr: Option<SocketAddr>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            download_timeout: Duration::from_secs(120),
            max_download_parallel: 4,
            block_timeout: Duration::from_millis(1000),
            nerf_ack_on_success: true,
            metrics_addr: None,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            data_dir: std::env::var("WORKER_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data")),
            download_timeout: Duration::from_secs(
                std::env::var("WORKER_DOWNLOAD_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(120),
            ),
            max_download_parallel: std::env::var("WORKER_MAX_DOWNLOAD_PARALLEL")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(4),
            block_timeout: Duration::from_millis(
                std::env::var("WORKER_BLOCK_TIMEOUT_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(1000),
            ),
            nerf_ack_on_success: std::env::var("NERF_ACK_ON_SUCCESS")
                .ok()
                .and_then(|s| parse_bool(&s))
                .unwrap_or(true),
            metrics_addr: std::env::var("METRICS_ADDR")
                .ok()
                .and_then(|s| s.parse().ok()),
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
