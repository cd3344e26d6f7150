//! Prometheus metrics for the result consumers.

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::{WorkerError, WorkerResult};

/// Start the Prometheus exporter on `addr`.
///
/// Must be called from inside a tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> WorkerResult<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| WorkerError::config_error(format!("metrics exporter: {}", e)))
}

/// Metric names as constants for consistency.
pub mod names {
    pub const MESSAGES_TOTAL: &str = "scenepipe_messages_total";
    pub const ARTIFACT_DOWNLOAD_SECONDS: &str = "scenepipe_artifact_download_seconds";
    pub const FRAMES_SAMPLED_TOTAL: &str = "scenepipe_frames_sampled_total";
}

/// Record the outcome of one delivery.
pub fn record_message(queue: &str, outcome: &str) {
    let labels = [
        ("queue", queue.to_string()),
        ("outcome", outcome.to_string()),
    ];
    counter!(names::MESSAGES_TOTAL, &labels).increment(1);
}

/// Record one artifact download.
pub fn record_download(duration: Duration) {
    histogram!(names::ARTIFACT_DOWNLOAD_SECONDS).record(duration.as_secs_f64());
}

/// Record frames kept by the sampler.
pub fn record_frames_sampled(kept: usize) {
    counter!(names::FRAMES_SAMPLED_TOTAL).increment(kept as u64);
}
