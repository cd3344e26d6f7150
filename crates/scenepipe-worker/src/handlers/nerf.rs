use std::sync::Arc;

use async_trait::async_trait;
use tracing::Instrument;

use scenepipe_models::{JobId, NerfResult};
use scenepipe_queue::queues;

use crate::artifact::{ArtifactStore, ArtifactTransfer};
use crate::consumer::ResultHandler;
use crate::error::WorkerResult;
use crate::logging::JobLogger;
use crate::scene::SceneManager;

/// Stores rendered videos from `nerf-out`.
pub struct NerfResultHandler {
    transfer: Arc<dyn ArtifactTransfer>,
    artifacts: ArtifactStore,
    scenes: Arc<dyn SceneManager>,
}

impl NerfResultHandler {
    pub fn new(
        transfer: Arc<dyn ArtifactTransfer>,
        artifacts: ArtifactStore,
        scenes: Arc<dyn SceneManager>,
    ) -> Self {
        Self {
            transfer,
            artifacts,
            scenes,
        }
    }

    async fn store(&self, result: NerfResult, logger: &JobLogger) -> WorkerResult<JobId> {
        let relative = self.artifacts.nerf_video_path(&result.id)?;
        let video = self.transfer.fetch(&result.rendered_video_path).await?;
        self.artifacts.write(&relative, &video).await?;
        logger.log_progress(&format!("rendered video saved to {}", relative));

        let (id, mut nerf) = result.into_entity();
        nerf.rendered_video_path = relative;
        self.scenes.set_nerf(&id, nerf).await?;

        logger.log_completion(&format!("{} bytes", video.len()));
        Ok(id)
    }
}

#[async_trait]
impl ResultHandler for NerfResultHandler {
    fn queue(&self) -> &'static str {
        queues::NERF_OUT
    }

    async fn handle(&self, payload: &str) -> WorkerResult<JobId> {
        let result: NerfResult = super::parse(payload)?;
        let logger = JobLogger::new(&result.id, "nerf_result");
        logger.log_start(&result.rendered_video_path);

        let span = logger.create_span();
        self.store(result, &logger)
            .instrument(span)
            .await
            .inspect_err(|e| logger.log_error(&e.to_string()))
    }
}
