use std::sync::Arc;

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use tracing::Instrument;

use scenepipe_models::{Frame, JobId, SfmResult};
use scenepipe_queue::queues;
use scenepipe_sampler::FrameSampler;

use crate::artifact::{ArtifactStore, ArtifactTransfer};
use crate::consumer::ResultHandler;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics;
use crate::scene::SceneManager;

/// Stores reconstructions from `sfm-out`.
///
/// Frames are pulled into `sfm/<id>/`, down-sampled to a spatially
/// representative subset, and persisted together with the video dimensions.
pub struct SfmResultHandler {
    transfer: Arc<dyn ArtifactTransfer>,
    artifacts: ArtifactStore,
    scenes: Arc<dyn SceneManager>,
    sampler: FrameSampler,
    max_download_parallel: usize,
}

impl SfmResultHandler {
    pub fn new(
        transfer: Arc<dyn ArtifactTransfer>,
        artifacts: ArtifactStore,
        scenes: Arc<dyn SceneManager>,
        sampler: FrameSampler,
    ) -> Self {
        Self {
            transfer,
            artifacts,
            scenes,
            sampler,
            max_download_parallel: 4,
        }
    }

    pub fn with_max_download_parallel(mut self, max: usize) -> Self {
        self.max_download_parallel = max.max(1);
        self
    }

    /// Fetch every frame and point its `file_path` at the local copy.
    async fn download_frames(&self, id: &JobId, frames: &mut [Frame]) -> WorkerResult<()> {
        let targets = self
            .artifacts
            .sfm_frame_paths(id, frames.iter().map(|f| f.file_path.as_str()))?;
        let jobs: Vec<(String, String)> = frames
            .iter()
            .map(|f| f.file_path.clone())
            .zip(targets)
            .collect();

        let downloads = jobs.into_iter().map(|(url, relative)| async move {
            let bytes = self.transfer.fetch(&url).await?;
            self.artifacts.write(&relative, &bytes).await?;
            Ok::<_, WorkerError>(relative)
        });

        let stored: Vec<String> = futures::stream::iter(downloads)
            .buffered(self.max_download_parallel)
            .try_collect()
            .await?;

        for (frame, relative) in frames.iter_mut().zip(stored) {
            frame.file_path = relative;
        }
        Ok(())
    }

    /// Keep the sampled subset of `frames`, in capture order.
    async fn sample_frames(&self, frames: Vec<Frame>, logger: &JobLogger) -> WorkerResult<Vec<Frame>> {
        let total = frames.len();
        let sampler = self.sampler.clone();
        let (frames, sample) = tokio::task::spawn_blocking(move || {
            let sample = sampler.sample(&frames);
            (frames, sample)
        })
        .await
        .map_err(|e| WorkerError::Panicked(format!("frame sampling: {}", e)))?;

        for rejected in &sample.rejected {
            logger.log_warning(&format!("frame {} skipped: {}", rejected.index, rejected.error));
        }
        if total > 0 && sample.is_empty() {
            return Err(WorkerError::no_usable_frames(format!(
                "all {} frames have unusable poses",
                total
            )));
        }

        let mut keep = sample.indices.iter().copied().peekable();
        let kept: Vec<Frame> = frames
            .into_iter()
            .enumerate()
            .filter_map(|(index, frame)| {
                if keep.peek() == Some(&index) {
                    keep.next();
                    Some(frame)
                } else {
                    None
                }
            })
            .collect();

        metrics::record_frames_sampled(kept.len());
        logger.log_progress(&format!("kept {} of {} frames", kept.len(), total));
        Ok(kept)
    }

    async fn store(&self, mut result: SfmResult, logger: &JobLogger) -> WorkerResult<JobId> {
        self.download_frames(&result.id, &mut result.frames).await?;
        logger.log_progress(&format!("downloaded {} frames", result.frames.len()));

        let frames = std::mem::take(&mut result.frames);
        result.frames = self.sample_frames(frames, logger).await?;

        let (id, video, sfm) = result.into_entities();
        let kept = sfm.frames.len();
        self.scenes.set_sfm(&id, sfm).await?;
        self.scenes.set_video(&id, video).await?;

        logger.log_completion(&format!("{} frames", kept));
        Ok(id)
    }
}

#[async_trait]
impl ResultHandler for SfmResultHandler {
    fn queue(&self) -> &'static str {
        queues::SFM_OUT
    }

    async fn handle(&self, payload: &str) -> WorkerResult<JobId> {
        let result: SfmResult = super::parse(payload)?;
        let logger = JobLogger::new(&result.id, "sfm_result");
        logger.log_start(&format!("{} frames", result.frames.len()));

        let span = logger.create_span();
        self.store(result, &logger)
            .instrument(span)
            .await
            .inspect_err(|e| logger.log_error(&e.to_string()))
    }
}
