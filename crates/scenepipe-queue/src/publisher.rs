//! Job publisher for the SfM and NeRF stages.

use std::time::Duration;

use serde::Serialize;
use tracing::info;

use scenepipe_models::{Frame, JobId, NerfJob, Sfm, SfmJob, Video};

use crate::broker::{Broker, Connector};
use crate::config::PublisherConfig;
use crate::connection::connect_with_deadline;
use crate::error::{QueueError, QueueResult};
use crate::queues;

/// Builds job payloads and enqueues them.
///
/// Owns one broker connection. Concurrent callers each use their own
/// publisher; a publisher is never shared across tasks without the caller
/// serializing access.
pub struct JobPublisher<B: Broker> {
    broker: B,
    config: PublisherConfig,
}

impl<B: Broker> JobPublisher<B> {
    /// Wrap an already connected broker. The job queues must be declared.
    pub fn new(broker: B, config: PublisherConfig) -> Self {
        Self { broker, config }
    }

    /// Connect through the startup gate and declare `sfm-in` and `nerf-in`.
    pub async fn connect<C>(connector: &C, config: PublisherConfig, deadline: Duration) -> QueueResult<Self>
    where
        C: Connector<Broker = B>,
    {
        let broker =
            connect_with_deadline(connector, &[queues::SFM_IN, queues::NERF_IN], deadline).await?;
        Ok(Self::new(broker, config))
    }

    /// URL at which a worker fetches a locally stored artifact.
    pub fn to_url(&self, path: &str) -> String {
        format!(
            "{}/worker-data/{}",
            self.config.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Payload for `sfm-in`.
    pub fn sfm_job(&self, id: &JobId, video: &Video) -> QueueResult<SfmJob> {
        let file_path = video
            .file_path
            .as_deref()
            .ok_or_else(|| QueueError::invalid_job(format!("video {} has no file path", id)))?;

        Ok(SfmJob {
            id: id.clone(),
            file_path: self.to_url(file_path),
        })
    }

    /// Payload for `nerf-in`, with every frame path rewritten to a URL.
    pub fn nerf_job(&self, id: &JobId, video: &Video, sfm: &Sfm) -> QueueResult<NerfJob> {
        let (Some(vid_width), Some(vid_height)) = (video.width, video.height) else {
            return Err(QueueError::invalid_job(format!(
                "video {} has no dimensions",
                id
            )));
        };

        let frames = sfm
            .frames
            .iter()
            .map(|f| Frame {
                file_path: self.to_url(&f.file_path),
                extrinsic_matrix: f.extrinsic_matrix.clone(),
            })
            .collect();

        Ok(NerfJob {
            id: id.clone(),
            vid_width,
            vid_height,
            intrinsic_matrix: sfm.intrinsic_matrix.clone(),
            frames,
        })
    }

    /// Enqueue an SfM job for `video`. Broker failures propagate unretried.
    pub async fn publish_sfm_job(&mut self, id: &JobId, video: &Video) -> QueueResult<String> {
        let job = self.sfm_job(id, video)?;
        self.publish(queues::SFM_IN, id, &job).await
    }

    /// Enqueue a NeRF job from a stored reconstruction.
    pub async fn publish_nerf_job(&mut self, id: &JobId, video: &Video, sfm: &Sfm) -> QueueResult<String> {
        let job = self.nerf_job(id, video, sfm)?;
        self.publish(queues::NERF_IN, id, &job).await
    }

    async fn publish<T: Serialize>(&mut self, queue: &str, id: &JobId, job: &T) -> QueueResult<String> {
        let payload = serde_json::to_string(job)?;
        let tag = self
            .broker
            .publish(queue, &payload)
            .await?;

        info!(job_id = %id, queue = queue, tag = %tag, "Enqueued job");
        Ok(tag)
    }

    /// Release the underlying connection.
    pub fn into_inner(self) -> B {
        self.broker
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryConnector;

    fn pose(t: f64) -> Vec<Vec<f64>> {
        vec![
            vec![1.0, 0.0, 0.0, t],
            vec![0.0, 1.0, 0.0, t],
            vec![0.0, 0.0, 1.0, t],
            vec![0.0, 0.0, 0.0, 1.0],
        ]
    }

    async fn publisher(connector: &MemoryConnector, base_url: &str) -> JobPublisher<crate::MemoryBroker> {
        JobPublisher::connect(connector, PublisherConfig::new(base_url), Duration::from_secs(1))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_publish_sfm_job_payload() {
        let connector = MemoryConnector::new();
        let mut publisher = publisher(&connector, "http://host.docker.internal:5000").await;

        publisher
            .publish_sfm_job(&JobId::from("abc"), &Video::from_file("v.mp4"))
            .await
            .unwrap();

        let payloads = connector.pending_payloads(queues::SFM_IN);
        assert_eq!(payloads.len(), 1);
        let value: serde_json::Value = serde_json::from_str(&payloads[0]).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "id": "abc",
                "file_path": "http://host.docker.internal:5000/worker-data/v.mp4"
            })
        );
    }

    #[tokio::test]
    async fn test_to_url_joins_with_single_slash() {
        let connector = MemoryConnector::new();
        let publisher = publisher(&connector, "http://localhost:5000/").await;
        assert_eq!(
            publisher.to_url("/sfm/abc/f.png"),
            "http://localhost:5000/worker-data/sfm/abc/f.png"
        );
    }

    #[tokio::test]
    async fn test_publish_nerf_job_rewrites_frames() {
        let connector = MemoryConnector::new();
        let mut publisher = publisher(&connector, "http://web:5000").await;

        let sfm = Sfm {
            intrinsic_matrix: vec![vec![500.0, 0.0, 320.0], vec![0.0, 500.0, 240.0], vec![0.0, 0.0, 1.0]],
            frames: vec![
                Frame::new("sfm/abc/0001.png", pose(1.0)),
                Frame::new("sfm/abc/0002.png", pose(2.0)),
            ],
        };
        let video = Video::with_dimensions(640, 480);

        publisher
            .publish_nerf_job(&JobId::from("abc"), &video, &sfm)
            .await
            .unwrap();

        let payloads = connector.pending_payloads(queues::NERF_IN);
        let job: NerfJob = serde_json::from_str(&payloads[0]).unwrap();
        assert_eq!(job.id.as_str(), "abc");
        assert_eq!((job.vid_width, job.vid_height), (640, 480));
        assert_eq!(job.intrinsic_matrix, sfm.intrinsic_matrix);
        assert_eq!(job.frames[0].file_path, "http://web:5000/worker-data/sfm/abc/0001.png");
        assert_eq!(job.frames[1].file_path, "http://web:5000/worker-data/sfm/abc/0002.png");
        assert_eq!(job.frames[1].extrinsic_matrix, pose(2.0));

        // Same keys as the worker protocol
        let value: serde_json::Value = serde_json::from_str(&payloads[0]).unwrap();
        let mut keys: Vec<&str> = value.as_object().unwrap().keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(keys, vec!["frames", "id", "intrinsic_matrix", "vid_height", "vid_width"]);
    }

    #[tokio::test]
    async fn test_missing_fields_are_rejected() {
        let connector = MemoryConnector::new();
        let mut publisher = publisher(&connector, "http://web:5000").await;

        let err = publisher
            .publish_sfm_job(&JobId::from("x"), &Video::with_dimensions(1, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::InvalidJob(_)));

        let err = publisher
            .publish_nerf_job(&JobId::from("x"), &Video::from_file("v.mp4"), &Sfm::default())
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::InvalidJob(_)));

        assert!(connector.pending_payloads(queues::SFM_IN).is_empty());
        assert!(connector.pending_payloads(queues::NERF_IN).is_empty());
    }
}
