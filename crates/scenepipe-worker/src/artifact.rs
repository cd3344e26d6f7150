//! Artifact fetching and local artifact layout.
//!
//! Workers publish results that reference their output files by URL. The
//! consumers pull those files into `data_dir` and persist paths relative to
//! it, so the same paths can be published again through the public
//! `/worker-data/` prefix.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;
use url::Url;
use uuid::Uuid;

use scenepipe_models::JobId;

use crate::error::{WorkerError, WorkerResult};
use crate::metrics;

/// Retrieves a worker artifact by URL.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ArtifactTransfer: Send + Sync {
    async fn fetch(&self, url: &str) -> WorkerResult<Vec<u8>>;
}

/// HTTP(S) artifact transfer.
#[derive(Debug, Clone)]
pub struct HttpTransfer {
    http: Client,
}

impl HttpTransfer {
    /// Create a transfer with a per-request timeout.
    pub fn new(timeout: Duration) -> WorkerResult<Self> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self { http })
    }
}

#[async_trait]
impl ArtifactTransfer for HttpTransfer {
    async fn fetch(&self, url: &str) -> WorkerResult<Vec<u8>> {
        let started = Instant::now();
        let response = self.http.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(WorkerError::download_failed(format!(
                "GET {} returned {}",
                url, status
            )));
        }

        let body = response.bytes().await?;
        metrics::record_download(started.elapsed());
        debug!(url = %url, bytes = body.len(), "Fetched artifact");
        Ok(body.to_vec())
    }
}

/// Local artifact directory.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    data_dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Relative path for the `index`-th SfM frame of a job.
    pub fn sfm_frame_path(&self, id: &JobId, url: &str, index: usize) -> WorkerResult<String> {
        let name = file_name(url).unwrap_or_else(|| format!("frame_{:05}", index));
        Ok(format!("sfm/{}/{}", job_dir(id)?, name))
    }

    /// Relative paths for every frame URL of a job, in order.
    ///
    /// A frame whose path is already taken gets its index as a prefix, plus
    /// a counter while that is taken too, so no two frames share a file.
    pub fn sfm_frame_paths<'a>(
        &self,
        id: &JobId,
        urls: impl IntoIterator<Item = &'a str>,
    ) -> WorkerResult<Vec<String>> {
        let mut seen = HashSet::new();
        let mut paths = Vec::new();

        for (index, url) in urls.into_iter().enumerate() {
            let path = self.sfm_frame_path(id, url, index)?;
            if seen.insert(path.clone()) {
                paths.push(path);
                continue;
            }

            let (dir, name) = path.rsplit_once('/').unwrap_or(("", path.as_str()));
            let mut renamed = format!("{}/{:05}_{}", dir, index, name);
            let mut attempt = 1;
            while !seen.insert(renamed.clone()) {
                renamed = format!("{}/{:05}_{}_{}", dir, index, attempt, name);
                attempt += 1;
            }
            paths.push(renamed);
        }

        Ok(paths)
    }

    /// Relative path for a job's rendered NeRF video.
    pub fn nerf_video_path(&self, id: &JobId) -> WorkerResult<String> {
        Ok(format!("nerf/{}.mp4", job_dir(id)?))
    }

    pub fn absolute(&self, relative: &str) -> PathBuf {
        self.data_dir.join(relative)
    }

    /// Write `bytes` at `relative`, replacing any previous file atomically.
    pub async fn write(&self, relative: &str, bytes: &[u8]) -> WorkerResult<PathBuf> {
        let target = self.absolute(relative);
        let parent = target
            .parent()
            .ok_or_else(|| WorkerError::persistence(format!("no parent for {}", relative)))?;
        tokio::fs::create_dir_all(parent).await?;

        let tmp = parent.join(format!(".{}.tmp", Uuid::new_v4()));
        if let Err(e) = tokio::fs::write(&tmp, bytes).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        tokio::fs::rename(&tmp, &target).await?;

        Ok(target)
    }
}

/// The job id as a path component.
///
/// Ids are used verbatim so distinct jobs never share a directory; ids
/// that are not a safe single component are rejected.
fn job_dir(id: &JobId) -> WorkerResult<&str> {
    let name = id.as_str();
    let valid = !matches!(name, "" | "." | "..")
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if !valid {
        return Err(WorkerError::invalid_payload(format!(
            "job id {:?} is not usable as a directory name",
            name
        )));
    }
    Ok(name)
}

/// Last URL path segment, sanitized, if it names a file.
fn file_name(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let segment = parsed.path_segments()?.last()?;
    let name = sanitize(segment);
    if name.is_empty() || name.chars().all(|c| c == '.' || c == '_') {
        return None;
    }
    Some(name)
}

/// Keep a value usable as a single path component.
fn sanitize(value: &str) -> String {
    let cleaned: String = value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if matches!(cleaned.as_str(), "." | "..") {
        cleaned.replace('.', "_")
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_sfm_frame_path_uses_url_file_name() {
        let store = ArtifactStore::new("/data");
        let id = JobId::from("scene-1");

        assert_eq!(
            store
                .sfm_frame_path(&id, "http://worker:5100/data/outputs/scene-1/f_0003.png", 3)
                .unwrap(),
            "sfm/scene-1/f_0003.png"
        );
        assert_eq!(
            store.sfm_frame_path(&id, "http://worker:5100/", 7).unwrap(),
            "sfm/scene-1/frame_00007"
        );
        assert_eq!(
            store.sfm_frame_path(&id, "not a url", 2).unwrap(),
            "sfm/scene-1/frame_00002"
        );
    }

    #[test]
    fn test_unsafe_job_ids_are_rejected() {
        let store = ArtifactStore::new("/data");

        for id in ["../../etc", "..", ".", "", "job/1", "a b"] {
            let id = JobId::from(id);
            assert!(matches!(
                store.nerf_video_path(&id),
                Err(WorkerError::InvalidPayload(_))
            ));
            assert!(matches!(
                store.sfm_frame_path(&id, "http://w/a.png", 0),
                Err(WorkerError::InvalidPayload(_))
            ));
        }
    }

    #[test]
    fn test_distinct_job_ids_get_distinct_paths() {
        let store = ArtifactStore::new("/data");

        assert!(store.nerf_video_path(&JobId::from("job/1")).is_err());
        assert_eq!(store.nerf_video_path(&JobId::from("job_1")).unwrap(), "nerf/job_1.mp4");
        assert_eq!(store.nerf_video_path(&JobId::from("job.1")).unwrap(), "nerf/job.1.mp4");
    }

    #[test]
    fn test_colliding_frame_names_get_index_prefix() {
        let store = ArtifactStore::new("/data");
        let id = JobId::from("s");
        let paths = store
            .sfm_frame_paths(
                &id,
                ["http://w/a/img.png", "http://w/b/img.png", "http://w/c/other.png"],
            )
            .unwrap();

        assert_eq!(paths, vec!["sfm/s/img.png", "sfm/s/00001_img.png", "sfm/s/other.png"]);
    }

    #[test]
    fn test_prefixed_name_never_reuses_an_existing_path() {
        let store = ArtifactStore::new("/data");
        let id = JobId::from("s");
        let paths = store
            .sfm_frame_paths(
                &id,
                [
                    "http://w/00002_img.png",
                    "http://w/a/img.png",
                    "http://w/b/img.png",
                    "http://w/c/00002_img.png",
                ],
            )
            .unwrap();

        assert_eq!(
            paths,
            vec![
                "sfm/s/00002_img.png",
                "sfm/s/img.png",
                "sfm/s/00002_1_img.png",
                "sfm/s/00003_00002_img.png",
            ]
        );
        let distinct: HashSet<&String> = paths.iter().collect();
        assert_eq!(distinct.len(), paths.len());
    }

    #[tokio::test]
    async fn test_write_replaces_existing_file() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());

        store.write("nerf/a.mp4", b"first").await.unwrap();
        let target = store.write("nerf/a.mp4", b"second").await.unwrap();

        assert_eq!(tokio::fs::read(&target).await.unwrap(), b"second");
        let entries: Vec<_> = std::fs::read_dir(dir.path().join("nerf")).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_http_transfer_fetches_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data/outputs/s/f.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"png".to_vec()))
            .mount(&server)
            .await;

        let transfer = HttpTransfer::new(Duration::from_secs(5)).unwrap();
        let body = transfer
            .fetch(&format!("{}/data/outputs/s/f.png", server.uri()))
            .await
            .unwrap();

        assert_eq!(body, b"png");
    }

    #[tokio::test]
    async fn test_http_transfer_rejects_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let transfer = HttpTransfer::new(Duration::from_secs(5)).unwrap();
        let err = transfer
            .fetch(&format!("{}/missing.mp4", server.uri()))
            .await
            .unwrap_err();

        assert!(matches!(err, WorkerError::DownloadFailed(_)));
    }
}
