//! Persistence collaborator for scene entities.
//!
//! The scene database itself lives outside this system. Consumers only need
//! upserts keyed by job id, so that is the whole interface. Redelivered
//! results repeat the same calls with the same id.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;
use uuid::Uuid;

use scenepipe_models::{JobId, Nerf, Sfm, Video};

use crate::error::{WorkerError, WorkerResult};

/// Upserts of scene entities keyed by job id.
#[async_trait]
pub trait SceneManager: Send + Sync {
    /// Merge the present fields of `video` into the stored video.
    async fn set_video(&self, id: &JobId, video: Video) -> WorkerResult<()>;

    /// Replace the reconstruction.
    async fn set_sfm(&self, id: &JobId, sfm: Sfm) -> WorkerResult<()>;

    /// Replace the render.
    async fn set_nerf(&self, id: &JobId, nerf: Nerf) -> WorkerResult<()>;
}

/// Everything stored for one job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SceneRecord {
    #[serde(default)]
    pub video: Option<Video>,
    #[serde(default)]
    pub sfm: Option<Sfm>,
    #[serde(default)]
    pub nerf: Option<Nerf>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl SceneRecord {
    fn apply(&mut self, update: Update) {
        match update {
            Update::Video(video) => match self.video.as_mut() {
                Some(stored) => stored.merge(video),
                None => self.video = Some(video),
            },
            Update::Sfm(sfm) => self.sfm = Some(sfm),
            Update::Nerf(nerf) => self.nerf = Some(nerf),
        }
        self.updated_at = Some(Utc::now());
    }
}

enum Update {
    Video(Video),
    Sfm(Sfm),
    Nerf(Nerf),
}

impl Update {
    fn kind(&self) -> PersistCall {
        match self {
            Update::Video(_) => PersistCall::Video,
            Update::Sfm(_) => PersistCall::Sfm,
            Update::Nerf(_) => PersistCall::Nerf,
        }
    }
}

/// Which setter was called.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PersistCall {
    Video,
    Sfm,
    Nerf,
}

/// In-process store, also records every call for inspection.
#[derive(Debug, Default)]
pub struct InMemorySceneStore {
    records: RwLock<HashMap<JobId, SceneRecord>>,
    calls: Mutex<Vec<(PersistCall, JobId)>>,
}

impl InMemorySceneStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, id: &JobId) -> Option<SceneRecord> {
        self.records.read().await.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Every setter call so far, in order.
    pub async fn calls(&self) -> Vec<(PersistCall, JobId)> {
        self.calls.lock().await.clone()
    }

    /// How many times `kind` was called for `id`.
    pub async fn call_count(&self, kind: PersistCall, id: &JobId) -> usize {
        self.calls
            .lock()
            .await
            .iter()
            .filter(|(k, i)| *k == kind && i == id)
            .count()
    }

    async fn upsert(&self, id: &JobId, update: Update) -> WorkerResult<()> {
        self.calls.lock().await.push((update.kind(), id.clone()));
        self.records
            .write()
            .await
            .entry(id.clone())
            .or_default()
            .apply(update);
        Ok(())
    }
}

#[async_trait]
impl SceneManager for InMemorySceneStore {
    async fn set_video(&self, id: &JobId, video: Video) -> WorkerResult<()> {
        self.upsert(id, Update::Video(video)).await
    }

    async fn set_sfm(&self, id: &JobId, sfm: Sfm) -> WorkerResult<()> {
        self.upsert(id, Update::Sfm(sfm)).await
    }

    async fn set_nerf(&self, id: &JobId, nerf: Nerf) -> WorkerResult<()> {
        self.upsert(id, Update::Nerf(nerf)).await
    }
}

/// One JSON document per job under `<data_dir>/scenes/`.
#[derive(Debug)]
pub struct JsonSceneStore {
    dir: PathBuf,
    // Serializes read-modify-write cycles between the two consumers.
    write_lock: Mutex<()>,
}

impl JsonSceneStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            dir: data_dir.as_ref().join("scenes"),
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, id: &JobId) -> WorkerResult<PathBuf> {
        let name = id.as_str();
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'));
        if !valid {
            return Err(WorkerError::persistence(format!(
                "job id {:?} is not usable as a record name",
                name
            )));
        }
        Ok(self.dir.join(format!("{}.json", name)))
    }

    /// Load the stored record, if any.
    pub async fn get(&self, id: &JobId) -> WorkerResult<Option<SceneRecord>> {
        let path = self.record_path(id)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn upsert(&self, id: &JobId, update: Update) -> WorkerResult<()> {
        let _guard = self.write_lock.lock().await;

        let path = self.record_path(id)?;
        let mut record = self.get(id).await?.unwrap_or_default();
        record.apply(update);

        tokio::fs::create_dir_all(&self.dir).await?;
        let tmp = self.dir.join(format!(".{}.tmp", Uuid::new_v4()));
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(&record)?).await?;
        tokio::fs::rename(&tmp, &path).await?;

        debug!(job_id = %id, path = %path.display(), "Scene record written");
        Ok(())
    }
}

#[async_trait]
impl SceneManager for JsonSceneStore {
    async fn set_video(&self, id: &JobId, video: Video) -> WorkerResult<()> {
        self.upsert(id, Update::Video(video)).await
    }

    async fn set_sfm(&self, id: &JobId, sfm: Sfm) -> WorkerResult<()> {
        self.upsert(id, Update::Sfm(sfm)).await
    }

    async fn set_nerf(&self, id: &JobId, nerf: Nerf) -> WorkerResult<()> {
        self.upsert(id, Update::Nerf(nerf)).await
    }
}
