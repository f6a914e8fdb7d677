use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{DubsplitError, Result};
use crate::upload::UploadState;

use super::Job;

const JOB_KEY: &str = "job";
const UPLOAD_KEY: &str = "upload";
const PAUSED_KEY: &str = "upload_paused";

/// Opaque handle to a stored binary blob.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobRef(String);

impl BlobRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// A fresh id that will not collide with earlier ones from this process.
    pub fn generate(prefix: &str) -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let stamp = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        Self(format!("{prefix}-{stamp}-{n}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Durable key-value storage for session records and binary blobs.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    async fn put(&self, key: &str, value: Value) -> Result<()>;

    async fn remove(&self, key: &str) -> Result<()>;

    async fn get_blob(&self, blob: &BlobRef) -> Result<Option<Vec<u8>>>;

    async fn put_blob(&self, blob: &BlobRef, data: Vec<u8>) -> Result<()>;

    async fn remove_blob(&self, blob: &BlobRef) -> Result<()>;
}

/// In-process store. Nothing survives the process.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, Value>>,
    blobs: Mutex<HashMap<BlobRef, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.records.lock().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: Value) -> Result<()> {
        self.records.lock().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.records.lock().await.remove(key);
        Ok(())
    }

    async fn get_blob(&self, blob: &BlobRef) -> Result<Option<Vec<u8>>> {
        Ok(self.blobs.lock().await.get(blob).cloned())
    }

    async fn put_blob(&self, blob: &BlobRef, data: Vec<u8>) -> Result<()> {
        self.blobs.lock().await.insert(blob.clone(), data);
        Ok(())
    }

    async fn remove_blob(&self, blob: &BlobRef) -> Result<()> {
        self.blobs.lock().await.remove(blob);
        Ok(())
    }
}

/// Directory-backed store: `records/<key>.json` and `blobs/<id>`.
///
/// Every write lands in a temporary file first and is renamed into place, so
/// readers see either the old or the new content.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(root.join("records"))?;
        std::fs::create_dir_all(root.join("blobs"))?;
        debug!("Session store at {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, key: &str) -> Result<PathBuf> {
        Ok(self.root.join("records").join(format!("{}.json", safe_name(key)?)))
    }

    fn blob_path(&self, blob: &BlobRef) -> Result<PathBuf> {
        Ok(self.root.join("blobs").join(safe_name(blob.as_str())?))
    }
}

fn safe_name(name: &str) -> Result<&str> {
    let ok = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'));
    if ok {
        Ok(name)
    } else {
        Err(DubsplitError::Store(format!("Invalid store key '{name}'")))
    }
}

async fn write_atomic(path: PathBuf, data: Vec<u8>) -> Result<()> {
    tokio::task::spawn_blocking(move || -> Result<()> {
        let dir = path
            .parent()
            .ok_or_else(|| DubsplitError::Store(format!("No parent for {}", path.display())))?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        std::io::Write::write_all(&mut tmp, &data)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| DubsplitError::Io(e.error))?;
        Ok(())
    })
    .await
    .map_err(|e| DubsplitError::Store(format!("Write task failed: {e}")))?
}

async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn remove_optional(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl SessionStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        match read_optional(&self.record_path(key)?).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: Value) -> Result<()> {
        write_atomic(self.record_path(key)?, serde_json::to_vec_pretty(&value)?).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        remove_optional(&self.record_path(key)?).await
    }

    async fn get_blob(&self, blob: &BlobRef) -> Result<Option<Vec<u8>>> {
        read_optional(&self.blob_path(blob)?).await
    }

    async fn put_blob(&self, blob: &BlobRef, data: Vec<u8>) -> Result<()> {
        write_atomic(self.blob_path(blob)?, data).await
    }

    async fn remove_blob(&self, blob: &BlobRef) -> Result<()> {
        remove_optional(&self.blob_path(blob)?).await
    }
}

/// Typed view over a [`SessionStore`]. Cheap to clone; clones share storage.
#[derive(Clone)]
pub struct Session {
    store: Arc<dyn SessionStore>,
}

impl Session {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    pub fn memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    pub fn open_dir(root: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self::new(Arc::new(FileStore::open(root)?)))
    }

    pub async fn load_job(&self) -> Result<Option<Job>> {
        self.load(JOB_KEY).await
    }

    pub async fn save_job(&self, job: &Job) -> Result<()> {
        self.store.put(JOB_KEY, serde_json::to_value(job)?).await
    }

    /// Remove the job record and every blob it references.
    pub async fn clear_job(&self) -> Result<()> {
        if let Some(job) = self.load_job().await? {
            self.store.remove_blob(&job.source_audio).await?;
            if let Some(archive) = &job.result_archive {
                self.store.remove_blob(archive).await?;
            }
        }
        self.store.remove(JOB_KEY).await
    }

    pub async fn load_upload(&self) -> Result<Option<UploadState>> {
        self.load(UPLOAD_KEY).await
    }

    pub async fn save_upload(&self, state: &UploadState) -> Result<()> {
        self.store.put(UPLOAD_KEY, serde_json::to_value(state)?).await
    }

    pub async fn clear_upload(&self) -> Result<()> {
        self.store.remove(UPLOAD_KEY).await?;
        self.store.remove(PAUSED_KEY).await
    }

    pub async fn is_paused(&self) -> Result<bool> {
        Ok(self
            .store
            .get(PAUSED_KEY)
            .await?
            .and_then(|v| v.as_bool())
            .unwrap_or(false))
    }

    pub async fn set_paused(&self, paused: bool) -> Result<()> {
        info!("Upload {}", if paused { "paused" } else { "resumed" });
        self.store.put(PAUSED_KEY, Value::Bool(paused)).await
    }

    pub async fn save_blob(&self, prefix: &str, data: Vec<u8>) -> Result<BlobRef> {
        let blob = BlobRef::generate(prefix);
        self.store.put_blob(&blob, data).await?;
        Ok(blob)
    }

    pub async fn load_blob(&self, blob: &BlobRef) -> Result<Vec<u8>> {
        self.store
            .get_blob(blob)
            .await?
            .ok_or_else(|| DubsplitError::Store(format!("Blob {blob} is missing")))
    }

    /// Purge a job or upload batch that has been idle past the inactivity
    /// timeout. Returns `true` if anything was removed.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<bool> {
        let mut swept = false;

        if let Some(job) = self.load_job().await? {
            if job.is_expired(now) {
                warn!(
                    "Discarding {} job for {} idle since {}",
                    job.phase, job.source_name, job.last_activity
                );
                self.clear_job().await?;
                swept = true;
            }
        }

        if let Some(upload) = self.load_upload().await? {
            if upload.is_expired(now) {
                warn!("Discarding upload batch idle since {}", upload.last_activity);
                self.clear_upload().await?;
                swept = true;
            }
        }

        Ok(swept)
    }

    async fn load<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.store.get(key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::Phase;
    use chrono::Duration;

    async fn sample_job(session: &Session, now: DateTime<Utc>) -> Job {
        let audio = session.save_blob("audio", vec![1, 2, 3]).await.unwrap();
        let mut job = Job::new("talk.mp3", audio, 30.0, now);
        job.phase = Phase::Transcribing;
        job
    }

    #[tokio::test]
    async fn test_job_round_trip_memory() {
        let session = Session::memory();
        let job = sample_job(&session, Utc::now()).await;
        session.save_job(&job).await.unwrap();
        assert_eq!(session.load_job().await.unwrap(), Some(job));
    }

    #[tokio::test]
    async fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let job = {
            let session = Session::open_dir(dir.path()).unwrap();
            let job = sample_job(&session, Utc::now()).await;
            session.save_job(&job).await.unwrap();
            session.set_paused(true).await.unwrap();
            job
        };

        let session = Session::open_dir(dir.path()).unwrap();
        let loaded = session.load_job().await.unwrap().unwrap();
        assert_eq!(loaded, job);
        assert_eq!(session.load_blob(&loaded.source_audio).await.unwrap(), vec![1, 2, 3]);
        assert!(session.is_paused().await.unwrap());
    }

    #[tokio::test]
    async fn test_clear_job_removes_blobs() {
        let dir = tempfile::tempdir().unwrap();
        let session = Session::open_dir(dir.path()).unwrap();
        let job = sample_job(&session, Utc::now()).await;
        session.save_job(&job).await.unwrap();

        session.clear_job().await.unwrap();
        assert!(session.load_job().await.unwrap().is_none());
        assert!(session.load_blob(&job.source_audio).await.is_err());
    }

    #[tokio::test]
    async fn test_sweep_expired_job() {
        let session = Session::memory();
        let now = Utc::now();
        let job = sample_job(&session, now - Duration::minutes(45)).await;
        session.save_job(&job).await.unwrap();

        assert!(session.sweep_expired(now).await.unwrap());
        assert!(session.load_job().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sweep_keeps_recent_job() {
        let session = Session::memory();
        let now = Utc::now();
        let job = sample_job(&session, now - Duration::minutes(5)).await;
        session.save_job(&job).await.unwrap();

        assert!(!session.sweep_expired(now).await.unwrap());
        assert!(session.load_job().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_pause_flag_defaults_to_false() {
        let session = Session::memory();
        assert!(!session.is_paused().await.unwrap());
        session.set_paused(true).await.unwrap();
        assert!(session.is_paused().await.unwrap());
        session.set_paused(false).await.unwrap();
        assert!(!session.is_paused().await.unwrap());
    }

    #[test]
    fn test_unsafe_keys_are_rejected() {
        assert!(safe_name("../etc").is_err());
        assert!(safe_name("").is_err());
        assert!(safe_name("audio-1_2").is_ok());
    }

    #[test]
    fn test_generated_blob_refs_are_unique() {
        assert_ne!(BlobRef::generate("a"), BlobRef::generate("a"));
    }
}
