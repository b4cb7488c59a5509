//! File-backed job store: one JSON record per job id, written atomically
//! (temp file + rename) so a concurrent reader never observes a torn
//! record. A per-id async mutex serialises read-modify-write cycles.

use crate::domain::jobs::{Job, JobPayload};
use crate::ports::repository::{JobStore, StoreError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::NamedTempFile;
use tracing::{info, warn};

pub struct FsJobStore {
    dir: PathBuf,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl FsJobStore {
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            locks: Mutex::new(HashMap::new()),
        })
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    /// Idle entries (no holder or waiter besides the table itself) are
    /// pruned on every acquisition, so the table tracks in-flight ids
    /// instead of growing with every job ever seen.
    fn lock_for(&self, id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().expect("job lock table poisoned");
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        Arc::clone(locks.entry(id.to_string()).or_default())
    }

    #[cfg(test)]
    fn lock_table_len(&self) -> usize {
        self.locks.lock().expect("job lock table poisoned").len()
    }

    async fn read(&self, id: &str) -> Result<Option<Job>, StoreError> {
        match tokio::fs::read(self.record_path(id)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_required(&self, id: &str) -> Result<Job, StoreError> {
        self.read(id)
            .await?
            .ok_or_else(|| StoreError::UnknownJob(id.to_string()))
    }

    /// Serialize to a temp file in the records directory and rename it over
    /// the final path. Rename is atomic within a filesystem.
    async fn write(&self, job: &Job) -> Result<(), StoreError> {
        let body = serde_json::to_vec_pretty(job)?;
        let dir = self.dir.clone();
        let target = self.record_path(&job.id);

        tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
            let temp = NamedTempFile::new_in(&dir)?;
            std::fs::write(temp.path(), &body)?;
            temp.persist(&target).map_err(|e| StoreError::Io(e.error))?;
            Ok(())
        })
        .await
        .map_err(|e| StoreError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))??;

        Ok(())
    }

    async fn fail_inner(&self, id: &str, error: &str) -> Result<Job, StoreError> {
        let mut job = self.read_required(id).await?;
        job.apply_failed(error)?;
        self.write(&job).await?;
        warn!(job_id = id, error, "job failed");
        Ok(job)
    }
}

#[async_trait]
impl JobStore for FsJobStore {
    async fn create(&self, id: &str, payload: JobPayload) -> Result<Job, StoreError> {
        let guard = self.lock_for(id);
        let _held = guard.lock().await;

        if self.read(id).await?.is_some() {
            return Err(StoreError::DuplicateJob(id.to_string()));
        }

        let job = Job::new(id.to_string(), payload);
        self.write(&job).await?;
        info!(job_id = id, kind = %job.kind, "job created");
        Ok(job)
    }

    async fn update_progress(
        &self,
        id: &str,
        progress: u8,
        message: Option<&str>,
    ) -> Result<Job, StoreError> {
        let guard = self.lock_for(id);
        let _held = guard.lock().await;

        let mut job = self.read_required(id).await?;
        job.apply_progress(progress, message)?;
        self.write(&job).await?;
        Ok(job)
    }

    async fn complete(
        &self,
        id: &str,
        outputs: HashMap<String, PathBuf>,
    ) -> Result<Job, StoreError> {
        let guard = self.lock_for(id);
        let _held = guard.lock().await;

        // Every declared artifact must exist right now; otherwise the job
        // fails instead of completing with a dangling path.
        for (name, path) in &outputs {
            if !tokio::fs::try_exists(path).await.unwrap_or(false) {
                let error = format!("output '{}' not found at {}", name, path.display());
                return self.fail_inner(id, &error).await;
            }
        }

        let mut job = self.read_required(id).await?;
        job.apply_completed(outputs)?;
        self.write(&job).await?;
        info!(job_id = id, "job completed");
        Ok(job)
    }

    async fn fail(&self, id: &str, error: &str) -> Result<Job, StoreError> {
        let guard = self.lock_for(id);
        let _held = guard.lock().await;
        self.fail_inner(id, error).await
    }

    async fn get(&self, id: &str) -> Result<Option<Job>, StoreError> {
        self.read(id).await
    }

    async fn list(&self, limit: usize) -> Result<Vec<Job>, StoreError> {
        let mut jobs = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match tokio::fs::read(&path).await {
                Ok(bytes) => match serde_json::from_slice::<Job>(&bytes) {
                    Ok(job) => jobs.push(job),
                    Err(e) => warn!(path = %path.display(), "skipping unreadable record: {}", e),
                },
                Err(e) => warn!(path = %path.display(), "skipping record: {}", e),
            }
        }

        jobs.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        jobs.truncate(limit);
        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::jobs::JobStatus;
    use crate::domain::srt::SubtitleFormat;
    use tempfile::tempdir;

    fn payload() -> JobPayload {
        JobPayload::Transcribe {
            source: PathBuf::from("/media/in.mp4"),
            language: "en".to_string(),
            timing_offset: 0.0,
            format: SubtitleFormat::Srt,
        }
    }

    async fn store(dir: &Path) -> FsJobStore {
        FsJobStore::open(dir).await.unwrap()
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let dir = tempdir().unwrap();
        let store = store(dir.path()).await;

        let created = store.create("j1", payload()).await.unwrap();
        assert_eq!(created.status, JobStatus::Pending);

        let loaded = store.get("j1").await.unwrap().unwrap();
        assert_eq!(loaded, created);
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_id_is_rejected() {
        let dir = tempdir().unwrap();
        let store = store(dir.path()).await;
        store.create("j1", payload()).await.unwrap();

        let err = store.create("j1", payload()).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateJob(_)));
    }

    #[tokio::test]
    async fn progress_is_monotonic_across_writes() {
        let dir = tempdir().unwrap();
        let store = store(dir.path()).await;
        store.create("j1", payload()).await.unwrap();

        store.update_progress("j1", 30, Some("transcribing")).await.unwrap();
        let job = store.update_progress("j1", 20, None).await.unwrap();
        assert_eq!(job.progress, 30);
        assert_eq!(job.status, JobStatus::Processing);
    }

    #[tokio::test]
    async fn complete_with_missing_artifact_fails_the_job() {
        let dir = tempdir().unwrap();
        let store = store(dir.path()).await;
        store.create("j1", payload()).await.unwrap();
        store.update_progress("j1", 90, None).await.unwrap();

        let mut outputs = HashMap::new();
        let missing = dir.path().join("never_written.mp4");
        outputs.insert("video".to_string(), missing.clone());

        let job = store.complete("j1", outputs).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        let error = job.error.unwrap();
        assert!(error.contains("never_written.mp4"), "error should name the path: {}", error);
        // Progress frozen at its last value.
        assert_eq!(job.progress, 90);
    }

    #[tokio::test]
    async fn complete_with_existing_artifacts_succeeds() {
        let dir = tempdir().unwrap();
        let store = store(dir.path()).await;
        store.create("j1", payload()).await.unwrap();

        let artifact = dir.path().join("out.srt");
        tokio::fs::write(&artifact, b"1\n").await.unwrap();

        let mut outputs = HashMap::new();
        outputs.insert("subtitle".to_string(), artifact.clone());

        let job = store.complete("j1", outputs).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
        assert_eq!(job.outputs["subtitle"], artifact);
    }

    #[tokio::test]
    async fn terminal_status_reads_are_idempotent() {
        let dir = tempdir().unwrap();
        let store = store(dir.path()).await;
        store.create("j1", payload()).await.unwrap();
        store.fail("j1", "boom").await.unwrap();

        let first = store.get("j1").await.unwrap().unwrap();
        let second = store.get("j1").await.unwrap().unwrap();
        assert_eq!(first.status, second.status);
        assert_eq!(first.progress, second.progress);
        assert_eq!(first.error, second.error);
    }

    #[tokio::test]
    async fn fail_after_complete_is_rejected() {
        let dir = tempdir().unwrap();
        let store = store(dir.path()).await;
        store.create("j1", payload()).await.unwrap();

        let job = store.complete("j1", HashMap::new()).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);

        let err = store.fail("j1", "too late").await.unwrap_err();
        assert!(matches!(err, StoreError::IllegalTransition(_)));
    }

    #[tokio::test]
    async fn lock_table_does_not_grow_with_finished_jobs() {
        let dir = tempdir().unwrap();
        let store = store(dir.path()).await;

        for i in 0..20 {
            let id = format!("j{}", i);
            store.create(&id, payload()).await.unwrap();
            store.fail(&id, "boom").await.unwrap();
        }

        // The next acquisition prunes every idle entry, leaving only the
        // lock taken for this id.
        let _guard = store.lock_for("j-next");
        assert_eq!(store.lock_table_len(), 1);
    }

    #[tokio::test]
    async fn list_is_most_recent_first() {
        let dir = tempdir().unwrap();
        let store = store(dir.path()).await;
        store.create("j1", payload()).await.unwrap();
        store.create("j2", payload()).await.unwrap();
        store.update_progress("j1", 10, None).await.unwrap();

        let jobs = store.list(10).await.unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].id, "j1");

        let jobs = store.list(1).await.unwrap();
        assert_eq!(jobs.len(), 1);
    }
}
