//! Bounded worker pool executing jobs end-to-end. One worker owns a job
//! from dequeue to its terminal state; any error inside the job boundary
//! becomes a `failed` record, never a crash.

use crate::application::compositing::CompositingPipeline;
use crate::application::transcription::TranscriptionPipeline;
use crate::application::ProgressSink;
use crate::domain::jobs::{Job, JobPayload, JobStatus};
use crate::domain::srt::{write_subtitles, SubtitleFormat};
use crate::ports::media::MediaToolkit;
use crate::ports::renderer::OverlayRenderer;
use crate::ports::repository::{JobStore, StoreError};
use crate::ports::BoxError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info, warn};
use uuid::Uuid;

const QUEUE_DEPTH: usize = 256;

#[derive(Debug)]
pub enum SubmitError {
    /// The payload can never run; no job record is created.
    InvalidPayload(String),
    Store(StoreError),
    /// The worker pool has shut down.
    QueueClosed,
}

impl fmt::Display for SubmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmitError::InvalidPayload(reason) => write!(f, "invalid job payload: {}", reason),
            SubmitError::Store(e) => write!(f, "store error: {}", e),
            SubmitError::QueueClosed => write!(f, "job queue is closed"),
        }
    }
}

impl std::error::Error for SubmitError {}

impl From<StoreError> for SubmitError {
    fn from(err: StoreError) -> Self {
        SubmitError::Store(err)
    }
}

#[derive(Debug)]
pub enum ArtifactError {
    UnknownJob,
    /// Artifacts are only served for completed jobs.
    NotCompleted(JobStatus),
    UnknownArtifact(String),
    /// The record names the artifact but the file is gone.
    Missing(PathBuf),
    Store(StoreError),
}

impl fmt::Display for ArtifactError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactError::UnknownJob => write!(f, "job not found"),
            ArtifactError::NotCompleted(status) => {
                write!(f, "job is not completed (status {:?})", status)
            }
            ArtifactError::UnknownArtifact(name) => write!(f, "no artifact named '{}'", name),
            ArtifactError::Missing(path) => {
                write!(f, "artifact file missing: {}", path.display())
            }
            ArtifactError::Store(e) => write!(f, "store error: {}", e),
        }
    }
}

impl std::error::Error for ArtifactError {}

struct Inner<M: MediaToolkit + ?Sized, R: OverlayRenderer + ?Sized> {
    store: Arc<dyn JobStore>,
    transcription: TranscriptionPipeline<M>,
    compositing: CompositingPipeline<M, R>,
    media: Arc<M>,
    output_dir: PathBuf,
}

pub struct WorkerScheduler<M: MediaToolkit + ?Sized, R: OverlayRenderer + ?Sized> {
    inner: Arc<Inner<M, R>>,
    queue: mpsc::Sender<String>,
}

impl<M, R> WorkerScheduler<M, R>
where
    M: MediaToolkit + ?Sized + 'static,
    R: OverlayRenderer + ?Sized + 'static,
{
    /// Build the scheduler and spawn `workers` job executors sharing one
    /// queue. Pool size is decided by the caller from total memory.
    pub fn start(
        store: Arc<dyn JobStore>,
        transcription: TranscriptionPipeline<M>,
        compositing: CompositingPipeline<M, R>,
        media: Arc<M>,
        output_dir: PathBuf,
        workers: usize,
    ) -> Self {
        let (tx, rx) = mpsc::channel::<String>(QUEUE_DEPTH);
        let inner = Arc::new(Inner {
            store,
            transcription,
            compositing,
            media,
            output_dir,
        });

        let rx = Arc::new(Mutex::new(rx));
        for worker_id in 0..workers.max(1) {
            let inner = Arc::clone(&inner);
            let rx = Arc::clone(&rx);
            tokio::spawn(async move {
                info!(worker_id, "worker started");
                loop {
                    let id = { rx.lock().await.recv().await };
                    let Some(id) = id else {
                        info!(worker_id, "queue closed, worker exiting");
                        break;
                    };
                    run_job(&inner, &id, worker_id).await;
                }
            });
        }

        Self {
            inner,
            queue: tx,
        }
    }

    /// Validate the payload, create a `pending` record and enqueue it.
    /// Invalid input is rejected here and never becomes a failed job.
    pub async fn submit(&self, payload: JobPayload) -> Result<Job, SubmitError> {
        validate_payload(&payload).await?;

        let id = Uuid::new_v4().to_string();
        let job = self.inner.store.create(&id, payload).await?;
        info!(job_id = %id, kind = %job.kind, "job accepted");

        if self.queue.send(id).await.is_err() {
            return Err(SubmitError::QueueClosed);
        }
        Ok(job)
    }

    pub async fn status(&self, id: &str) -> Result<Option<Job>, StoreError> {
        self.inner.store.get(id).await
    }

    pub async fn list(&self, limit: usize) -> Result<Vec<Job>, StoreError> {
        self.inner.store.list(limit).await
    }

    /// Resolve a named artifact for download. Served only from completed
    /// jobs, and only when the file is still on disk.
    pub async fn artifact(&self, id: &str, name: &str) -> Result<PathBuf, ArtifactError> {
        let job = self
            .inner
            .store
            .get(id)
            .await
            .map_err(ArtifactError::Store)?
            .ok_or(ArtifactError::UnknownJob)?;

        if job.status != JobStatus::Completed {
            return Err(ArtifactError::NotCompleted(job.status));
        }
        let path = job
            .outputs
            .get(name)
            .ok_or_else(|| ArtifactError::UnknownArtifact(name.to_string()))?;
        if !path.exists() {
            return Err(ArtifactError::Missing(path.clone()));
        }
        Ok(path.clone())
    }
}

async fn validate_payload(payload: &JobPayload) -> Result<(), SubmitError> {
    let missing = |path: &Path| {
        SubmitError::InvalidPayload(format!("source not found: {}", path.display()))
    };

    match payload {
        JobPayload::Transcribe { source, language, .. }
        | JobPayload::Composite { source, language, .. } => {
            if !source.exists() {
                return Err(missing(source));
            }
            if language.trim().is_empty() {
                return Err(SubmitError::InvalidPayload("language is empty".to_string()));
            }
        }
        JobPayload::Split { source, start, end } => {
            if !source.exists() {
                return Err(missing(source));
            }
            if *start < 0.0 || *end <= *start {
                return Err(SubmitError::InvalidPayload(format!(
                    "invalid split window [{}, {})",
                    start, end
                )));
            }
        }
        JobPayload::Join { sources } => {
            if sources.len() < 2 {
                return Err(SubmitError::InvalidPayload(
                    "join needs at least two sources".to_string(),
                ));
            }
            for source in sources {
                if !source.exists() {
                    return Err(missing(source));
                }
            }
        }
        JobPayload::MuxAudio { source, audio, volume, .. } => {
            if !source.exists() {
                return Err(missing(source));
            }
            if !audio.exists() {
                return Err(missing(audio));
            }
            if *volume <= 0.0 {
                return Err(SubmitError::InvalidPayload(format!(
                    "volume must be positive, got {}",
                    volume
                )));
            }
        }
    }
    Ok(())
}

/// The job boundary: everything that goes wrong inside lands in the job
/// record verbatim, partial artifacts are removed, and the worker survives.
async fn run_job<M, R>(inner: &Arc<Inner<M, R>>, id: &str, worker_id: usize)
where
    M: MediaToolkit + ?Sized + 'static,
    R: OverlayRenderer + ?Sized + 'static,
{
    let job = match inner.store.get(id).await {
        Ok(Some(job)) => job,
        Ok(None) => {
            warn!(job_id = %id, "dequeued unknown job");
            return;
        }
        Err(e) => {
            error!(job_id = %id, error = %e, "failed to read job record");
            return;
        }
    };

    info!(job_id = %id, worker_id, kind = %job.kind, "job started");
    match execute(inner, &job).await {
        Ok(outputs) => match inner.store.complete(id, outputs).await {
            Ok(done) => {
                info!(job_id = %id, status = ?done.status, "job finished");
            }
            Err(e) => error!(job_id = %id, error = %e, "failed to record completion"),
        },
        Err(e) => {
            warn!(job_id = %id, error = %e, "job failed");
            for path in expected_outputs(inner, &job).values() {
                let _ = tokio::fs::remove_file(path).await;
            }
            if let Err(store_err) = inner.store.fail(id, &e.to_string()).await {
                error!(job_id = %id, error = %store_err, "failed to record failure");
            }
        }
    }
}

/// Output paths a job will produce, derived from its kind. Known up front
/// so a failed run can sweep partial files.
fn expected_outputs<M, R>(inner: &Arc<Inner<M, R>>, job: &Job) -> HashMap<String, PathBuf>
where
    M: MediaToolkit + ?Sized,
    R: OverlayRenderer + ?Sized,
{
    let mut outputs = HashMap::new();
    match &job.payload {
        JobPayload::Transcribe { format, .. } => {
            outputs.insert(
                "subtitle".to_string(),
                inner.output_dir.join(format!("{}.{}", job.id, format.extension())),
            );
        }
        JobPayload::Composite { .. } => {
            outputs.insert(
                "video".to_string(),
                inner.output_dir.join(format!("{}.mp4", job.id)),
            );
            outputs.insert(
                "subtitle".to_string(),
                inner.output_dir.join(format!("{}.srt", job.id)),
            );
        }
        JobPayload::Split { .. } | JobPayload::Join { .. } | JobPayload::MuxAudio { .. } => {
            outputs.insert(
                "video".to_string(),
                inner.output_dir.join(format!("{}.mp4", job.id)),
            );
        }
    }
    outputs
}

async fn execute<M, R>(
    inner: &Arc<Inner<M, R>>,
    job: &Job,
) -> Result<HashMap<String, PathBuf>, BoxError>
where
    M: MediaToolkit + ?Sized + 'static,
    R: OverlayRenderer + ?Sized + 'static,
{
    tokio::fs::create_dir_all(&inner.output_dir).await?;
    let outputs = expected_outputs(inner, job);

    match &job.payload {
        JobPayload::Transcribe {
            source,
            language,
            timing_offset,
            format,
        } => {
            let sink = StoreProgress::new(&inner.store, &job.id, 5, 90);
            let outcome = inner
                .transcription
                .run(source, language, *timing_offset, &sink)
                .await?;
            for rec in &outcome.analysis.recommendations {
                info!(job_id = %job.id, severity = ?rec.severity, "{}", rec.message);
            }
            write_subtitles(&outcome.segments, *format, &outputs["subtitle"]).await?;
        }
        JobPayload::Composite {
            source,
            language,
            timing_offset,
            word_mode,
            style,
        } => {
            let sink = StoreProgress::new(&inner.store, &job.id, 5, 50);
            let outcome = inner
                .transcription
                .run(source, language, *timing_offset, &sink)
                .await?;
            write_subtitles(&outcome.segments, SubtitleFormat::Srt, &outputs["subtitle"]).await?;

            let sink = StoreProgress::new(&inner.store, &job.id, 50, 95);
            inner
                .compositing
                .run(
                    source,
                    &outcome.segments,
                    *word_mode,
                    style,
                    &outputs["video"],
                    &sink,
                )
                .await?;
        }
        JobPayload::Split { source, start, end } => {
            let sink = StoreProgress::new(&inner.store, &job.id, 10, 90);
            sink.report(0, "extracting slice").await;
            inner
                .media
                .extract_video_slice(source, *start, *end, &outputs["video"])
                .await?;
            sink.report(100, "slice extracted").await;
        }
        JobPayload::Join { sources } => {
            let sink = StoreProgress::new(&inner.store, &job.id, 10, 90);
            sink.report(0, "joining sources").await;
            inner.media.concatenate(sources, &outputs["video"]).await?;
            sink.report(100, "sources joined").await;
        }
        JobPayload::MuxAudio {
            source,
            audio,
            volume,
            loop_audio,
        } => {
            let sink = StoreProgress::new(&inner.store, &job.id, 10, 90);
            sink.report(0, "mixing audio").await;
            inner
                .media
                .mux_audio(source, audio, *volume, *loop_audio, &outputs["video"])
                .await?;
            sink.report(100, "audio mixed").await;
        }
    }

    Ok(outputs)
}

/// Bridges pipeline progress into the job store, rescaled into a window of
/// the job's overall 0-100 range. Store failures are logged, never fatal:
/// progress is advisory.
struct StoreProgress {
    store: Arc<dyn JobStore>,
    id: String,
    lo: u8,
    hi: u8,
}

impl StoreProgress {
    fn new(store: &Arc<dyn JobStore>, id: &str, lo: u8, hi: u8) -> Self {
        Self {
            store: Arc::clone(store),
            id: id.to_string(),
            lo,
            hi,
        }
    }
}

#[async_trait]
impl ProgressSink for StoreProgress {
    async fn report(&self, progress: u8, message: &str) {
        let span = (self.hi - self.lo) as u32;
        let scaled = self.lo + (span * progress.min(100) as u32 / 100) as u8;
        if let Err(e) = self
            .store
            .update_progress(&self.id, scaled, Some(message))
            .await
        {
            warn!(job_id = %self.id, error = %e, "progress update dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::fs_jobs::FsJobStore;
    use crate::config::ChunkFailurePolicy;
    use crate::domain::subtitles::{RawSegment, RawWord};
    use crate::ports::transcriber::{Transcriber, TranscriberFactory};
    use crate::resources::model_pool::ModelPool;
    use crate::resources::monitor::{PressureThresholds, ResourceMonitor};
    use crate::resources::policy::{ModelTier, PolicyConfig};
    use std::time::Duration;

    /// Filesystem-backed media stub: every operation writes a real file so
    /// the store's completion check sees the artifacts it expects.
    struct StubMedia {
        fail_concat: bool,
    }

    #[async_trait]
    impl MediaToolkit for StubMedia {
        async fn duration_secs(&self, _path: &Path) -> Result<f64, BoxError> {
            Ok(90.0)
        }

        async fn extract_audio_slice(
            &self,
            _source: &Path,
            _start: f64,
            _end: f64,
            output: &Path,
        ) -> Result<(), BoxError> {
            tokio::fs::write(output, b"pcm").await?;
            Ok(())
        }

        async fn extract_video_slice(
            &self,
            _source: &Path,
            _start: f64,
            _end: f64,
            output: &Path,
        ) -> Result<(), BoxError> {
            tokio::fs::write(output, b"h264").await?;
            Ok(())
        }

        async fn concatenate(&self, _inputs: &[PathBuf], output: &Path) -> Result<(), BoxError> {
            if self.fail_concat {
                return Err("inputs have mismatched codec parameters".into());
            }
            tokio::fs::write(output, b"joined").await?;
            Ok(())
        }

        async fn mux_audio(
            &self,
            _video: &Path,
            _audio: &Path,
            _volume: f32,
            _loop_audio: bool,
            output: &Path,
        ) -> Result<(), BoxError> {
            tokio::fs::write(output, b"muxed").await?;
            Ok(())
        }
    }

    struct StubRenderer;

    #[async_trait]
    impl OverlayRenderer for StubRenderer {
        async fn render(
            &self,
            _source: &Path,
            _overlays: &[crate::domain::overlay::OverlayElement],
            _style: &crate::domain::overlay::OverlayStyle,
            _encode: &crate::ports::renderer::EncodeParams,
            output: &Path,
        ) -> Result<(), BoxError> {
            tokio::fs::write(output, b"rendered").await?;
            Ok(())
        }
    }

    struct StubTranscriber;

    #[async_trait]
    impl Transcriber for StubTranscriber {
        async fn transcribe(
            &self,
            _media: &Path,
            _language: &str,
        ) -> Result<Vec<RawSegment>, BoxError> {
            Ok(vec![RawSegment {
                start: 0.5,
                end: 2.0,
                text: "hello world".to_string(),
                words: vec![RawWord {
                    word: "hello".to_string(),
                    start: 0.5,
                    end: 1.2,
                }],
            }])
        }
    }

    struct StubFactory;

    #[async_trait]
    impl TranscriberFactory for StubFactory {
        async fn load(&self, _tier: ModelTier) -> Result<Arc<dyn Transcriber>, BoxError> {
            Ok(Arc::new(StubTranscriber))
        }
    }

    struct TestRig {
        scheduler: WorkerScheduler<StubMedia, StubRenderer>,
        store: Arc<dyn JobStore>,
        _dir: tempfile::TempDir,
    }

    async fn rig(fail_concat: bool) -> TestRig {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn JobStore> =
            Arc::new(FsJobStore::open(dir.path().join("jobs")).await.unwrap());
        let media = Arc::new(StubMedia { fail_concat });
        let monitor = Arc::new(ResourceMonitor::new(PressureThresholds::default()));
        let pool = Arc::new(ModelPool::new(Arc::new(StubFactory), false));

        let transcription = TranscriptionPipeline::new(
            Arc::clone(&media),
            pool,
            Arc::clone(&monitor),
            PolicyConfig::default(),
            ChunkFailurePolicy::Drop,
        );
        let compositing =
            CompositingPipeline::new(Arc::clone(&media), Arc::new(StubRenderer), monitor);

        let scheduler = WorkerScheduler::start(
            Arc::clone(&store),
            transcription,
            compositing,
            media,
            dir.path().join("output"),
            1,
        );
        TestRig {
            scheduler,
            store,
            _dir: dir,
        }
    }

    async fn wait_terminal(store: &Arc<dyn JobStore>, id: &str) -> Job {
        for _ in 0..200 {
            if let Some(job) = store.get(id).await.unwrap() {
                if job.status.is_terminal() {
                    return job;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("job {} never reached a terminal state", id);
    }

    fn touch(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, b"media").unwrap();
        path
    }

    #[tokio::test]
    async fn split_job_completes_with_a_real_artifact() {
        let r = rig(false).await;
        let source = touch(r._dir.path(), "in.mp4");

        let job = r
            .scheduler
            .submit(JobPayload::Split {
                source,
                start: 0.0,
                end: 10.0,
            })
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Pending);

        let done = wait_terminal(&r.store, &job.id).await;
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.progress, 100);
        assert!(done.outputs["video"].exists());

        let path = r.scheduler.artifact(&job.id, "video").await.unwrap();
        assert_eq!(path, done.outputs["video"]);
    }

    #[tokio::test]
    async fn transcribe_job_writes_a_subtitle_artifact() {
        let r = rig(false).await;
        let source = touch(r._dir.path(), "talk.mp4");

        let job = r
            .scheduler
            .submit(JobPayload::Transcribe {
                source,
                language: "en".to_string(),
                timing_offset: 0.0,
                format: SubtitleFormat::Srt,
            })
            .await
            .unwrap();

        let done = wait_terminal(&r.store, &job.id).await;
        assert_eq!(done.status, JobStatus::Completed, "error: {:?}", done.error);

        let content = std::fs::read_to_string(&done.outputs["subtitle"]).unwrap();
        assert!(content.contains("hello world"));
        assert!(content.contains("-->"));
    }

    #[tokio::test]
    async fn failing_join_lands_in_the_record_verbatim() {
        let r = rig(true).await;
        let a = touch(r._dir.path(), "a.mp4");
        let b = touch(r._dir.path(), "b.mp4");

        let job = r
            .scheduler
            .submit(JobPayload::Join { sources: vec![a, b] })
            .await
            .unwrap();

        let done = wait_terminal(&r.store, &job.id).await;
        assert_eq!(done.status, JobStatus::Failed);
        assert!(done
            .error
            .as_deref()
            .unwrap()
            .contains("mismatched codec parameters"));

        // Failed jobs never serve artifacts.
        let err = r.scheduler.artifact(&job.id, "video").await.unwrap_err();
        assert!(matches!(err, ArtifactError::NotCompleted(JobStatus::Failed)));
    }

    #[tokio::test]
    async fn invalid_payload_is_rejected_without_a_record() {
        let r = rig(false).await;

        let err = r
            .scheduler
            .submit(JobPayload::Split {
                source: PathBuf::from("/nonexistent/in.mp4"),
                start: 0.0,
                end: 10.0,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SubmitError::InvalidPayload(_)));

        let source = touch(r._dir.path(), "in.mp4");
        let err = r
            .scheduler
            .submit(JobPayload::Split {
                source,
                start: 10.0,
                end: 5.0,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SubmitError::InvalidPayload(_)));

        assert!(r.store.list(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn mux_audio_job_completes() {
        let r = rig(false).await;
        let video = touch(r._dir.path(), "v.mp4");
        let audio = touch(r._dir.path(), "bed.mp3");

        let job = r
            .scheduler
            .submit(JobPayload::MuxAudio {
                source: video,
                audio,
                volume: 0.5,
                loop_audio: true,
            })
            .await
            .unwrap();

        let done = wait_terminal(&r.store, &job.id).await;
        assert_eq!(done.status, JobStatus::Completed);
        assert!(done.outputs["video"].exists());
    }
}
