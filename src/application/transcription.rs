//! Transcription pipeline: single-pass, chunked-sequential and
//! chunked-parallel execution over the media and transcriber ports.

use crate::application::{PipelineError, ProgressSink};
use crate::config::ChunkFailurePolicy;
use crate::domain::chunks::{partition, ChunkDescriptor};
use crate::domain::subtitles::{
    analyze_gaps, sort_by_start, GapAnalysis, RawSegment, Recommendation, Severity, TimedSegment,
};
use crate::ports::media::MediaToolkit;
use crate::ports::transcriber::Transcriber;
use crate::resources::model_pool::ModelPool;
use crate::resources::monitor::ResourceMonitor;
use crate::resources::policy::{
    plan_transcription, shrink_audio_chunk, ModelTier, PolicyConfig, ProcessingPlan,
};
use futures::stream::{self, StreamExt};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Everything a transcription run produces. The analysis is advisory and
/// never blocks the job.
pub struct TranscriptionOutcome {
    pub segments: Vec<TimedSegment>,
    pub analysis: GapAnalysis,
    pub plan: ProcessingPlan,
}

pub struct TranscriptionPipeline<M: MediaToolkit + ?Sized> {
    media: Arc<M>,
    pool: Arc<ModelPool>,
    monitor: Arc<ResourceMonitor>,
    policy: PolicyConfig,
    chunk_failure: ChunkFailurePolicy,
}

impl<M> TranscriptionPipeline<M>
where
    M: MediaToolkit + ?Sized + 'static,
{
    pub fn new(
        media: Arc<M>,
        pool: Arc<ModelPool>,
        monitor: Arc<ResourceMonitor>,
        policy: PolicyConfig,
        chunk_failure: ChunkFailurePolicy,
    ) -> Self {
        Self {
            media,
            pool,
            monitor,
            policy,
            chunk_failure,
        }
    }

    /// Probe the asset, derive a plan from a fresh snapshot, and run it.
    pub async fn run(
        &self,
        source: &Path,
        language: &str,
        timing_offset: f64,
        progress: &dyn ProgressSink,
    ) -> Result<TranscriptionOutcome, PipelineError> {
        let duration = self
            .media
            .duration_secs(source)
            .await
            .map_err(PipelineError::Probe)?;

        let snapshot = self.monitor.snapshot();
        let plan = plan_transcription(
            &snapshot,
            duration,
            self.monitor.physical_cores(),
            &self.policy,
        );
        info!(
            tier = plan.tier.name(),
            chunked = plan.chunked,
            chunk_secs = plan.chunk_secs,
            parallelism = plan.parallelism,
            duration,
            "transcription plan"
        );

        self.run_with_plan(plan, source, duration, language, timing_offset, progress)
            .await
    }

    /// Execute a pre-computed plan. Split out from [`run`](Self::run) so the
    /// branch logic is testable with a fixed plan.
    pub async fn run_with_plan(
        &self,
        plan: ProcessingPlan,
        source: &Path,
        duration: f64,
        language: &str,
        timing_offset: f64,
        progress: &dyn ProgressSink,
    ) -> Result<TranscriptionOutcome, PipelineError> {
        let mut segments = if !plan.chunked {
            self.single_pass(plan, source, language, timing_offset, progress)
                .await?
        } else if plan.parallelism > 1 {
            self.chunked_parallel(plan, source, duration, language, timing_offset, progress)
                .await?
        } else {
            self.chunked_sequential(plan, source, duration, language, timing_offset, progress)
                .await?
        };

        if segments.is_empty() {
            return Err(PipelineError::NoSpeech);
        }

        // Completion order of parallel chunks carries no meaning.
        sort_by_start(&mut segments);
        let mut analysis = analyze_gaps(&segments);
        if plan.tier == ModelTier::Tiny {
            analysis.recommendations.push(Recommendation {
                kind: "model_quality".to_string(),
                severity: Severity::Low,
                message: "lowest-memory model tier was used; resubmit with more memory available for better accuracy".to_string(),
                suggested_offset: None,
            });
        }

        Ok(TranscriptionOutcome {
            segments,
            analysis,
            plan,
        })
    }

    async fn single_pass(
        &self,
        plan: ProcessingPlan,
        source: &Path,
        language: &str,
        timing_offset: f64,
        progress: &dyn ProgressSink,
    ) -> Result<Vec<TimedSegment>, PipelineError> {
        progress.report(10, "transcribing").await;
        let model = self
            .pool
            .acquire(plan.tier)
            .await
            .map_err(PipelineError::ModelLoad)?;

        let raw = model
            .transcribe(source, language)
            .await
            .map_err(PipelineError::Transcription)?;
        self.pool.release();

        progress.report(95, "transcription finished").await;
        Ok(map_segments(&raw, timing_offset))
    }

    /// One chunk at a time. The window is re-evaluated against a fresh
    /// snapshot before each chunk and may shrink, never grow. The model is
    /// re-acquired per chunk so an emergency reclamation between chunks
    /// only costs one reload.
    async fn chunked_sequential(
        &self,
        plan: ProcessingPlan,
        source: &Path,
        duration: f64,
        language: &str,
        timing_offset: f64,
        progress: &dyn ProgressSink,
    ) -> Result<Vec<TimedSegment>, PipelineError> {
        let workdir = tempfile::tempdir()?;
        let mut segments = Vec::new();
        let mut chunk_secs = plan.chunk_secs;
        let mut current = 0.0;
        let mut index = 0usize;

        while current < duration {
            let snapshot = self.monitor.snapshot();
            chunk_secs = shrink_audio_chunk(chunk_secs, snapshot.memory_available_bytes);
            let end = (current + chunk_secs).min(duration);
            let chunk_path = workdir.path().join(format!("audio_{:04}.wav", index));

            self.media
                .extract_audio_slice(source, current, end, &chunk_path)
                .await
                .map_err(PipelineError::Media)?;

            let model = self
                .pool
                .acquire(plan.tier)
                .await
                .map_err(PipelineError::ModelLoad)?;
            let raw = model
                .transcribe(&chunk_path, language)
                .await
                .map_err(PipelineError::Transcription)?;
            segments.extend(map_segments(&raw, timing_offset + current));

            // Each chunk's artifact is released before the next is cut.
            let _ = tokio::fs::remove_file(&chunk_path).await;

            let done = (end / duration * 85.0) as u8 + 10;
            progress
                .report(done.min(95), &format!("transcribed up to {:.0}s", end))
                .await;

            current = end;
            index += 1;
        }

        self.pool.release();
        Ok(segments)
    }

    /// Fix all windows up front, pre-extract the slices, then fan out over
    /// a bounded set of tasks. Each task loads its own isolated model
    /// instance; memory, not cores, bounds the fan-out degree.
    async fn chunked_parallel(
        &self,
        plan: ProcessingPlan,
        source: &Path,
        duration: f64,
        language: &str,
        timing_offset: f64,
        progress: &dyn ProgressSink,
    ) -> Result<Vec<TimedSegment>, PipelineError> {
        let workdir = tempfile::tempdir()?;
        let chunks = partition(duration, plan.chunk_secs, workdir.path(), "audio", "wav");
        let total = chunks.len();

        progress.report(5, "extracting audio chunks").await;
        for chunk in &chunks {
            self.media
                .extract_audio_slice(source, chunk.start, chunk.end, &chunk.path)
                .await
                .map_err(PipelineError::Media)?;
        }

        progress
            .report(15, &format!("transcribing {} chunks", total))
            .await;

        let language = language.to_string();
        let results: Vec<(ChunkDescriptor, Result<Vec<RawSegment>, _>)> =
            stream::iter(chunks.into_iter())
                .map(|chunk| {
                    let pool = Arc::clone(&self.pool);
                    let language = language.clone();
                    let tier = plan.tier;
                    async move {
                        let result = match pool.load_isolated(tier).await {
                            Ok(model) => model.transcribe(&chunk.path, &language).await,
                            Err(e) => Err(e),
                        };
                        (chunk, result)
                    }
                })
                .buffer_unordered(plan.parallelism)
                .collect()
                .await;

        let mut segments = Vec::new();
        let mut done = 0usize;
        for (chunk, result) in results {
            match result {
                Ok(raw) => segments.extend(map_segments(&raw, timing_offset + chunk.start)),
                Err(e) => {
                    self.handle_failed_chunk(
                        plan,
                        &chunk,
                        &language,
                        timing_offset,
                        e,
                        &mut segments,
                    )
                    .await?;
                }
            }
            done += 1;
            let pct = 15 + (done * 75 / total.max(1)) as u8;
            progress
                .report(pct.min(95), &format!("chunk {}/{} merged", done, total))
                .await;
        }

        Ok(segments)
    }

    /// Apply the configured chunk-failure policy. `retry` re-runs the chunk
    /// serially through the shared pool; a second failure degrades to the
    /// drop behaviour so one bad chunk never sinks the whole job.
    async fn handle_failed_chunk(
        &self,
        plan: ProcessingPlan,
        chunk: &ChunkDescriptor,
        language: &str,
        timing_offset: f64,
        error: crate::ports::BoxError,
        segments: &mut Vec<TimedSegment>,
    ) -> Result<(), PipelineError> {
        match self.chunk_failure {
            ChunkFailurePolicy::Drop => {
                warn!(
                    chunk = chunk.index,
                    start = chunk.start,
                    end = chunk.end,
                    error = %error,
                    "dropping failed chunk"
                );
            }
            ChunkFailurePolicy::Retry => {
                warn!(chunk = chunk.index, error = %error, "retrying failed chunk serially");
                let model = self
                    .pool
                    .acquire(plan.tier)
                    .await
                    .map_err(PipelineError::ModelLoad)?;
                match model.transcribe(&chunk.path, language).await {
                    Ok(raw) => {
                        segments.extend(map_segments(&raw, timing_offset + chunk.start));
                    }
                    Err(retry_err) => {
                        warn!(chunk = chunk.index, error = %retry_err, "retry failed, dropping chunk");
                    }
                }
            }
        }
        Ok(())
    }
}

fn map_segments(raw: &[RawSegment], offset: f64) -> Vec<TimedSegment> {
    raw.iter().map(|r| TimedSegment::from_raw(r, offset)).collect()
}
