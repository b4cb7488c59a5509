//! Compositing pipeline: burn timed overlays into video, chunked when the
//! asset is long or memory is tight, joined back by stream copy.

use crate::application::{PipelineError, ProgressSink};
use crate::domain::overlay::{plan_overlays, OverlayStyle, WordMode};
use crate::domain::subtitles::TimedSegment;
use crate::ports::media::MediaToolkit;
use crate::ports::renderer::{EncodeParams, OverlayRenderer};
use crate::resources::monitor::ResourceMonitor;
use crate::resources::policy::{
    plan_compositing, shrink_video_chunk, CompositePlan, CHUNK_MEMORY_FLOOR_BYTES,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

pub struct CompositingPipeline<M: MediaToolkit + ?Sized, R: OverlayRenderer + ?Sized> {
    media: Arc<M>,
    renderer: Arc<R>,
    monitor: Arc<ResourceMonitor>,
}

impl<M, R> CompositingPipeline<M, R>
where
    M: MediaToolkit + ?Sized + 'static,
    R: OverlayRenderer + ?Sized + 'static,
{
    pub fn new(media: Arc<M>, renderer: Arc<R>, monitor: Arc<ResourceMonitor>) -> Self {
        Self {
            media,
            renderer,
            monitor,
        }
    }

    /// Probe, plan from a fresh snapshot and render `segments` over the
    /// source into `output`.
    pub async fn run(
        &self,
        source: &Path,
        segments: &[TimedSegment],
        word_mode: WordMode,
        style: &OverlayStyle,
        output: &Path,
        progress: &dyn ProgressSink,
    ) -> Result<(), PipelineError> {
        let duration = self
            .media
            .duration_secs(source)
            .await
            .map_err(PipelineError::Probe)?;

        let snapshot = self.monitor.snapshot();
        let plan = plan_compositing(&snapshot, duration);

        // Encode parameters are fixed once per job: the final stream-copy
        // join is only valid when every chunk shares them.
        let encode = if snapshot.memory_available_bytes < CHUNK_MEMORY_FLOOR_BYTES
            || snapshot.memory_used_fraction > 0.6
        {
            EncodeParams::constrained()
        } else {
            EncodeParams::standard(self.monitor.physical_cores())
        };
        info!(
            chunked = plan.chunked,
            chunk_secs = plan.chunk_secs,
            preset = %encode.preset,
            duration,
            "compositing plan"
        );

        self.run_with_plan(plan, &encode, source, duration, segments, word_mode, style, output, progress)
            .await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn run_with_plan(
        &self,
        plan: CompositePlan,
        encode: &EncodeParams,
        source: &Path,
        duration: f64,
        segments: &[TimedSegment],
        word_mode: WordMode,
        style: &OverlayStyle,
        output: &Path,
        progress: &dyn ProgressSink,
    ) -> Result<(), PipelineError> {
        if !plan.chunked {
            progress.report(10, "rendering overlays").await;
            let overlays = plan_overlays(segments, word_mode, style);
            self.renderer
                .render(source, &overlays, style, encode, output)
                .await
                .map_err(PipelineError::Rendering)?;
            progress.report(95, "render finished").await;
            return Ok(());
        }

        let workdir = tempfile::tempdir()?;
        let mut rendered: Vec<PathBuf> = Vec::new();
        let mut chunk_secs = plan.chunk_secs;
        let mut current = 0.0;
        let mut index = 0usize;

        while current < duration {
            let snapshot = self.monitor.snapshot();
            chunk_secs = shrink_video_chunk(chunk_secs, snapshot.memory_available_bytes);
            let end = (current + chunk_secs).min(duration);

            // Only the captions visible in this window, re-zeroed to the
            // chunk's own timeline.
            let clipped: Vec<TimedSegment> = segments
                .iter()
                .filter_map(|s| s.clip_to_window(current, end))
                .collect();
            let overlays = plan_overlays(&clipped, word_mode, style);

            let raw_path = workdir.path().join(format!("video_{:04}.mp4", index));
            let out_path = workdir.path().join(format!("rendered_{:04}.mp4", index));

            self.media
                .extract_video_slice(source, current, end, &raw_path)
                .await
                .map_err(PipelineError::Media)?;
            self.renderer
                .render(&raw_path, &overlays, style, encode, &out_path)
                .await
                .map_err(PipelineError::Rendering)?;

            let _ = tokio::fs::remove_file(&raw_path).await;
            rendered.push(out_path);

            let done = (end / duration * 80.0) as u8 + 10;
            progress
                .report(done.min(90), &format!("rendered up to {:.0}s", end))
                .await;

            current = end;
            index += 1;
        }

        progress.report(92, "joining rendered chunks").await;
        self.media
            .concatenate(&rendered, output)
            .await
            .map_err(PipelineError::Media)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::NullProgress;
    use crate::ports::media::MockMediaToolkit;
    use crate::ports::renderer::MockOverlayRenderer;
    use crate::resources::monitor::PressureThresholds;

    fn segment(start: f64, end: f64, text: &str) -> TimedSegment {
        TimedSegment {
            start,
            end,
            text: text.to_string(),
            words: Vec::new(),
        }
    }

    fn pipeline(
        media: MockMediaToolkit,
        renderer: MockOverlayRenderer,
    ) -> CompositingPipeline<MockMediaToolkit, MockOverlayRenderer> {
        CompositingPipeline::new(
            Arc::new(media),
            Arc::new(renderer),
            Arc::new(ResourceMonitor::new(PressureThresholds::default())),
        )
    }

    #[tokio::test]
    async fn single_pass_renders_straight_to_output() {
        let media = MockMediaToolkit::new();
        let mut renderer = MockOverlayRenderer::new();
        renderer
            .expect_render()
            .withf(|source, overlays, _, _, output| {
                source == Path::new("/media/in.mp4")
                    && output == Path::new("/out/final.mp4")
                    && overlays.len() == 1
            })
            .times(1)
            .returning(|_, _, _, _, _| Ok(()));
        let p = pipeline(media, renderer);

        p.run_with_plan(
            CompositePlan {
                chunked: false,
                chunk_secs: 60.0,
            },
            &EncodeParams::constrained(),
            Path::new("/media/in.mp4"),
            120.0,
            &[segment(1.0, 4.0, "hello there")],
            WordMode::Off,
            &OverlayStyle::default(),
            Path::new("/out/final.mp4"),
            &NullProgress,
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn chunked_run_clips_rezeros_and_joins_in_order() {
        let mut media = MockMediaToolkit::new();
        // 75s at the 30s floor: [0,30) [30,60) [60,75).
        media
            .expect_extract_video_slice()
            .times(3)
            .returning(|_, _, _, _| Ok(()));
        media
            .expect_concatenate()
            .withf(|inputs, output| {
                inputs.len() == 3
                    && inputs.windows(2).all(|w| w[0] < w[1])
                    && output == Path::new("/out/final.mp4")
            })
            .times(1)
            .returning(|_, _| Ok(()));

        let mut renderer = MockOverlayRenderer::new();
        // Chunk 0 carries the first caption; chunk 1's caption is re-zeroed
        // to its own timeline; chunk 2 has no captions at all.
        renderer
            .expect_render()
            .withf(|source, overlays, _, _, _| {
                let name = source.file_name().unwrap().to_string_lossy().to_string();
                match name.as_str() {
                    "video_0000.mp4" => overlays.len() == 1 && overlays[0].start == 2.0,
                    "video_0001.mp4" => overlays.len() == 1 && overlays[0].start == 5.0,
                    "video_0002.mp4" => overlays.is_empty(),
                    _ => false,
                }
            })
            .times(3)
            .returning(|_, _, _, _, _| Ok(()));
        let p = pipeline(media, renderer);

        p.run_with_plan(
            CompositePlan {
                chunked: true,
                chunk_secs: 30.0,
            },
            &EncodeParams::constrained(),
            Path::new("/media/in.mp4"),
            75.0,
            &[segment(2.0, 5.0, "first"), segment(35.0, 39.0, "second")],
            WordMode::Off,
            &OverlayStyle::default(),
            Path::new("/out/final.mp4"),
            &NullProgress,
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn render_failure_stops_the_chunked_run() {
        let mut media = MockMediaToolkit::new();
        media
            .expect_extract_video_slice()
            .times(1)
            .returning(|_, _, _, _| Ok(()));
        let mut renderer = MockOverlayRenderer::new();
        renderer
            .expect_render()
            .times(1)
            .returning(|_, _, _, _, _| Err("drawtext filter rejected".into()));
        let p = pipeline(media, renderer);

        let result = p
            .run_with_plan(
                CompositePlan {
                    chunked: true,
                    chunk_secs: 30.0,
                },
                &EncodeParams::constrained(),
                Path::new("/media/in.mp4"),
                75.0,
                &[segment(2.0, 5.0, "first")],
                WordMode::Off,
                &OverlayStyle::default(),
                Path::new("/out/final.mp4"),
                &NullProgress,
            )
            .await;

        assert!(matches!(result, Err(PipelineError::Rendering(_))));
    }
}
