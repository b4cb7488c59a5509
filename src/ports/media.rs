use crate::ports::BoxError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Media probing, slicing and joining. Realized by ffmpeg/ffprobe
/// shell-outs in production; opaque, possibly-failing external calls.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaToolkit: Send + Sync {
    /// Total duration of the asset in seconds.
    async fn duration_secs(&self, path: &Path) -> Result<f64, BoxError>;

    /// Extract the [start, end) audio slice as mono 16kHz PCM, the input
    /// shape the transcription capability expects.
    async fn extract_audio_slice(
        &self,
        source: &Path,
        start: f64,
        end: f64,
        output: &Path,
    ) -> Result<(), BoxError>;

    /// Extract the [start, end) slice with both streams intact.
    async fn extract_video_slice(
        &self,
        source: &Path,
        start: f64,
        end: f64,
        output: &Path,
    ) -> Result<(), BoxError>;

    /// Stream-copy concatenation in input order. No re-encode: valid only
    /// when every input shares identical codec parameters.
    async fn concatenate(&self, inputs: &[PathBuf], output: &Path) -> Result<(), BoxError>;

    /// Mix an audio bed under the video's own audio.
    async fn mux_audio(
        &self,
        video: &Path,
        audio: &Path,
        volume: f32,
        loop_audio: bool,
        output: &Path,
    ) -> Result<(), BoxError>;
}
