use crate::domain::overlay::{OverlayElement, OverlayStyle};
use crate::ports::BoxError;
use async_trait::async_trait;
use std::path::Path;

/// Encode settings fixed once per job. Chunked compositing renders every
/// chunk with the same parameters so the final stream-copy join is valid.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodeParams {
    pub video_codec: String,
    pub audio_codec: String,
    pub preset: String,
    pub threads: usize,
}

impl EncodeParams {
    /// Conservative defaults for constrained machines.
    pub fn constrained() -> Self {
        Self {
            video_codec: "libx264".to_string(),
            audio_codec: "aac".to_string(),
            preset: "ultrafast".to_string(),
            threads: 1,
        }
    }

    pub fn standard(threads: usize) -> Self {
        Self {
            video_codec: "libx264".to_string(),
            audio_codec: "aac".to_string(),
            preset: "fast".to_string(),
            threads: threads.max(1),
        }
    }
}

/// Renders timed text overlays onto a media slice and encodes the result.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OverlayRenderer: Send + Sync {
    async fn render(
        &self,
        source: &Path,
        overlays: &[OverlayElement],
        style: &OverlayStyle,
        encode: &EncodeParams,
        output: &Path,
    ) -> Result<(), BoxError>;
}
