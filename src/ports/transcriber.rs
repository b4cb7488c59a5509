use crate::domain::subtitles::RawSegment;
use crate::ports::BoxError;
use crate::resources::policy::ModelTier;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

/// A loaded transcription model instance. The call is opaque, long-running
/// and non-cancellable; timestamps in the result are relative to the start
/// of `media`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, media: &Path, language: &str) -> Result<Vec<RawSegment>, BoxError>;
}

/// Loads model instances. Every call returns an isolated handle, so
/// parallel chunk tasks never share mutable model state.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TranscriberFactory: Send + Sync {
    async fn load(&self, tier: ModelTier) -> Result<Arc<dyn Transcriber>, BoxError>;
}
