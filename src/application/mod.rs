//! Application layer - pipelines and scheduling over the ports.

pub mod compositing;
pub mod scheduler;
pub mod transcription;

use crate::ports::BoxError;
use async_trait::async_trait;
use std::fmt;

/// Failures surfaced by the processing pipelines. Stage-tagged so the job
/// record's error message says where the job died.
#[derive(Debug)]
pub enum PipelineError {
    /// Probing the source asset failed
    Probe(BoxError),
    /// Loading a transcription model failed
    ModelLoad(BoxError),
    Transcription(BoxError),
    Rendering(BoxError),
    /// Slicing, joining or muxing failed
    Media(BoxError),
    /// Every chunk failed or the asset produced no usable segments
    NoSpeech,
    Io(std::io::Error),
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::Probe(e) => write!(f, "failed to probe source: {}", e),
            PipelineError::ModelLoad(e) => write!(f, "failed to load model: {}", e),
            PipelineError::Transcription(e) => write!(f, "transcription failed: {}", e),
            PipelineError::Rendering(e) => write!(f, "overlay rendering failed: {}", e),
            PipelineError::Media(e) => write!(f, "media operation failed: {}", e),
            PipelineError::NoSpeech => write!(f, "no usable speech segments produced"),
            PipelineError::Io(e) => write!(f, "io error: {}", e),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PipelineError::Probe(e)
            | PipelineError::ModelLoad(e)
            | PipelineError::Transcription(e)
            | PipelineError::Rendering(e)
            | PipelineError::Media(e) => Some(e.as_ref()),
            PipelineError::Io(e) => Some(e),
            PipelineError::NoSpeech => None,
        }
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        PipelineError::Io(err)
    }
}

/// Where pipelines report forward progress. Each pipeline reports 0-100 for
/// its own stage; callers rescale into the job's overall progress window.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn report(&self, progress: u8, message: &str);
}

/// Sink for call sites that do not track progress (tests, ad-hoc runs).
pub struct NullProgress;

#[async_trait]
impl ProgressSink for NullProgress {
    async fn report(&self, _progress: u8, _message: &str) {}
}
