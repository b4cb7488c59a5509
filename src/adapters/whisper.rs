//! whisper.cpp CLI transcription adapter.
//!
//! Shells out to `whisper-cli` with full-JSON output and maps the result
//! into raw segments. One `WhisperCliTranscriber` wraps one model file, so
//! the factory gives parallel chunk tasks genuinely isolated instances.

use crate::domain::subtitles::{RawSegment, RawWord};
use crate::ports::transcriber::{Transcriber, TranscriberFactory};
use crate::ports::BoxError;
use crate::resources::policy::ModelTier;
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::process::Command;
use tracing::debug;

pub struct WhisperCliTranscriber {
    binary: PathBuf,
    model: PathBuf,
}

pub struct WhisperCliFactory {
    binary: PathBuf,
    model_dir: PathBuf,
}

impl WhisperCliFactory {
    pub fn new(binary: impl Into<PathBuf>, model_dir: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            model_dir: model_dir.into(),
        }
    }

    fn model_file(tier: ModelTier) -> &'static str {
        match tier {
            ModelTier::Tiny => "ggml-tiny.bin",
            ModelTier::Base => "ggml-base.bin",
            ModelTier::Small => "ggml-small.bin",
            ModelTier::Medium => "ggml-medium.bin",
            ModelTier::Large => "ggml-large-v3.bin",
        }
    }
}

#[async_trait]
impl TranscriberFactory for WhisperCliFactory {
    async fn load(&self, tier: ModelTier) -> Result<Arc<dyn Transcriber>, BoxError> {
        let model = self.model_dir.join(Self::model_file(tier));
        if !tokio::fs::try_exists(&model).await? {
            return Err(format!("model file not found: {}", model.display()).into());
        }
        debug!(tier = tier.name(), model = %model.display(), "loading transcription model");
        Ok(Arc::new(WhisperCliTranscriber {
            binary: self.binary.clone(),
            model,
        }))
    }
}

#[async_trait]
impl Transcriber for WhisperCliTranscriber {
    async fn transcribe(&self, media: &Path, language: &str) -> Result<Vec<RawSegment>, BoxError> {
        let workdir = tempfile::tempdir()?;
        let out_base = workdir.path().join("transcript");

        let output = Command::new(&self.binary)
            .arg("-m").arg(&self.model)
            .arg("-l").arg(language)
            .arg("--output-json-full")
            .arg("--output-file").arg(&out_base)
            .arg("--no-prints")
            .arg(media)
            .output()
            .await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!("whisper-cli failed ({}): {}", output.status, stderr.trim()).into());
        }

        let json_path = out_base.with_extension("json");
        let body = tokio::fs::read_to_string(&json_path).await?;
        parse_full_json(&body)
    }
}

#[derive(Deserialize)]
struct FullOutput {
    transcription: Vec<JsonSegment>,
}

#[derive(Deserialize)]
struct JsonSegment {
    offsets: JsonOffsets,
    text: String,
    #[serde(default)]
    tokens: Vec<JsonToken>,
}

#[derive(Deserialize)]
struct JsonToken {
    text: String,
    offsets: JsonOffsets,
}

#[derive(Deserialize)]
struct JsonOffsets {
    from: u64,
    to: u64,
}

fn millis_to_secs(ms: u64) -> f64 {
    ms as f64 / 1000.0
}

/// Map whisper.cpp full-JSON output into raw segments. Special tokens such
/// as `[_BEG_]` carry no caption text and are skipped.
fn parse_full_json(body: &str) -> Result<Vec<RawSegment>, BoxError> {
    let parsed: FullOutput = serde_json::from_str(body)?;
    let segments = parsed
        .transcription
        .into_iter()
        .map(|seg| {
            let words = seg
                .tokens
                .into_iter()
                .filter(|token| {
                    let trimmed = token.text.trim();
                    !trimmed.is_empty() && !(trimmed.starts_with("[_") && trimmed.ends_with("_]"))
                })
                .map(|token| RawWord {
                    word: token.text.trim().to_string(),
                    start: millis_to_secs(token.offsets.from),
                    end: millis_to_secs(token.offsets.to),
                })
                .collect();
            RawSegment {
                start: millis_to_secs(seg.offsets.from),
                end: millis_to_secs(seg.offsets.to),
                text: seg.text.trim().to_string(),
                words,
            }
        })
        .collect();
    Ok(segments)
}
