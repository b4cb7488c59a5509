//! ffmpeg/ffprobe shell-outs implementing the media toolkit port.

use crate::ports::media::MediaToolkit;
use crate::ports::BoxError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Output;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

#[derive(Clone, Copy, Default)]
pub struct FfmpegMedia;

impl FfmpegMedia {
    pub fn new() -> Self {
        Self
    }

    async fn ensure_parent(path: &Path) -> Result<(), BoxError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    fn check(tool: &str, output: Output) -> Result<Output, BoxError> {
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!("{} failed ({}): {}", tool, output.status, stderr.trim()).into());
        }
        Ok(output)
    }
}

#[async_trait]
impl MediaToolkit for FfmpegMedia {
    async fn duration_secs(&self, path: &Path) -> Result<f64, BoxError> {
        let output = Command::new("ffprobe")
            .arg("-v").arg("error")
            .arg("-show_entries").arg("format=duration")
            .arg("-of").arg("default=noprint_wrappers=1:nokey=1")
            .arg(path)
            .output()
            .await?;
        let output = Self::check("ffprobe", output)?;

        let text = String::from_utf8_lossy(&output.stdout);
        let duration: f64 = text.trim().parse().map_err(|e| {
            format!("ffprobe returned an unparseable duration '{}': {}", text.trim(), e)
        })?;
        Ok(duration)
    }

    async fn extract_audio_slice(
        &self,
        source: &Path,
        start: f64,
        end: f64,
        output: &Path,
    ) -> Result<(), BoxError> {
        Self::ensure_parent(output).await?;
        debug!(source = %source.display(), start, end, "extracting audio slice");

        // Mono 16kHz PCM is what the transcription models expect.
        let result = Command::new("ffmpeg")
            .arg("-y")
            .arg("-ss").arg(start.to_string())
            .arg("-to").arg(end.to_string())
            .arg("-i").arg(source)
            .arg("-vn")
            .arg("-acodec").arg("pcm_s16le")
            .arg("-ar").arg("16000")
            .arg("-ac").arg("1")
            .arg(output)
            .output()
            .await?;
        Self::check("ffmpeg", result)?;
        Ok(())
    }

    async fn extract_video_slice(
        &self,
        source: &Path,
        start: f64,
        end: f64,
        output: &Path,
    ) -> Result<(), BoxError> {
        Self::ensure_parent(output).await?;
        debug!(source = %source.display(), start, end, "extracting video slice");

        let result = Command::new("ffmpeg")
            .arg("-y")
            .arg("-ss").arg(start.to_string())
            .arg("-i").arg(source)
            .arg("-t").arg((end - start).to_string())
            .arg("-c:v").arg("libx264")
            .arg("-preset").arg("ultrafast")
            .arg("-c:a").arg("aac")
            .arg(output)
            .output()
            .await?;
        Self::check("ffmpeg", result)?;
        Ok(())
    }

    async fn concatenate(&self, inputs: &[PathBuf], output: &Path) -> Result<(), BoxError> {
        if inputs.is_empty() {
            return Err("concatenate called with no inputs".into());
        }
        Self::ensure_parent(output).await?;

        // ffmpeg concat demuxer wants a list file; stream copy requires
        // identical codec parameters across every input.
        let list = tempfile::Builder::new().suffix(".txt").tempfile()?;
        {
            let mut file = tokio::fs::File::create(list.path()).await?;
            for input in inputs {
                file.write_all(format!("file '{}'\n", input.display()).as_bytes())
                    .await?;
            }
            file.flush().await?;
        }

        let result = Command::new("ffmpeg")
            .arg("-y")
            .arg("-f").arg("concat")
            .arg("-safe").arg("0")
            .arg("-i").arg(list.path())
            .arg("-c").arg("copy")
            .arg(output)
            .output()
            .await?;
        Self::check("ffmpeg", result)?;
        Ok(())
    }

    async fn mux_audio(
        &self,
        video: &Path,
        audio: &Path,
        volume: f32,
        loop_audio: bool,
        output: &Path,
    ) -> Result<(), BoxError> {
        Self::ensure_parent(output).await?;

        let mut command = Command::new("ffmpeg");
        command.arg("-y").arg("-i").arg(video);
        if loop_audio {
            command.arg("-stream_loop").arg("-1");
        }
        command
            .arg("-i").arg(audio)
            .arg("-filter_complex")
            .arg(format!(
                "[1:a]volume={}[bed];[0:a][bed]amix=inputs=2:duration=first[mix]",
                volume
            ))
            .arg("-map").arg("0:v")
            .arg("-map").arg("[mix]")
            .arg("-c:v").arg("copy")
            .arg("-c:a").arg("aac")
            .arg("-shortest")
            .arg(output);

        let result = command.output().await?;
        Self::check("ffmpeg", result)?;
        Ok(())
    }
}
