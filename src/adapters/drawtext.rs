//! Overlay rendering through ffmpeg drawtext filters.

use crate::domain::overlay::{OverlayElement, OverlayStyle, Position};
use crate::ports::renderer::{EncodeParams, OverlayRenderer};
use crate::ports::BoxError;
use async_trait::async_trait;
use std::path::Path;
use std::process::Output;
use tokio::process::Command;
use tracing::debug;

#[derive(Clone, Copy, Default)]
pub struct FfmpegOverlayRenderer;

impl FfmpegOverlayRenderer {
    pub fn new() -> Self {
        Self
    }
}

/// Escape text for use inside a drawtext `text=` argument.
fn escape_drawtext(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '\\' => escaped.push_str("\\\\"),
            '\'' => escaped.push_str("\\'"),
            ':' => escaped.push_str("\\:"),
            '%' => escaped.push_str("\\%"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

fn position_expr(position: Position) -> (&'static str, &'static str) {
    match position {
        Position::TopLeft => ("20", "20"),
        Position::TopCenter => ("(w-text_w)/2", "20"),
        Position::TopRight => ("w-text_w-20", "20"),
        Position::CenterLeft => ("20", "(h-text_h)/2"),
        Position::CenterCenter => ("(w-text_w)/2", "(h-text_h)/2"),
        Position::CenterRight => ("w-text_w-20", "(h-text_h)/2"),
        Position::BottomLeft => ("20", "h-text_h-40"),
        Position::BottomCenter => ("(w-text_w)/2", "h-text_h-40"),
        Position::BottomRight => ("w-text_w-20", "h-text_h-40"),
    }
}

/// Build the filtergraph for a set of timed overlays. Emphasised elements
/// render slightly larger so karaoke highlights stand out.
fn build_drawtext_filter(overlays: &[OverlayElement], style: &OverlayStyle) -> String {
    let (x, y) = position_expr(style.position);
    let mut filters = Vec::with_capacity(overlays.len());
    for overlay in overlays {
        let size = if overlay.emphasis {
            style.font_size + style.font_size / 5
        } else {
            style.font_size
        };
        filters.push(format!(
            "drawtext=text='{}':fontsize={}:fontcolor={}:bordercolor={}:borderw={}:x={}:y={}:enable='between(t,{},{})'",
            escape_drawtext(&overlay.text),
            size,
            style.line_color,
            style.outline_color,
            style.outline_width,
            x,
            y,
            overlay.start,
            overlay.end,
        ));
    }
    filters.join(",")
}

/// Arguments between the input and the output path. Caption-free chunks
/// still re-encode with the job parameters so every chunk of a chunked
/// composite carries the same codec settings into the stream-copy join.
fn render_args(overlays: &[OverlayElement], style: &OverlayStyle, encode: &EncodeParams) -> Vec<String> {
    let mut args = Vec::new();
    if !overlays.is_empty() {
        args.push("-vf".to_string());
        args.push(build_drawtext_filter(overlays, style));
    }
    args.extend([
        "-c:v".to_string(),
        encode.video_codec.clone(),
        "-preset".to_string(),
        encode.preset.clone(),
        "-threads".to_string(),
        encode.threads.to_string(),
        "-c:a".to_string(),
        encode.audio_codec.clone(),
    ]);
    args
}

fn check(output: Output) -> Result<(), BoxError> {
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(format!("ffmpeg failed ({}): {}", output.status, stderr.trim()).into());
    }
    Ok(())
}

#[async_trait]
impl OverlayRenderer for FfmpegOverlayRenderer {
    async fn render(
        &self,
        source: &Path,
        overlays: &[OverlayElement],
        style: &OverlayStyle,
        encode: &EncodeParams,
        output: &Path,
    ) -> Result<(), BoxError> {
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        debug!(source = %source.display(), overlays = overlays.len(), "rendering overlays");

        let mut command = Command::new("ffmpeg");
        command.arg("-y").arg("-i").arg(source);
        for arg in render_args(overlays, style, encode) {
            command.arg(arg);
        }
        let result = command.arg(output).output().await?;
        check(result)
    }
}
