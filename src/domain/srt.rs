//! Subtitle file writers (SRT, WebVTT, JSON).

use crate::domain::subtitles::TimedSegment;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubtitleFormat {
    #[default]
    Srt,
    Vtt,
    Json,
}

impl SubtitleFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            SubtitleFormat::Srt => "srt",
            SubtitleFormat::Vtt => "vtt",
            SubtitleFormat::Json => "json",
        }
    }
}

/// Write segments to `path` in the requested format.
pub async fn write_subtitles(
    segments: &[TimedSegment],
    format: SubtitleFormat,
    path: &Path,
) -> Result<(), std::io::Error> {
    match format {
        SubtitleFormat::Srt => write_srt(segments, path).await,
        SubtitleFormat::Vtt => write_vtt(segments, path).await,
        SubtitleFormat::Json => write_json(segments, path).await,
    }
}

async fn write_srt(segments: &[TimedSegment], path: &Path) -> Result<(), std::io::Error> {
    let mut file = File::create(path).await?;

    for (i, segment) in segments.iter().enumerate() {
        let block = format!(
            "{}\n{} --> {}\n{}\n\n",
            i + 1,
            srt_timestamp(segment.start),
            srt_timestamp(segment.end),
            segment.text
        );
        file.write_all(block.as_bytes()).await?;
    }

    file.flush().await
}

async fn write_vtt(segments: &[TimedSegment], path: &Path) -> Result<(), std::io::Error> {
    let mut file = File::create(path).await?;
    file.write_all(b"WEBVTT\n\n").await?;

    for segment in segments {
        let block = format!(
            "{} --> {}\n{}\n\n",
            vtt_timestamp(segment.start),
            vtt_timestamp(segment.end),
            segment.text
        );
        file.write_all(block.as_bytes()).await?;
    }

    file.flush().await
}

async fn write_json(segments: &[TimedSegment], path: &Path) -> Result<(), std::io::Error> {
    let body = serde_json::to_vec_pretty(segments)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    tokio::fs::write(path, body).await
}

/// SRT uses `HH:MM:SS,mmm`.
fn srt_timestamp(seconds: f64) -> String {
    let (h, m, s, ms) = split_seconds(seconds);
    format!("{:02}:{:02}:{:02},{:03}", h, m, s, ms)
}

/// WebVTT uses `HH:MM:SS.mmm`.
fn vtt_timestamp(seconds: f64) -> String {
    let (h, m, s, ms) = split_seconds(seconds);
    format!("{:02}:{:02}:{:02}.{:03}", h, m, s, ms)
}

fn split_seconds(seconds: f64) -> (u64, u64, u64, u64) {
    let total_ms = (seconds.max(0.0) * 1000.0).round() as u64;
    (
        total_ms / 3_600_000,
        (total_ms % 3_600_000) / 60_000,
        (total_ms % 60_000) / 1000,
        total_ms % 1000,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::fs;

    fn segments() -> Vec<TimedSegment> {
        vec![
            TimedSegment {
                start: 0.0,
                end: 2.5,
                text: "first line".to_string(),
                words: Vec::new(),
            },
            TimedSegment {
                start: 3661.25,
                end: 3663.0,
                text: "over an hour in".to_string(),
                words: Vec::new(),
            },
        ]
    }

    #[test]
    fn srt_timestamps_use_comma_millis() {
        assert_eq!(srt_timestamp(3661.25), "01:01:01,250");
        assert_eq!(vtt_timestamp(3661.25), "01:01:01.250");
        assert_eq!(srt_timestamp(0.0), "00:00:00,000");
    }

    #[tokio::test]
    async fn srt_blocks_are_numbered() {
        let path = std::env::temp_dir().join("caruso_test_out.srt");
        write_subtitles(&segments(), SubtitleFormat::Srt, &path)
            .await
            .unwrap();

        let content = fs::read_to_string(&path).await.unwrap();
        assert!(content.starts_with("1\n00:00:00,000 --> 00:00:02,500\nfirst line\n"));
        assert!(content.contains("2\n01:01:01,250 --> 01:01:03,000\nover an hour in\n"));

        let _ = fs::remove_file(path).await;
    }

    #[tokio::test]
    async fn vtt_starts_with_header() {
        let path = std::env::temp_dir().join("caruso_test_out.vtt");
        write_subtitles(&segments(), SubtitleFormat::Vtt, &path)
            .await
            .unwrap();

        let content = fs::read_to_string(&path).await.unwrap();
        assert!(content.starts_with("WEBVTT\n\n"));
        assert!(content.contains("01:01:01.250 --> 01:01:03.000"));

        let _ = fs::remove_file(path).await;
    }

    #[tokio::test]
    async fn json_round_trips() {
        let path = std::env::temp_dir().join("caruso_test_out.json");
        write_subtitles(&segments(), SubtitleFormat::Json, &path)
            .await
            .unwrap();

        let content = fs::read_to_string(&path).await.unwrap();
        let back: Vec<TimedSegment> = serde_json::from_str(&content).unwrap();
        assert_eq!(back, segments());

        let _ = fs::remove_file(path).await;
    }
}
