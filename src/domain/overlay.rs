use crate::domain::subtitles::{wrap_lines, TimedSegment};
use serde::{Deserialize, Serialize};

/// Word-level display mode. These are rendering policies over the same
/// segment data, not separate pipelines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WordMode {
    /// One overlay per segment, line-wrapped
    #[default]
    Off,
    /// One emphasised overlay per word, no background sentence
    Karaoke,
    /// One overlay per word, shown in isolation
    Popup,
    /// Overlays carrying the running concatenation of words seen so far
    Typewriter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Position {
    TopLeft,
    TopCenter,
    TopRight,
    CenterLeft,
    CenterCenter,
    CenterRight,
    BottomLeft,
    BottomCenter,
    BottomRight,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct OverlayStyle {
    pub font_size: u32,
    pub line_color: String,
    pub outline_color: String,
    pub outline_width: u32,
    pub position: Position,
    pub max_words_per_line: usize,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            font_size: 80,
            line_color: "#FFFFFF".to_string(),
            outline_color: "#000000".to_string(),
            outline_width: 3,
            position: Position::BottomCenter,
            max_words_per_line: 4,
        }
    }
}

/// One piece of timed text to draw over the video.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayElement {
    pub text: String,
    pub start: f64,
    pub end: f64,
    /// Drawn larger/highlighted (karaoke word emphasis)
    pub emphasis: bool,
}

/// Expand segments into overlay elements for the chosen display mode.
/// Segments without word-level data fall back to segment-level rendering
/// for that segment only, in every mode.
pub fn plan_overlays(
    segments: &[TimedSegment],
    mode: WordMode,
    style: &OverlayStyle,
) -> Vec<OverlayElement> {
    let mut elements = Vec::new();

    for segment in segments {
        if mode == WordMode::Off || segment.words.is_empty() {
            elements.push(OverlayElement {
                text: wrap_lines(&segment.text, style.max_words_per_line),
                start: segment.start,
                end: segment.end,
                emphasis: false,
            });
            continue;
        }

        match mode {
            WordMode::Karaoke => {
                for word in &segment.words {
                    if word.word.is_empty() {
                        continue;
                    }
                    elements.push(OverlayElement {
                        text: word.word.clone(),
                        start: word.start,
                        end: word.end,
                        emphasis: true,
                    });
                }
            }
            WordMode::Popup => {
                for word in &segment.words {
                    if word.word.is_empty() {
                        continue;
                    }
                    elements.push(OverlayElement {
                        text: word.word.clone(),
                        start: word.start,
                        end: word.end,
                        emphasis: false,
                    });
                }
            }
            WordMode::Typewriter => {
                let mut accumulated: Vec<&str> = Vec::new();
                for (i, word) in segment.words.iter().enumerate() {
                    if word.word.is_empty() {
                        continue;
                    }
                    accumulated.push(&word.word);
                    // Each reveal stands until the next word appears; the
                    // last one holds to the end of the segment.
                    let end = segment
                        .words
                        .get(i + 1)
                        .map(|next| next.start)
                        .unwrap_or(segment.end);
                    elements.push(OverlayElement {
                        text: wrap_lines(&accumulated.join(" "), style.max_words_per_line),
                        start: word.start,
                        end: end.max(word.start + 0.05),
                        emphasis: false,
                    });
                }
            }
            WordMode::Off => unreachable!(),
        }
    }

    elements
}
