use serde::{Deserialize, Serialize};

/// Shortest caption the pipelines will emit. Raw transcription output can
/// contain zero- or negative-length units after offset adjustment; every
/// emitted interval is floored to this duration.
pub const MIN_CAPTION_SECS: f64 = 0.1;

/// A single word with its timing inside a segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimedWord {
    pub word: String,
    /// Start time in seconds
    pub start: f64,
    /// End time in seconds
    pub end: f64,
}

/// A caption line with word-level timings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimedSegment {
    /// Start time in seconds
    pub start: f64,
    /// End time in seconds, always > start
    pub end: f64,
    pub text: String,
    /// Word-level timings; may be empty when the transcriber produced none
    pub words: Vec<TimedWord>,
}

/// A segment as emitted by the transcription capability, before any
/// offset adjustment or duration flooring.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
    pub words: Vec<RawWord>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawWord {
    pub word: String,
    pub start: f64,
    pub end: f64,
}

impl TimedSegment {
    /// Map a raw transcriber segment into the domain shape, applying a
    /// uniform timing offset. Starts clamp to 0, every interval gets the
    /// minimum-duration floor, and word timings stay inside the (floored)
    /// segment interval.
    pub fn from_raw(raw: &RawSegment, offset: f64) -> Self {
        let start = (raw.start + offset).max(0.0);
        let end = (raw.end + offset).max(start + MIN_CAPTION_SECS);

        let words = raw
            .words
            .iter()
            .map(|w| {
                let w_start = (w.start + offset).clamp(start, end);
                TimedWord {
                    word: w.word.trim().to_string(),
                    start: w_start,
                    end: (w.end + offset).max(w_start + MIN_CAPTION_SECS).min(end),
                }
            })
            .collect();

        Self {
            start,
            end,
            text: raw.text.trim().to_string(),
            words,
        }
    }

    /// Clip this segment to a chunk window [window_start, window_end),
    /// re-zeroing timestamps relative to the window start. Returns `None`
    /// when the segment does not overlap the window. Partially overlapping
    /// segments and words are truncated at the boundary, never duplicated.
    pub fn clip_to_window(&self, window_start: f64, window_end: f64) -> Option<TimedSegment> {
        if self.start >= window_end || self.end <= window_start {
            return None;
        }

        let words = self
            .words
            .iter()
            .filter(|w| w.start < window_end && w.end > window_start)
            .map(|w| TimedWord {
                word: w.word.clone(),
                start: (w.start - window_start).max(0.0),
                end: (w.end - window_start).min(window_end - window_start),
            })
            .collect();

        Some(TimedSegment {
            start: (self.start - window_start).max(0.0),
            end: (self.end - window_start).min(window_end - window_start),
            text: self.text.clone(),
            words,
        })
    }
}

/// Sort segments by start time ascending. Completion order of parallel
/// chunks carries no meaning; this sort is the only ordering guarantee.
pub fn sort_by_start(segments: &mut [TimedSegment]) {
    segments.sort_by(|a, b| a.start.partial_cmp(&b.start).unwrap_or(std::cmp::Ordering::Equal));
}

/// Wrap segment text for on-video display, breaking at `max_words_per_line`.
pub fn wrap_lines(text: &str, max_words_per_line: usize) -> String {
    let max = max_words_per_line.max(1);
    let words: Vec<&str> = text.split_whitespace().collect();
    words
        .chunks(max)
        .map(|line| line.join(" "))
        .collect::<Vec<_>>()
        .join("\n")
}

/// An inter-segment silence gap flagged by the analysis.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SilenceGap {
    /// Index of the segment the gap follows
    pub after_segment: usize,
    pub gap_start: f64,
    pub gap_end: f64,
    pub duration: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// Advisory output of the gap analysis. Never blocks a job and never
/// mutates the segments it describes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendation {
    pub kind: String,
    pub severity: Severity,
    pub message: String,
    /// Suggested correction for a resubmission, if any
    pub suggested_offset: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GapAnalysis {
    pub total_segments: usize,
    pub significant_gaps: Vec<SilenceGap>,
    pub largest_gap: Option<SilenceGap>,
    /// Time covered from first start to last end
    pub timing_span: f64,
    pub recommendations: Vec<Recommendation>,
}

/// Gaps shorter than this are ordinary inter-caption spacing.
const SIGNIFICANT_GAP_SECS: f64 = 0.5;
/// A gap this large early in the asset usually means the whole track is
/// shifted rather than genuinely silent.
const EARLY_GAP_SECS: f64 = 5.0;
const EARLY_WINDOW_SECS: f64 = 30.0;
const CONTENT_GAP_SECS: f64 = 10.0;

/// Analyze inter-segment gaps over an ordered sequence. Large gaps near the
/// start are flagged as likely global timing misalignment.
pub fn analyze_gaps(segments: &[TimedSegment]) -> GapAnalysis {
    if segments.len() < 2 {
        return GapAnalysis {
            total_segments: segments.len(),
            significant_gaps: Vec::new(),
            largest_gap: None,
            timing_span: segments.first().map(|s| s.end - s.start).unwrap_or(0.0),
            recommendations: Vec::new(),
        };
    }

    let mut gaps = Vec::new();
    for (i, pair) in segments.windows(2).enumerate() {
        let gap = pair[1].start - pair[0].end;
        if gap > SIGNIFICANT_GAP_SECS {
            gaps.push(SilenceGap {
                after_segment: i,
                gap_start: pair[0].end,
                gap_end: pair[1].start,
                duration: gap,
            });
        }
    }

    let largest_gap = gaps
        .iter()
        .max_by(|a, b| a.duration.partial_cmp(&b.duration).unwrap_or(std::cmp::Ordering::Equal))
        .cloned();

    let mut recommendations = Vec::new();

    if let Some(early) = gaps
        .iter()
        .find(|g| g.gap_start < EARLY_WINDOW_SECS && g.duration > EARLY_GAP_SECS)
    {
        recommendations.push(Recommendation {
            kind: "timing_offset".to_string(),
            severity: Severity::High,
            message: format!(
                "large {:.1}s gap detected within the first {:.0}s; captions may be globally shifted",
                early.duration, EARLY_WINDOW_SECS
            ),
            suggested_offset: Some(-early.duration / 2.0),
        });
    }

    if let Some(largest) = &largest_gap {
        if largest.duration > CONTENT_GAP_SECS {
            recommendations.push(Recommendation {
                kind: "content_gap".to_string(),
                severity: Severity::Medium,
                message: format!(
                    "very large gap ({:.1}s) suggests silence or a scene change",
                    largest.duration
                ),
                suggested_offset: None,
            });
        }
    }

    GapAnalysis {
        total_segments: segments.len(),
        significant_gaps: gaps,
        largest_gap,
        timing_span: segments[segments.len() - 1].end - segments[0].start,
        recommendations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(start: f64, end: f64, text: &str) -> TimedSegment {
        TimedSegment {
            start,
            end,
            text: text.to_string(),
            words: Vec::new(),
        }
    }

    #[test]
    fn minimum_duration_floor_applies() {
        let raw = RawSegment {
            start: 10.0,
            end: 10.05,
            text: "hi".to_string(),
            words: Vec::new(),
        };
        let mapped = TimedSegment::from_raw(&raw, 0.0);
        assert_eq!(mapped.start, 10.0);
        assert_eq!(mapped.end, 10.1);
    }

    #[test]
    fn word_timings_stay_inside_the_segment() {
        let raw = RawSegment {
            start: 10.0,
            end: 10.05,
            text: "hi".to_string(),
            words: vec![RawWord {
                word: "hi".to_string(),
                start: 10.0,
                end: 10.2,
            }],
        };
        let mapped = TimedSegment::from_raw(&raw, 0.0);
        assert_eq!(mapped.end, 10.1);
        assert_eq!(mapped.words[0].start, 10.0);
        assert!(mapped.words[0].end <= mapped.end);
    }

    #[test]
    fn negative_start_clamps_to_zero() {
        let raw = RawSegment {
            start: 0.5,
            end: 2.0,
            text: " hello ".to_string(),
            words: vec![RawWord {
                word: "hello".to_string(),
                start: 0.5,
                end: 2.0,
            }],
        };
        let mapped = TimedSegment::from_raw(&raw, -1.0);
        assert_eq!(mapped.start, 0.0);
        assert_eq!(mapped.end, 1.0);
        assert_eq!(mapped.text, "hello");
        assert_eq!(mapped.words[0].start, 0.0);
    }

    #[test]
    fn clip_truncates_at_boundary_without_duplication() {
        let mut s = seg(55.0, 65.0, "straddles");
        s.words = vec![
            TimedWord {
                word: "before".to_string(),
                start: 55.0,
                end: 58.0,
            },
            TimedWord {
                word: "after".to_string(),
                start: 61.0,
                end: 64.0,
            },
        ];

        // Second chunk [60, 120): the segment is clipped and re-zeroed.
        let clipped = s.clip_to_window(60.0, 120.0).unwrap();
        assert_eq!(clipped.start, 0.0);
        assert_eq!(clipped.end, 5.0);
        // Only the overlapping word survives.
        assert_eq!(clipped.words.len(), 1);
        assert_eq!(clipped.words[0].word, "after");
        assert_eq!(clipped.words[0].start, 1.0);
    }

    #[test]
    fn clip_returns_none_outside_window() {
        let s = seg(10.0, 12.0, "early");
        assert!(s.clip_to_window(60.0, 120.0).is_none());
        assert!(s.clip_to_window(0.0, 10.0).is_none());
    }

    #[test]
    fn sort_orders_by_start() {
        let mut segs = vec![seg(30.0, 31.0, "c"), seg(1.0, 2.0, "a"), seg(10.0, 11.0, "b")];
        sort_by_start(&mut segs);
        let starts: Vec<f64> = segs.iter().map(|s| s.start).collect();
        assert_eq!(starts, vec![1.0, 10.0, 30.0]);
    }

    #[test]
    fn wrap_breaks_at_word_limit() {
        let wrapped = wrap_lines("one two three four five", 2);
        assert_eq!(wrapped, "one two\nthree four\nfive");
    }

    #[test]
    fn early_large_gap_suggests_offset() {
        let segs = vec![seg(0.0, 2.0, "a"), seg(10.0, 12.0, "b"), seg(12.5, 14.0, "c")];
        let analysis = analyze_gaps(&segs);

        assert_eq!(analysis.total_segments, 3);
        assert_eq!(analysis.significant_gaps.len(), 1);
        assert_eq!(analysis.largest_gap.as_ref().unwrap().duration, 8.0);

        let rec = analysis
            .recommendations
            .iter()
            .find(|r| r.kind == "timing_offset")
            .expect("early gap should produce a timing recommendation");
        assert_eq!(rec.severity, Severity::High);
        assert_eq!(rec.suggested_offset, Some(-4.0));
    }

    #[test]
    fn analysis_on_short_input_is_empty() {
        let analysis = analyze_gaps(&[seg(0.0, 1.0, "only")]);
        assert!(analysis.significant_gaps.is_empty());
        assert!(analysis.recommendations.is_empty());
    }
}
