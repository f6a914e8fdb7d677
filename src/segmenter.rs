//! Transcript-driven segmentation.
//!
//! A greedy forward scan picks split points that land on punctuation where
//! possible, so each segment ends at a natural pause and stays within the
//! requested maximum duration.

use crate::error::{DubsplitError, Result};
use crate::transcribe::WordTiming;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Words needed in a window before punctuation counts as a break.
const MIN_WORDS_BEFORE_BREAK: usize = 3;

/// A single segment longer than this multiple of the max duration is flagged.
const OVERSIZED_FACTOR: f64 = 1.5;

/// Upper bound on segments per transcript; smaller windows are rejected.
pub const MAX_SEGMENTS: usize = 10_000;

/// A contiguous time range of source audio with its transcript words.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub words: Vec<String>,
    pub start: f64,
    pub end: f64,
}

impl Segment {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    pub fn text(&self) -> String {
        self.words.join(" ")
    }
}

/// Non-fatal conditions the caller should surface.
#[derive(Debug, Clone, PartialEq)]
pub enum PlanWarning {
    /// The whole transcript fit in one overly long segment, most likely
    /// because it lacks usable punctuation.
    SingleOversizedSegment { duration: f64, max_duration: f64 },
}

impl std::fmt::Display for PlanWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlanWarning::SingleOversizedSegment {
                duration,
                max_duration,
            } => write!(
                f,
                "Only one segment of {duration:.1}s was created (max {max_duration}s); the transcript may lack punctuation"
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SegmentPlan {
    pub segments: Vec<Segment>,
    pub total_duration: f64,
    pub warnings: Vec<PlanWarning>,
}

/// Break strength of a word ending.
fn break_priority(text: &str, words_so_far: usize) -> u8 {
    if words_so_far < MIN_WORDS_BEFORE_BREAK {
        return 0;
    }
    match text.chars().last() {
        Some('.' | '?' | '!') => 3,
        Some(',' | ';') => 2,
        _ => 0,
    }
}

/// Compute the interior split points for a transcript.
///
/// The returned points exclude `0` and `total_duration`. Fails with
/// [`DubsplitError::InvalidMaxDuration`] if `max_duration` is not a positive
/// finite number or would cut the transcript into more than
/// [`MAX_SEGMENTS`] pieces.
pub fn split_points(words: &[WordTiming], max_duration: f64) -> Result<Vec<f64>> {
    let total_duration = total_duration(words);
    if !max_duration.is_finite()
        || max_duration <= 0.0
        || total_duration / max_duration > MAX_SEGMENTS as f64
    {
        return Err(DubsplitError::InvalidMaxDuration(max_duration));
    }

    let mut points = Vec::new();
    let mut current_start = 0.0;

    while current_start < total_duration {
        let target = current_start + max_duration;
        let mut words_so_far = 0;
        let mut best_split: Option<f64> = None;
        let mut best_priority = 0;

        for word in words {
            if word.end <= current_start || word.end > target {
                continue;
            }

            words_so_far += word.text.split_whitespace().count();
            let priority = break_priority(&word.text, words_so_far);

            // Ties go to the later candidate
            if priority > 0 && priority >= best_priority {
                best_split = Some(word.end);
                best_priority = priority;
            }
        }

        match best_split {
            Some(split) if split > current_start => {
                points.push(split);
                current_start = split;
            }
            _ => {
                let next = current_start + max_duration;
                if next <= current_start {
                    // Window below float resolution at this offset
                    return Err(DubsplitError::InvalidMaxDuration(max_duration));
                }
                current_start = next;
                if current_start < total_duration {
                    points.push(current_start);
                }
            }
        }
    }

    Ok(points)
}

fn total_duration(words: &[WordTiming]) -> f64 {
    words.iter().map(|w| w.end).fold(0.0, f64::max)
}

/// Flag a lone segment that far exceeds the window.
pub fn single_oversized(segments: &[Segment], max_duration: f64) -> Option<PlanWarning> {
    let [only] = segments else {
        return None;
    };
    if only.duration() <= max_duration * OVERSIZED_FACTOR {
        return None;
    }
    warn!(
        "Only 1 segment created with duration {:.2}s (max {}s); transcript may lack punctuation",
        only.duration(),
        max_duration
    );
    Some(PlanWarning::SingleOversizedSegment {
        duration: only.duration(),
        max_duration,
    })
}

/// Segment a transcript into time-bounded pieces.
pub fn segment(words: &[WordTiming], max_duration: f64) -> Result<SegmentPlan> {
    if words.is_empty() {
        return Err(DubsplitError::EmptyTranscript);
    }

    let total_duration = total_duration(words);
    let interior = split_points(words, max_duration)?;
    debug!("Split points: {:?}", interior);

    let mut boundaries = Vec::with_capacity(interior.len() + 2);
    boundaries.push(0.0);
    boundaries.extend(interior);
    boundaries.push(total_duration);

    let segments: Vec<Segment> = boundaries
        .windows(2)
        .filter_map(|pair| {
            let (start, end) = (pair[0], pair[1]);
            let words: Vec<String> = words
                .iter()
                .filter(|w| w.end > start && w.start < end)
                .map(|w| w.text.clone())
                .collect();
            (!words.is_empty()).then_some(Segment { words, start, end })
        })
        .collect();

    let warnings: Vec<PlanWarning> = single_oversized(&segments, max_duration)
        .into_iter()
        .collect();

    debug!(
        "Segmented {:.2}s of transcript into {} segments",
        total_duration,
        segments.len()
    );

    Ok(SegmentPlan {
        segments,
        total_duration,
        warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn w(start: f64, end: f64, text: &str) -> WordTiming {
        WordTiming::new(start, end, text)
    }

    #[test]
    fn test_sentence_break_inside_window() {
        let words = vec![
            w(0.0, 1.0, "Hello"),
            w(1.0, 2.5, "world."),
            w(2.5, 4.0, "Next"),
            w(4.0, 5.0, "sentence."),
        ];
        // "Hello world." only has 2 words, so the first window has no break
        // and falls back to a forced split at 3.0.
        let plan = segment(&words, 3.0).unwrap();
        assert_eq!(split_points(&words, 3.0).unwrap(), vec![3.0]);
        assert_eq!(plan.segments.len(), 2);
        assert_eq!(plan.segments[1].end, 5.0);
    }

    #[test]
    fn test_sentence_break_with_multiword_phrases() {
        let words = vec![
            w(0.0, 1.0, "Hello there"),
            w(1.0, 2.5, "world."),
            w(2.5, 4.0, "Next"),
            w(4.0, 5.0, "sentence."),
        ];
        let plan = segment(&words, 3.0).unwrap();
        assert_eq!(plan.segments.len(), 2);
        assert_eq!((plan.segments[0].start, plan.segments[0].end), (0.0, 2.5));
        assert_eq!((plan.segments[1].start, plan.segments[1].end), (2.5, 5.0));
        assert_eq!(plan.segments[0].words, vec!["Hello there", "world."]);
    }

    #[test]
    fn test_sentence_end_beats_later_comma() {
        let words = vec![
            w(0.0, 1.0, "one two three."),
            w(1.0, 2.0, "four five,"),
            w(2.0, 6.0, "six"),
        ];
        assert_eq!(split_points(&words, 3.0).unwrap()[0], 1.0);
    }

    #[test]
    fn test_equal_priority_prefers_later() {
        let words = vec![
            w(0.0, 1.0, "one two three,"),
            w(1.0, 2.0, "four,"),
            w(2.0, 6.0, "five"),
        ];
        assert_eq!(split_points(&words, 3.0).unwrap()[0], 2.0);
    }

    #[test]
    fn test_forced_split_without_punctuation() {
        let words: Vec<WordTiming> = (0..10)
            .map(|i| w(i as f64, i as f64 + 1.0, "word"))
            .collect();
        assert_eq!(split_points(&words, 4.0).unwrap(), vec![4.0, 8.0]);
        let plan = segment(&words, 4.0).unwrap();
        assert_eq!(plan.segments.len(), 3);
        assert_eq!(plan.segments[2].end, 10.0);
    }

    #[test]
    fn test_forced_split_at_total_is_not_emitted() {
        let words: Vec<WordTiming> = (0..8).map(|i| w(i as f64, i as f64 + 1.0, "x")).collect();
        assert_eq!(split_points(&words, 4.0).unwrap(), vec![4.0]);
    }

    #[test]
    fn test_break_on_final_word_leaves_no_empty_tail() {
        let words = vec![w(0.0, 1.0, "a b"), w(1.0, 2.0, "c d.")];
        assert_eq!(split_points(&words, 5.0).unwrap(), vec![2.0]);
        let plan = segment(&words, 5.0).unwrap();
        assert_eq!(plan.segments.len(), 1);
        assert_eq!(plan.segments[0].end, 2.0);
    }

    #[test]
    fn test_word_spanning_boundary_appears_in_both() {
        let words = vec![w(0.0, 2.0, "aa"), w(2.0, 5.0, "bb"), w(5.0, 6.0, "cc")];
        let plan = segment(&words, 4.0).unwrap();
        assert_eq!(plan.segments[0].words, vec!["aa", "bb"]);
        assert_eq!(plan.segments[1].words, vec!["bb", "cc"]);
    }

    #[test]
    fn test_long_word_is_cut_by_forced_splits() {
        let words = vec![w(0.0, 10.0, "long uninterrupted speech")];
        let plan = segment(&words, 5.0).unwrap();
        assert_eq!(plan.segments.len(), 2);
        assert!(plan.warnings.is_empty());
    }

    #[test]
    fn test_single_oversized_segment_is_flagged() {
        let lone = vec![Segment {
            words: vec!["all".into()],
            start: 0.0,
            end: 20.0,
        }];
        assert_eq!(
            single_oversized(&lone, 12.0),
            Some(PlanWarning::SingleOversizedSegment {
                duration: 20.0,
                max_duration: 12.0
            })
        );
        assert_eq!(single_oversized(&lone, 15.0), None);
        assert_eq!(single_oversized(&[], 1.0), None);
    }

    #[test]
    fn test_empty_transcript() {
        assert!(matches!(segment(&[], 10.0), Err(DubsplitError::EmptyTranscript)));
    }

    #[test]
    fn test_invalid_max_duration() {
        let words = vec![w(0.0, 1.0, "a")];
        assert!(matches!(
            segment(&words, 0.0),
            Err(DubsplitError::InvalidMaxDuration(_))
        ));
        assert!(segment(&words, f64::NAN).is_err());
    }

    #[test]
    fn test_tiny_window_is_rejected() {
        let words = vec![w(0.0, 100.0, "word")];
        assert!(matches!(
            split_points(&words, 1e-14),
            Err(DubsplitError::InvalidMaxDuration(_))
        ));
        assert!(segment(&words, 0.001).is_err());
        assert!(split_points(&words, 0.05).is_ok());
    }
}
