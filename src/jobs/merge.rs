//! # Segment Merger
//!
//! Pure fusion of the two engine outputs: time-stamped text segments from
//! the transcriber and speaker turns from the diarizer become one ordered,
//! speaker-labeled segment list.
//!
//! ## Algorithm:
//! For each text segment, pick the speaker turn with the largest temporal
//! overlap. Only a strictly greater overlap replaces the running best, so
//! the first-encountered turn wins all ties. A segment that overlaps no
//! turn at all keeps the `Unknown` label.
//!
//! Text segment order and boundaries pass through unchanged; the merger
//! never creates, splits or drops segments. Complexity is
//! O(|text| x |turns|), which is fine for the tens-to-hundreds of segments
//! a single recording produces.

use crate::engines::{SpeakerTurn, TextSegment};
use crate::jobs::types::{Segment, UNKNOWN_SPEAKER};

/// Fuse transcriber segments with diarizer turns.
///
/// An empty `turns` slice (diarization failed or found nothing) labels
/// every segment [`UNKNOWN_SPEAKER`].
pub fn merge_segments(text_segments: &[TextSegment], turns: &[SpeakerTurn]) -> Vec<Segment> {
    text_segments
        .iter()
        .map(|segment| Segment {
            start: segment.start,
            end: segment.end,
            text: segment.text.clone(),
            speaker: dominant_speaker(segment, turns),
        })
        .collect()
}

/// Find the speaker whose turn overlaps this segment the most.
fn dominant_speaker(segment: &TextSegment, turns: &[SpeakerTurn]) -> String {
    let mut best_speaker: Option<&str> = None;
    let mut best_overlap = 0.0_f64;

    for turn in turns {
        let overlap = (segment.end.min(turn.end) - segment.start.max(turn.start)).max(0.0);
        if overlap > best_overlap {
            best_overlap = overlap;
            best_speaker = Some(&turn.speaker);
        }
    }

    best_speaker.unwrap_or(UNKNOWN_SPEAKER).to_string()
}
