//! # Transcript Export
//!
//! Pure rendering of a completed job's segments into the flat
//! human-readable form served by the download endpoint:
//!
//! ```text
//! [00:00 - 00:12] SPEAKER_00: welcome everyone
//! [00:12 - 00:15] SPEAKER_01: thanks for having me
//! ```
//!
//! Jobs completed without usable segments fall back to the raw transcript.

use crate::jobs::types::{Job, Segment, UNKNOWN_SPEAKER};

/// Render one job as downloadable plain text.
pub fn render_transcript(job: &Job) -> String {
    match job.segments.as_deref() {
        Some(segments) if !segments.is_empty() => render_segments(segments),
        _ => job.transcript.clone().unwrap_or_default(),
    }
}

/// Render a segment list, one labeled line per segment.
pub fn render_segments(segments: &[Segment]) -> String {
    let mut out = String::new();
    for segment in segments {
        let speaker = if segment.speaker.is_empty() {
            UNKNOWN_SPEAKER
        } else {
            &segment.speaker
        };
        out.push_str(&format!(
            "[{} - {}] {}: {}\n",
            format_timestamp(segment.start),
            format_timestamp(segment.end),
            speaker,
            segment.text.trim()
        ));
    }
    out
}

/// Seconds to `MM:SS`. Minutes keep growing past an hour (90 minutes
/// renders as `90:00`), matching the simple reader-view format.
fn format_timestamp(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    format!("{:02}:{:02}", total / 60, total % 60)
}

/// Name for the downloaded file: the audio filename with a `.txt` suffix.
pub fn download_name(filename: &str) -> String {
    match filename.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => format!("{}.txt", stem),
        _ => format!("{}.txt", filename),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::types::JobStatus;
    use chrono::Utc;

    fn segment(start: f64, end: f64, speaker: &str, text: &str) -> Segment {
        Segment {
            start,
            end,
            text: text.to_string(),
            speaker: speaker.to_string(),
        }
    }

    fn completed_job(segments: Option<Vec<Segment>>, transcript: Option<&str>) -> Job {
        Job {
            id: "j1".to_string(),
            filename: "meeting.wav".to_string(),
            model: "base".to_string(),
            status: JobStatus::Completed,
            progress: 100,
            error_message: None,
            transcript: transcript.map(str::to_string),
            segments,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_segments_render_with_timestamps_and_speakers() {
        let job = completed_job(
            Some(vec![
                segment(0.0, 12.4, "SPEAKER_00", " welcome everyone "),
                segment(12.4, 75.0, "SPEAKER_01", "thanks"),
            ]),
            Some("welcome everyone thanks"),
        );

        let rendered = render_transcript(&job);
        assert_eq!(
            rendered,
            "[00:00 - 00:12] SPEAKER_00: welcome everyone\n[00:12 - 01:15] SPEAKER_01: thanks\n"
        );
    }

    #[test]
    fn test_falls_back_to_raw_transcript_without_segments() {
        let job = completed_job(None, Some("just the text"));
        assert_eq!(render_transcript(&job), "just the text");

        let job = completed_job(Some(Vec::new()), Some("still the text"));
        assert_eq!(render_transcript(&job), "still the text");
    }

    #[test]
    fn test_minutes_keep_growing_past_an_hour() {
        assert_eq!(format_timestamp(5400.0), "90:00");
        assert_eq!(format_timestamp(-3.0), "00:00");
    }

    #[test]
    fn test_download_name_swaps_extension() {
        assert_eq!(download_name("meeting.wav"), "meeting.txt");
        assert_eq!(download_name("no_extension"), "no_extension.txt");
        assert_eq!(download_name(".hidden"), ".hidden.txt");
    }
}
