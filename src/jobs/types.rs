//! # Job Domain Types
//!
//! Core data types for the background transcription pipeline: the durable
//! `Job` record, its lifecycle `JobStatus`, the transient `JobDescriptor`
//! that travels through the dispatch queue, and the speaker-labeled
//! `Segment` that makes up a finished transcript.
//!
//! ## Ownership Model:
//! The store exclusively owns committed `Job` state. The dispatcher and
//! executor only ever hold a `JobDescriptor` (id, input path, model) while
//! a job is queued or running, never a second copy of persisted fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Speaker label used when diarization produced nothing usable for a segment.
pub const UNKNOWN_SPEAKER: &str = "Unknown";

/// Version of the persisted segment envelope. Bump when `Segment` grows
/// fields that old rows will not have.
pub const SEGMENT_SCHEMA_VERSION: u32 = 1;

/// Lifecycle state of a transcription job.
///
/// ## Transitions:
/// - `Pending` -> `Processing` (dispatched to a worker)
/// - `Processing` -> `Completed` (both engines done, result persisted)
/// - `Processing` -> `Failed` (primary engine or persistence failure)
/// - `Failed` | `Pending` -> `Pending` (retry or crash recovery)
/// - `Pending` -> `Failed` (recovery found the input file missing)
///
/// `Completed` is terminal. `Failed` is re-enterable via retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    /// String form stored in the database and returned by the API.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Parse the stored string form back into a status.
    pub fn parse(value: &str) -> Option<JobStatus> {
        match value {
            "pending" => Some(JobStatus::Pending),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    /// Whether a retry is allowed from this state.
    ///
    /// Only jobs that never started cleanly (`Pending`) or already failed
    /// may be re-armed. Retrying a running or completed job is an invalid
    /// transition.
    pub fn can_retry(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One speaker-labeled time interval of a finished transcript.
///
/// Invariants: `start <= end`, both non-negative seconds. Segments of a
/// job are stored in non-decreasing `start` order, matching the primary
/// engine's emission order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    /// Start of the interval in seconds from the beginning of the audio
    pub start: f64,

    /// End of the interval in seconds
    pub end: f64,

    /// Transcribed text for the interval (may be empty)
    pub text: String,

    /// Speaker label, or [`UNKNOWN_SPEAKER`] when attribution failed
    pub speaker: String,
}

/// Versioned envelope wrapped around the segment list before it is
/// persisted as JSON. Keeping an explicit version lets future fields be
/// added without breaking rows written by older builds.
#[derive(Debug, Serialize, Deserialize)]
struct SegmentEnvelope {
    version: u32,
    segments: Vec<Segment>,
}

/// Serialize segments into the versioned JSON envelope stored in the database.
pub fn encode_segments(segments: &[Segment]) -> serde_json::Result<String> {
    serde_json::to_string(&SegmentEnvelope {
        version: SEGMENT_SCHEMA_VERSION,
        segments: segments.to_vec(),
    })
}

/// Deserialize a stored segment column.
///
/// Accepts both the versioned envelope and a bare JSON array, so rows
/// written before the envelope was introduced still load.
pub fn decode_segments(raw: &str) -> serde_json::Result<Vec<Segment>> {
    match serde_json::from_str::<SegmentEnvelope>(raw) {
        Ok(envelope) => Ok(envelope.segments),
        Err(_) => serde_json::from_str::<Vec<Segment>>(raw),
    }
}

/// The durable record of one submitted transcription job.
///
/// Owned by the [`JobStore`](crate::store::JobStore); everything outside
/// the store works with snapshots of this struct.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    /// Opaque unique identifier, assigned by the store at creation
    pub id: String,

    /// Name of the uploaded audio file, relative to the upload directory
    pub filename: String,

    /// Engine model selected when the job was (re)submitted
    pub model: String,

    /// Current lifecycle state
    pub status: JobStatus,

    /// Coarse progress checkpoint: 0, 10 or 100
    pub progress: u8,

    /// Human-readable failure description; present only when `Failed`
    pub error_message: Option<String>,

    /// Plain-text transcript; present only when `Completed`
    pub transcript: Option<String>,

    /// Ordered, speaker-labeled segments; present only when `Completed`
    pub segments: Option<Vec<Segment>>,

    /// Set once at creation, never mutated
    pub created_at: DateTime<Utc>,
}

/// The transient, in-memory handle the dispatcher queues and hands to an
/// executor. Deliberately minimal: everything else lives in the store.
#[derive(Debug, Clone)]
pub struct JobDescriptor {
    /// Id of the persisted job row this descriptor drives
    pub job_id: String,

    /// Absolute path to the audio payload
    pub input_path: PathBuf,

    /// Model the primary engine should use for this run
    pub model: String,
}
