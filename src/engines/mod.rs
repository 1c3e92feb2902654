//! # Processing Engines
//!
//! Trait seams for the two external audio-processing collaborators:
//!
//! - **Primary** ([`Transcriber`]): audio -> plain text plus time-stamped
//!   text segments. A primary failure is fatal to its job.
//! - **Secondary** ([`Diarizer`]): audio -> time-stamped speaker-turn
//!   intervals, independent of text. A secondary failure is non-fatal;
//!   the job completes with `Unknown` speaker labels.
//!
//! The engines' internals are opaque to this service; only the call
//! contracts below matter. The shipped implementations in
//! [`process`] shell out to external commands; tests substitute their own.

pub mod process;

use async_trait::async_trait;
use serde::Deserialize;
use std::fmt;
use std::path::Path;

pub use process::{CommandDiarizer, CommandTranscriber};

/// One time-stamped text interval emitted by the primary engine.
#[derive(Debug, Clone, Deserialize)]
pub struct TextSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// One speaker turn emitted by the secondary engine.
#[derive(Debug, Clone, Deserialize)]
pub struct SpeakerTurn {
    pub start: f64,
    pub end: f64,
    pub speaker: String,
}

/// Full output of a primary engine run.
#[derive(Debug, Clone, Deserialize)]
pub struct TranscriptOutput {
    /// The complete transcript as plain text
    pub text: String,

    /// Time-stamped segments in emission order (non-decreasing `start`)
    pub segments: Vec<TextSegment>,
}

/// Failure modes of an engine invocation.
///
/// Carried back across the executor's fork-join point as a value rather
/// than a panic, so one bad engine run can never take down the dispatch
/// loop or a sibling job.
#[derive(Debug, Clone)]
pub enum EngineError {
    /// The engine process could not be started at all
    Launch(String),

    /// The engine ran but reported failure (non-zero exit)
    Failed(String),

    /// The engine exited cleanly but its output could not be parsed
    InvalidOutput(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Launch(msg) => write!(f, "engine failed to start: {}", msg),
            EngineError::Failed(msg) => write!(f, "engine reported failure: {}", msg),
            EngineError::InvalidOutput(msg) => write!(f, "engine produced invalid output: {}", msg),
        }
    }
}

impl std::error::Error for EngineError {}

/// The primary engine: speech-to-text with per-segment timestamps.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn run(&self, input: &Path, model: &str) -> Result<TranscriptOutput, EngineError>;
}

/// The secondary engine: speaker diarization.
#[async_trait]
pub trait Diarizer: Send + Sync {
    async fn run(&self, input: &Path) -> Result<Vec<SpeakerTurn>, EngineError>;
}
