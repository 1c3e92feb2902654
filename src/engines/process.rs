//! # Subprocess Engine Adapters
//!
//! Production implementations of the engine traits that invoke external
//! commands and read JSON from stdout. Which binaries to run comes from
//! the `[engines]` section of the configuration, so the actual model
//! runtimes (whisper, pyannote, anything with the same output shape) stay
//! swappable without touching this service.
//!
//! ## Wire contracts:
//! - Transcriber: `<command> <input> --model <model>` printing
//!   `{"text": "...", "segments": [{"start", "end", "text"}]}`
//! - Diarizer: `<command> <input>` printing
//!   `[{"start", "end", "speaker"}]`

use super::{Diarizer, EngineError, SpeakerTurn, Transcriber, TranscriptOutput};
use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;
use tracing::debug;

/// Primary engine adapter: runs a configured transcription command.
pub struct CommandTranscriber {
    program: String,
}

impl CommandTranscriber {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl Transcriber for CommandTranscriber {
    async fn run(&self, input: &Path, model: &str) -> Result<TranscriptOutput, EngineError> {
        debug!(program = %self.program, input = %input.display(), model = %model, "Launching transcriber");

        let output = Command::new(&self.program)
            .arg(input)
            .arg("--model")
            .arg(model)
            .output()
            .await
            .map_err(|e| EngineError::Launch(format!("{}: {}", self.program, e)))?;

        if !output.status.success() {
            return Err(EngineError::Failed(describe_failure(
                &self.program,
                output.status.code(),
                &output.stderr,
            )));
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|e| EngineError::InvalidOutput(format!("{}: {}", self.program, e)))
    }
}

/// Secondary engine adapter: runs a configured diarization command.
pub struct CommandDiarizer {
    program: String,
}

impl CommandDiarizer {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl Diarizer for CommandDiarizer {
    async fn run(&self, input: &Path) -> Result<Vec<SpeakerTurn>, EngineError> {
        debug!(program = %self.program, input = %input.display(), "Launching diarizer");

        let output = Command::new(&self.program)
            .arg(input)
            .output()
            .await
            .map_err(|e| EngineError::Launch(format!("{}: {}", self.program, e)))?;

        if !output.status.success() {
            return Err(EngineError::Failed(describe_failure(
                &self.program,
                output.status.code(),
                &output.stderr,
            )));
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|e| EngineError::InvalidOutput(format!("{}: {}", self.program, e)))
    }
}

/// Build a one-line failure description from an engine's exit status and
/// stderr. Stderr is truncated so a chatty engine cannot flood the
/// persisted error_message.
fn describe_failure(program: &str, code: Option<i32>, stderr: &[u8]) -> String {
    let stderr = String::from_utf8_lossy(stderr);
    let stderr = stderr.trim();
    let detail: String = stderr.chars().take(500).collect();

    match code {
        Some(code) if detail.is_empty() => format!("{} exited with status {}", program, code),
        Some(code) => format!("{} exited with status {}: {}", program, code, detail),
        None if detail.is_empty() => format!("{} was terminated by a signal", program),
        None => format!("{} was terminated by a signal: {}", program, detail),
    }
}
