//! # Task Executor
//!
//! Runs one job end-to-end: marks it processing, invokes both engines
//! concurrently, merges their outputs, and persists the outcome. Every
//! failure is converted into a `failed` row here; nothing escapes to the
//! dispatch loop or to sibling jobs.
//!
//! ## Failure partitioning:
//! - Primary engine failure (or an empty transcript) is fatal to the job.
//! - Secondary engine failure is logged and ignored; the transcript is
//!   kept and every segment gets the `Unknown` speaker label.
//! - A persistence failure forces the job to `failed` where a write is
//!   still possible; if even that write fails, the error is logged and
//!   the recovery scan will re-arm the job on the next start.

use std::fmt;
use std::sync::Arc;
use tokio::join;
use tracing::{error, info, warn};

use crate::engines::{Diarizer, Transcriber};
use crate::jobs::merge::merge_segments;
use crate::jobs::types::JobDescriptor;
use crate::store::{JobStore, JobUpdate};

/// Everything an executor invocation needs, bundled so the dispatch loop
/// can hand out clones cheaply.
#[derive(Clone)]
pub struct ExecutorContext {
    pub store: Arc<JobStore>,
    pub transcriber: Arc<dyn Transcriber>,
    pub diarizer: Arc<dyn Diarizer>,
}

/// Why a job run ended in `failed`.
///
/// Returned as a value from [`execute`] instead of propagated as a panic,
/// so the outcome crosses the fork-join boundary explicitly.
#[derive(Debug)]
pub enum JobError {
    /// The primary transcription engine failed; fatal to the job
    PrimaryEngine(String),

    /// A job-state write did not reach the store
    Persistence(String),
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobError::PrimaryEngine(msg) => write!(f, "Transcription failed: {}", msg),
            JobError::Persistence(msg) => write!(f, "Failed to persist job state: {}", msg),
        }
    }
}

/// Run one job to a terminal state. Never panics, never returns an error:
/// every outcome ends up in the store (or, at worst, in the log).
pub async fn run_job(context: &ExecutorContext, descriptor: &JobDescriptor) {
    info!(job_id = %descriptor.job_id, model = %descriptor.model, "Job started");

    match execute(context, descriptor).await {
        Ok(()) => {
            info!(job_id = %descriptor.job_id, "Job completed");
        }
        Err(err) => {
            warn!(job_id = %descriptor.job_id, error = %err, "Job failed");
            let update = JobUpdate::failed(err.to_string());
            if let Err(persist_err) = context.store.update(&descriptor.job_id, &update) {
                // The job row keeps its stale status; the recovery scan
                // reconciles it after the next restart.
                error!(
                    job_id = %descriptor.job_id,
                    error = %persist_err,
                    "Could not record job failure"
                );
            }
        }
    }
}

async fn execute(context: &ExecutorContext, descriptor: &JobDescriptor) -> Result<(), JobError> {
    // Single coarse checkpoint before engine work begins.
    context
        .store
        .update(&descriptor.job_id, &JobUpdate::processing())
        .map_err(|e| JobError::Persistence(e.to_string()))?;

    // Fork-join: both engines run concurrently against the same input.
    let (primary, secondary) = join!(
        context.transcriber.run(&descriptor.input_path, &descriptor.model),
        context.diarizer.run(&descriptor.input_path),
    );

    let transcript = primary.map_err(|e| JobError::PrimaryEngine(e.to_string()))?;
    if transcript.text.trim().is_empty() {
        return Err(JobError::PrimaryEngine(
            "empty transcript; the audio file may be silent or corrupted".to_string(),
        ));
    }

    // Diarization is best-effort: log and carry on without speaker labels.
    let turns = match secondary {
        Ok(turns) => turns,
        Err(err) => {
            warn!(job_id = %descriptor.job_id, error = %err, "Diarization failed; labeling speakers Unknown");
            Vec::new()
        }
    };

    let segments = merge_segments(&transcript.segments, &turns);

    context
        .store
        .update(
            &descriptor.job_id,
            &JobUpdate::completed(transcript.text.trim().to_string(), segments),
        )
        .map_err(|e| JobError::Persistence(e.to_string()))?;

    Ok(())
}
