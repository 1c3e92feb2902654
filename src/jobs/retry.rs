//! # Retry
//!
//! Re-arms a `pending` or `failed` job through the normal dispatch path.
//! The job keeps its id and input but runs with the currently configured
//! model, so a retry is not guaranteed to reproduce the prior run exactly.

use std::fmt;
use std::path::Path;
use tracing::info;

use crate::jobs::dispatcher::Dispatcher;
use crate::jobs::types::{Job, JobDescriptor, JobStatus};
use crate::store::{JobStore, JobUpdate};

/// Why a retry request was refused.
#[derive(Debug)]
pub enum RetryError {
    /// No job with the given id exists
    NotFound(String),

    /// The job is in a state that cannot be retried
    InvalidTransition(JobStatus),

    /// The store could not be read or written
    Store(String),
}

impl fmt::Display for RetryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryError::NotFound(id) => write!(f, "Job {} not found", id),
            RetryError::InvalidTransition(status) => write!(
                f,
                "Only pending or failed jobs can be retried (job is {})",
                status
            ),
            RetryError::Store(msg) => write!(f, "Store error: {}", msg),
        }
    }
}

/// Reset a job to `pending` and resubmit it.
///
/// Allowed only from `pending` or `failed`; any other state is an invalid
/// transition. On success the job's progress is 0, its error is cleared,
/// and a fresh descriptor is queued with the given model.
pub fn retry_job(
    store: &JobStore,
    dispatcher: &Dispatcher,
    upload_dir: &Path,
    model: &str,
    job_id: &str,
) -> Result<Job, RetryError> {
    let job = store
        .get(job_id)
        .map_err(|e| RetryError::Store(e.to_string()))?
        .ok_or_else(|| RetryError::NotFound(job_id.to_string()))?;

    if !job.status.can_retry() {
        return Err(RetryError::InvalidTransition(job.status));
    }

    store
        .update(job_id, &JobUpdate::reset_pending(model.to_string()))
        .map_err(|e| RetryError::Store(e.to_string()))?;

    // Snapshot the reset state before the descriptor is queued; once it is
    // submitted an executor may already be rewriting the row.
    let reset = store
        .get(job_id)
        .map_err(|e| RetryError::Store(e.to_string()))?
        .ok_or_else(|| RetryError::NotFound(job_id.to_string()))?;

    dispatcher.submit(JobDescriptor {
        job_id: job_id.to_string(),
        input_path: upload_dir.join(&job.filename),
        model: model.to_string(),
    });

    info!(job_id = %job_id, model = %model, "Job resubmitted");

    Ok(reset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::test_support::{wait_for_status, NullDiarizer, ScriptedTranscriber};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::tempdir;

    fn dispatcher_with_store() -> (Arc<JobStore>, Arc<Dispatcher>) {
        let store = Arc::new(JobStore::open_in_memory().unwrap());
        let dispatcher = Dispatcher::spawn(
            Arc::clone(&store),
            Arc::new(ScriptedTranscriber::with_segments(
                "retried",
                &[(0.0, 1.0, "retried")],
            )),
            Arc::new(NullDiarizer),
            2,
        );
        (store, dispatcher)
    }

    #[tokio::test]
    async fn test_retry_of_failed_job_resets_and_completes() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.wav"), b"fake").unwrap();
        let (store, dispatcher) = dispatcher_with_store();

        let job = store.create("a.wav", "base").unwrap();
        store
            .update(&job.id, &JobUpdate::failed("first attempt broke".to_string()))
            .unwrap();

        let retried = retry_job(&store, &dispatcher, dir.path(), "small", &job.id).unwrap();
        assert_eq!(retried.status, JobStatus::Pending);
        assert_eq!(retried.progress, 0);
        assert!(retried.error_message.is_none());

        let done =
            wait_for_status(&store, &job.id, JobStatus::Completed, Duration::from_secs(5)).await;
        assert_eq!(done.model, "small");
        assert_eq!(done.transcript.as_deref(), Some("retried"));
    }

    #[tokio::test]
    async fn test_retry_rejected_for_processing_and_completed() {
        let dir = tempdir().unwrap();
        let (store, dispatcher) = dispatcher_with_store();

        let running = store.create("a.wav", "base").unwrap();
        store.update(&running.id, &JobUpdate::processing()).unwrap();
        let err = retry_job(&store, &dispatcher, dir.path(), "base", &running.id).unwrap_err();
        assert!(matches!(
            err,
            RetryError::InvalidTransition(JobStatus::Processing)
        ));

        let done = store.create("b.wav", "base").unwrap();
        store
            .update(&done.id, &JobUpdate::completed("x".to_string(), Vec::new()))
            .unwrap();
        let err = retry_job(&store, &dispatcher, dir.path(), "base", &done.id).unwrap_err();
        assert!(matches!(
            err,
            RetryError::InvalidTransition(JobStatus::Completed)
        ));
    }

    #[tokio::test]
    async fn test_retry_unknown_job_is_not_found() {
        let dir = tempdir().unwrap();
        let (store, dispatcher) = dispatcher_with_store();

        let err = retry_job(&store, &dispatcher, dir.path(), "base", "nope").unwrap_err();
        assert!(matches!(err, RetryError::NotFound(_)));
    }
}
