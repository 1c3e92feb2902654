//! # Recovery Scanner
//!
//! Reconciliation pass over the job table, run once at startup before the
//! HTTP server accepts submissions. Jobs left in `pending` or `processing`
//! by a previous process ("ghost jobs") are either re-armed through the
//! normal dispatch path or failed when their input file no longer exists.
//!
//! The scanner performs no write-ahead logging of its own; it trusts that
//! the store's writes were durable before the crash and simply reconciles
//! what it finds.

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::jobs::dispatcher::Dispatcher;
use crate::jobs::types::{JobDescriptor, JobStatus};
use crate::store::{JobStore, JobUpdate};

/// What one recovery pass did.
#[derive(Debug, Default)]
pub struct RecoveryReport {
    /// Ghost jobs reset to pending and resubmitted
    pub requeued: usize,

    /// Ghost jobs whose input file is gone, marked failed
    pub failed: usize,
}

/// Scan for ghost jobs and re-arm or fail each one.
///
/// Runs synchronously: when this returns, every ghost job has either been
/// handed to the dispatcher or marked failed. Jobs are resubmitted with
/// the *currently* configured model, not necessarily the one they were
/// originally submitted with.
pub fn recover_ghost_jobs(
    store: &Arc<JobStore>,
    dispatcher: &Dispatcher,
    upload_dir: &Path,
    model: &str,
) -> Result<RecoveryReport> {
    let ghosts = store.list_by_status(&[JobStatus::Pending, JobStatus::Processing])?;
    if ghosts.is_empty() {
        info!("No ghost jobs to recover");
        return Ok(RecoveryReport::default());
    }

    info!(count = ghosts.len(), "Recovering ghost jobs");
    let mut report = RecoveryReport::default();

    for job in ghosts {
        let input_path = upload_dir.join(&job.filename);

        if input_path.exists() {
            if let Err(err) = store.update(&job.id, &JobUpdate::reset_pending(model.to_string())) {
                warn!(job_id = %job.id, error = %err, "Could not reset ghost job; skipping");
                continue;
            }
            dispatcher.submit(JobDescriptor {
                job_id: job.id.clone(),
                input_path,
                model: model.to_string(),
            });
            report.requeued += 1;
        } else {
            let message = format!(
                "Input file missing after restart: {}",
                input_path.display()
            );
            warn!(job_id = %job.id, file = %input_path.display(), "Ghost job input missing");
            if let Err(err) = store.update(&job.id, &JobUpdate::failed(message)) {
                warn!(job_id = %job.id, error = %err, "Could not fail ghost job; skipping");
                continue;
            }
            report.failed += 1;
        }
    }

    info!(
        requeued = report.requeued,
        failed = report.failed,
        "Ghost job recovery finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::test_support::{wait_for_status, NullDiarizer, ScriptedTranscriber};
    use crate::store::JobUpdate;
    use std::time::Duration;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_ghost_with_input_present_is_requeued_and_completes() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("ghost.wav"), b"fake audio").unwrap();

        let store = Arc::new(JobStore::open_in_memory().unwrap());
        let job = store.create("ghost.wav", "base").unwrap();
        // Simulate a crash mid-flight.
        store.update(&job.id, &JobUpdate::processing()).unwrap();

        let dispatcher = Dispatcher::spawn(
            Arc::clone(&store),
            Arc::new(ScriptedTranscriber::with_segments(
                "recovered",
                &[(0.0, 1.0, "recovered")],
            )),
            Arc::new(NullDiarizer),
            2,
        );

        let report = recover_ghost_jobs(&store, &dispatcher, dir.path(), "small").unwrap();
        assert_eq!(report.requeued, 1);
        assert_eq!(report.failed, 0);

        let recovered =
            wait_for_status(&store, &job.id, JobStatus::Completed, Duration::from_secs(5)).await;
        assert_eq!(recovered.transcript.as_deref(), Some("recovered"));
        // Re-armed with the currently configured model.
        assert_eq!(recovered.model, "small");
    }

    #[tokio::test]
    async fn test_ghost_with_missing_input_is_failed_not_requeued() {
        let dir = tempdir().unwrap();

        let store = Arc::new(JobStore::open_in_memory().unwrap());
        let job = store.create("vanished.wav", "base").unwrap();

        let dispatcher = Dispatcher::spawn(
            Arc::clone(&store),
            Arc::new(ScriptedTranscriber::with_segments("x", &[(0.0, 1.0, "x")])),
            Arc::new(NullDiarizer),
            2,
        );

        let report = recover_ghost_jobs(&store, &dispatcher, dir.path(), "base").unwrap();
        assert_eq!(report.requeued, 0);
        assert_eq!(report.failed, 1);

        let failed = store.get(&job.id).unwrap().unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.progress, 0);
        assert!(failed
            .error_message
            .unwrap()
            .contains("Input file missing"));
        assert_eq!(dispatcher.queue_info().queued_jobs, 0);
    }

    #[tokio::test]
    async fn test_terminal_jobs_are_left_alone() {
        let dir = tempdir().unwrap();
        let store = Arc::new(JobStore::open_in_memory().unwrap());

        let done = store.create("done.wav", "base").unwrap();
        store
            .update(&done.id, &JobUpdate::completed("text".to_string(), Vec::new()))
            .unwrap();
        let failed = store.create("failed.wav", "base").unwrap();
        store
            .update(&failed.id, &JobUpdate::failed("boom".to_string()))
            .unwrap();

        let dispatcher = Dispatcher::spawn(
            Arc::clone(&store),
            Arc::new(ScriptedTranscriber::with_segments("x", &[(0.0, 1.0, "x")])),
            Arc::new(NullDiarizer),
            2,
        );

        let report = recover_ghost_jobs(&store, &dispatcher, dir.path(), "base").unwrap();
        assert_eq!(report.requeued, 0);
        assert_eq!(report.failed, 0);

        assert_eq!(
            store.get(&done.id).unwrap().unwrap().status,
            JobStatus::Completed
        );
        assert_eq!(
            store.get(&failed.id).unwrap().unwrap().status,
            JobStatus::Failed
        );
    }
}
