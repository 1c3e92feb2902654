//! # Dispatcher / Worker Pool
//!
//! One long-lived dispatch loop feeding a bounded pool of job executors.
//!
//! ## Design:
//! - `submit()` pushes a descriptor onto an unbounded FIFO channel and
//!   returns immediately. No deduplication is performed; submitting the
//!   same job id twice runs it twice.
//! - The loop takes descriptors off the channel in order and blocks on a
//!   counting semaphore until a worker slot frees up, then spawns an
//!   executor task that owns the permit for the job's whole lifetime.
//!   Because the loop waits for a slot *before* pulling the next
//!   descriptor, jobs start in strict submission order; a stalled head
//!   delays later jobs but never reorders them.
//! - The semaphore guarantees at most `max_workers` jobs execute at any
//!   instant, process-wide. The permit is released when the executor task
//!   drops it, on every exit path.
//!
//! The dispatcher is an explicit service object with caller-managed
//! lifecycle: `main` builds one and injects it wherever submission, retry
//! or recovery needs it. The queue and slot counter are process-local;
//! this design does not coordinate across replicas.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tracing::{error, info, warn};

use crate::engines::{Diarizer, Transcriber};
use crate::jobs::executor::{self, ExecutorContext};
use crate::jobs::types::JobDescriptor;
use crate::store::JobStore;

/// Snapshot of queue pressure for health reporting.
#[derive(Debug, Clone, serde::Serialize)]
pub struct QueueInfo {
    pub active_workers: usize,
    pub queued_jobs: usize,
    pub max_workers: usize,
}

/// Handle to the dispatch loop. Cheap to clone via `Arc`.
pub struct Dispatcher {
    tx: mpsc::UnboundedSender<JobDescriptor>,
    slots: Arc<Semaphore>,
    queued: Arc<AtomicUsize>,
    max_workers: usize,
}

impl Dispatcher {
    /// Build the worker pool and start its dispatch loop.
    ///
    /// ## Parameters:
    /// - **store**: durable job state, shared with every executor
    /// - **transcriber** / **diarizer**: the two engine collaborators
    /// - **max_workers**: global concurrency ceiling (slots)
    pub fn spawn(
        store: Arc<JobStore>,
        transcriber: Arc<dyn Transcriber>,
        diarizer: Arc<dyn Diarizer>,
        max_workers: usize,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let slots = Arc::new(Semaphore::new(max_workers));
        let queued = Arc::new(AtomicUsize::new(0));

        let context = ExecutorContext {
            store,
            transcriber,
            diarizer,
        };

        tokio::spawn(dispatch_loop(
            rx,
            context,
            Arc::clone(&slots),
            Arc::clone(&queued),
        ));

        info!(max_workers, "Dispatcher started");

        Arc::new(Self {
            tx,
            slots,
            queued,
            max_workers,
        })
    }

    /// Enqueue a job descriptor. Returns immediately; the job runs when a
    /// worker slot frees up.
    pub fn submit(&self, descriptor: JobDescriptor) {
        self.queued.fetch_add(1, Ordering::SeqCst);
        info!(job_id = %descriptor.job_id, "Job enqueued");

        // Send only fails when the dispatch loop is gone, which means the
        // process is shutting down. The row stays pending and the recovery
        // scan re-arms it on the next start.
        if self.tx.send(descriptor).is_err() {
            self.queued.fetch_sub(1, Ordering::SeqCst);
            error!("Dispatch loop is not running; job left pending for recovery");
        }
    }

    /// Number of jobs currently executing.
    pub fn active_workers(&self) -> usize {
        self.max_workers - self.slots.available_permits()
    }

    /// Queue pressure snapshot for the health endpoints.
    pub fn queue_info(&self) -> QueueInfo {
        QueueInfo {
            active_workers: self.active_workers(),
            queued_jobs: self.queued.load(Ordering::SeqCst),
            max_workers: self.max_workers,
        }
    }
}

/// The single long-lived dispatch loop.
///
/// Ends only when every `Dispatcher` handle has been dropped. A failure
/// while handling one descriptor is logged and the loop moves on; it never
/// terminates over a single bad job.
async fn dispatch_loop(
    mut rx: mpsc::UnboundedReceiver<JobDescriptor>,
    context: ExecutorContext,
    slots: Arc<Semaphore>,
    queued: Arc<AtomicUsize>,
) {
    while let Some(descriptor) = rx.recv().await {
        // Block here, not in the executor: the next descriptor is not
        // pulled until this one has a slot, which preserves FIFO starts.
        // The descriptor stays counted as queued while it waits, so
        // `queue_info` never loses sight of a dequeued-but-unstarted job.
        let permit = match Arc::clone(&slots).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                // Semaphore closed: nothing can run anymore.
                queued.fetch_sub(1, Ordering::SeqCst);
                warn!(job_id = %descriptor.job_id, "Worker slots closed; dropping descriptor");
                continue;
            }
        };
        queued.fetch_sub(1, Ordering::SeqCst);

        let context = context.clone();
        tokio::spawn(async move {
            executor::run_job(&context, &descriptor).await;
            // Slot released exactly once, on every exit path.
            drop(permit);
        });
    }

    info!("Dispatch loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::test_support::{
        descriptor_for, wait_for_status, CountingTranscriber, FailingTranscriber, NullDiarizer,
        RecordingTranscriber,
    };
    use crate::jobs::types::JobStatus;
    use crate::store::JobStore;
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrency_never_exceeds_max_workers() {
        let store = Arc::new(JobStore::open_in_memory().unwrap());
        let transcriber = Arc::new(CountingTranscriber::slow(Duration::from_millis(50)));
        let dispatcher = Dispatcher::spawn(
            Arc::clone(&store),
            Arc::clone(&transcriber) as Arc<dyn crate::engines::Transcriber>,
            Arc::new(NullDiarizer),
            2,
        );

        let mut ids = Vec::new();
        for i in 0..6 {
            let job = store.create(&format!("f{}.wav", i), "base").unwrap();
            ids.push(job.id.clone());
            dispatcher.submit(descriptor_for(&job));
        }

        for id in &ids {
            wait_for_status(&store, id, JobStatus::Completed, Duration::from_secs(5)).await;
        }

        assert!(transcriber.max_observed() <= 2);
        assert_eq!(dispatcher.active_workers(), 0);
    }

    #[tokio::test]
    async fn test_jobs_start_in_fifo_submission_order() {
        let store = Arc::new(JobStore::open_in_memory().unwrap());
        let transcriber = Arc::new(RecordingTranscriber::default());
        let dispatcher = Dispatcher::spawn(
            Arc::clone(&store),
            Arc::clone(&transcriber) as Arc<dyn crate::engines::Transcriber>,
            Arc::new(NullDiarizer),
            1,
        );

        let mut ids = Vec::new();
        for name in ["a.wav", "b.wav", "c.wav"] {
            let job = store.create(name, "base").unwrap();
            ids.push(job.id.clone());
            dispatcher.submit(descriptor_for(&job));
        }

        for id in &ids {
            wait_for_status(&store, id, JobStatus::Completed, Duration::from_secs(5)).await;
        }

        assert_eq!(transcriber.started_order(), ids);
    }

    #[tokio::test]
    async fn test_slots_released_after_consecutive_failures() {
        let store = Arc::new(JobStore::open_in_memory().unwrap());
        let dispatcher = Dispatcher::spawn(
            Arc::clone(&store),
            Arc::new(FailingTranscriber),
            Arc::new(NullDiarizer),
            2,
        );

        let mut ids = Vec::new();
        for i in 0..4 {
            let job = store.create(&format!("f{}.wav", i), "base").unwrap();
            ids.push(job.id.clone());
            dispatcher.submit(descriptor_for(&job));
        }

        for id in &ids {
            wait_for_status(&store, id, JobStatus::Failed, Duration::from_secs(5)).await;
        }
        assert_eq!(dispatcher.active_workers(), 0);

        // The pool still dispatches after a failure streak.
        let job = store.create("after.wav", "base").unwrap();
        dispatcher.submit(descriptor_for(&job));
        let job = wait_for_status(&store, &job.id, JobStatus::Failed, Duration::from_secs(5)).await;
        assert!(job.error_message.is_some());
    }

    #[tokio::test]
    async fn test_jobs_waiting_for_a_slot_still_count_as_queued() {
        let store = Arc::new(JobStore::open_in_memory().unwrap());
        let transcriber = Arc::new(CountingTranscriber::slow(Duration::from_millis(300)));
        let dispatcher = Dispatcher::spawn(
            Arc::clone(&store),
            Arc::clone(&transcriber) as Arc<dyn crate::engines::Transcriber>,
            Arc::new(NullDiarizer),
            1,
        );

        let mut ids = Vec::new();
        for i in 0..3 {
            let job = store.create(&format!("f{}.wav", i), "base").unwrap();
            ids.push(job.id.clone());
            dispatcher.submit(descriptor_for(&job));
        }

        // One job holds the single slot. Of the other two, one has been
        // pulled off the channel and is blocked on a permit; both must
        // still show up as queued.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let info = dispatcher.queue_info();
            if info.active_workers == 1 && info.queued_jobs == 2 {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                panic!("queue never settled at 1 active + 2 queued: {:?}", info);
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        for id in &ids {
            wait_for_status(&store, id, JobStatus::Completed, Duration::from_secs(5)).await;
        }
        assert_eq!(dispatcher.queue_info().queued_jobs, 0);
    }

    #[tokio::test]
    async fn test_queue_info_reflects_configuration() {
        let store = Arc::new(JobStore::open_in_memory().unwrap());
        let dispatcher = Dispatcher::spawn(
            store,
            Arc::new(RecordingTranscriber::default()),
            Arc::new(NullDiarizer),
            3,
        );

        let info = dispatcher.queue_info();
        assert_eq!(info.max_workers, 3);
        assert_eq!(info.active_workers, 0);
        assert_eq!(info.queued_jobs, 0);
    }
}
