//! # Background Job Pipeline
//!
//! Everything between "a job row exists" and "that row is terminal":
//!
//! - **types**: job records, statuses, descriptors, segments
//! - **dispatcher**: FIFO queue + bounded worker pool
//! - **executor**: runs one job end-to-end (engines, merge, persist)
//! - **merge**: pure fusion of transcript and speaker segments
//! - **recovery**: startup reconciliation of jobs stranded by a crash
//! - **retry**: user-triggered re-arm of pending/failed jobs
//!
//! The HTTP layer only ever touches this module through
//! [`Dispatcher::submit`](dispatcher::Dispatcher::submit),
//! [`retry::retry_job`] and the store.

pub mod dispatcher;
pub mod executor;
pub mod merge;
pub mod recovery;
pub mod retry;
pub mod types;

pub use dispatcher::Dispatcher;

/// Shared engine fakes and polling helpers for the pipeline tests.
#[cfg(test)]
pub(crate) mod test_support {
    use crate::engines::{
        Diarizer, EngineError, SpeakerTurn, TextSegment, Transcriber, TranscriptOutput,
    };
    use crate::jobs::types::{Job, JobDescriptor, JobStatus};
    use crate::store::JobStore;
    use async_trait::async_trait;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::time::{sleep, Instant};

    /// Descriptor whose input path encodes the job id, so engine fakes can
    /// tell invocations apart without touching the filesystem.
    pub fn descriptor_for(job: &Job) -> JobDescriptor {
        JobDescriptor {
            job_id: job.id.clone(),
            input_path: PathBuf::from(&job.id),
            model: job.model.clone(),
        }
    }

    /// Poll the store until the job reaches the wanted status.
    pub async fn wait_for_status(
        store: &JobStore,
        job_id: &str,
        wanted: JobStatus,
        timeout: Duration,
    ) -> Job {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(job) = store.get(job_id).unwrap() {
                if job.status == wanted {
                    return job;
                }
            }
            if Instant::now() >= deadline {
                panic!("job {} did not reach {} within {:?}", job_id, wanted, timeout);
            }
            sleep(Duration::from_millis(10)).await;
        }
    }

    /// Returns a fixed transcript.
    pub struct ScriptedTranscriber {
        text: String,
        segments: Vec<TextSegment>,
    }

    impl ScriptedTranscriber {
        pub fn with_segments(text: &str, segments: &[(f64, f64, &str)]) -> Self {
            Self {
                text: text.to_string(),
                segments: segments
                    .iter()
                    .map(|(start, end, text)| TextSegment {
                        start: *start,
                        end: *end,
                        text: text.to_string(),
                    })
                    .collect(),
            }
        }
    }

    #[async_trait]
    impl Transcriber for ScriptedTranscriber {
        async fn run(&self, _input: &Path, _model: &str) -> Result<TranscriptOutput, EngineError> {
            Ok(TranscriptOutput {
                text: self.text.clone(),
                segments: self.segments.clone(),
            })
        }
    }

    /// Returns fixed speaker turns.
    pub struct ScriptedDiarizer {
        turns: Vec<SpeakerTurn>,
    }

    impl ScriptedDiarizer {
        pub fn with_turns(turns: &[(f64, f64, &str)]) -> Self {
            Self {
                turns: turns
                    .iter()
                    .map(|(start, end, speaker)| SpeakerTurn {
                        start: *start,
                        end: *end,
                        speaker: speaker.to_string(),
                    })
                    .collect(),
            }
        }
    }

    #[async_trait]
    impl Diarizer for ScriptedDiarizer {
        async fn run(&self, _input: &Path) -> Result<Vec<SpeakerTurn>, EngineError> {
            Ok(self.turns.clone())
        }
    }

    /// Succeeds with no speaker turns.
    pub struct NullDiarizer;

    #[async_trait]
    impl Diarizer for NullDiarizer {
        async fn run(&self, _input: &Path) -> Result<Vec<SpeakerTurn>, EngineError> {
            Ok(Vec::new())
        }
    }

    /// Always fails.
    pub struct FailingTranscriber;

    #[async_trait]
    impl Transcriber for FailingTranscriber {
        async fn run(&self, _input: &Path, _model: &str) -> Result<TranscriptOutput, EngineError> {
            Err(EngineError::Failed("model crashed".to_string()))
        }
    }

    /// Always fails.
    pub struct FailingDiarizer;

    #[async_trait]
    impl Diarizer for FailingDiarizer {
        async fn run(&self, _input: &Path) -> Result<Vec<SpeakerTurn>, EngineError> {
            Err(EngineError::Failed("no speaker model".to_string()))
        }
    }

    /// Tracks how many invocations run at once and the highest level seen.
    pub struct CountingTranscriber {
        current: AtomicUsize,
        max: AtomicUsize,
        delay: Duration,
    }

    impl CountingTranscriber {
        pub fn slow(delay: Duration) -> Self {
            Self {
                current: AtomicUsize::new(0),
                max: AtomicUsize::new(0),
                delay,
            }
        }

        pub fn max_observed(&self) -> usize {
            self.max.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transcriber for CountingTranscriber {
        async fn run(&self, _input: &Path, _model: &str) -> Result<TranscriptOutput, EngineError> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.max.fetch_max(now, Ordering::SeqCst);
            sleep(self.delay).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(TranscriptOutput {
                text: "ok".to_string(),
                segments: vec![TextSegment {
                    start: 0.0,
                    end: 1.0,
                    text: "ok".to_string(),
                }],
            })
        }
    }

    /// Records the order in which jobs started (via the id-encoding path).
    #[derive(Default)]
    pub struct RecordingTranscriber {
        started: Mutex<Vec<String>>,
    }

    impl RecordingTranscriber {
        pub fn started_order(&self) -> Vec<String> {
            self.started.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transcriber for RecordingTranscriber {
        async fn run(&self, input: &Path, _model: &str) -> Result<TranscriptOutput, EngineError> {
            self.started
                .lock()
                .unwrap()
                .push(input.to_string_lossy().to_string());
            Ok(TranscriptOutput {
                text: "ok".to_string(),
                segments: vec![TextSegment {
                    start: 0.0,
                    end: 1.0,
                    text: "ok".to_string(),
                }],
            })
        }
    }
}
