//! # Job Store
//!
//! SQLite-backed persistence for job records. This is the single durable
//! source of truth for job status; the dispatcher and executors keep no
//! committed state of their own, which is what makes the crash-recovery
//! scan a pure reconciliation pass over this table.
//!
//! ## Concurrency:
//! The connection sits behind a `Mutex`, so every call is atomic with
//! respect to other callers. Concurrently running executors only ever
//! touch the row identified by their own job id, so there is no cross-job
//! write contention beyond that lock.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use std::path::Path;
use std::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::jobs::types::{decode_segments, encode_segments, Job, JobStatus, Segment};

/// Owns the SQLite connection and exposes the job persistence contract.
pub struct JobStore {
    conn: Mutex<Connection>,
}

/// Field mask for a partial job update.
///
/// Only the fields that are `Some` are written; each call is applied as a
/// single SQL statement and is therefore atomic. The executor communicates
/// every outcome through one of the constructors below instead of pushing
/// ad-hoc writes.
#[derive(Debug, Default)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub progress: Option<u8>,
    /// `Some(None)` clears the column, `Some(Some(_))` sets it
    pub error_message: Option<Option<String>>,
    pub transcript: Option<String>,
    pub segments: Option<Vec<Segment>>,
    pub model: Option<String>,
}

impl JobUpdate {
    /// Executor picked the job up: processing, first coarse checkpoint.
    pub fn processing() -> Self {
        Self {
            status: Some(JobStatus::Processing),
            progress: Some(10),
            ..Self::default()
        }
    }

    /// Job finished: persist the result and mark completed.
    pub fn completed(transcript: String, segments: Vec<Segment>) -> Self {
        Self {
            status: Some(JobStatus::Completed),
            progress: Some(100),
            error_message: Some(None),
            transcript: Some(transcript),
            segments: Some(segments),
            ..Self::default()
        }
    }

    /// Job failed: record the reason and reset progress.
    pub fn failed(message: String) -> Self {
        Self {
            status: Some(JobStatus::Failed),
            progress: Some(0),
            error_message: Some(Some(message)),
            ..Self::default()
        }
    }

    /// Re-arm a job for another run (retry or crash recovery), switching
    /// it to whichever model is currently configured.
    pub fn reset_pending(model: String) -> Self {
        Self {
            status: Some(JobStatus::Pending),
            progress: Some(0),
            error_message: Some(None),
            model: Some(model),
            ..Self::default()
        }
    }
}

/// One page of a job listing, newest first.
#[derive(Debug)]
pub struct JobPage {
    pub items: Vec<Job>,
    pub total: u64,
    pub page: u32,
    pub per_page: u32,
}

impl JobPage {
    pub fn pages(&self) -> u64 {
        if self.per_page == 0 {
            0
        } else {
            self.total.div_ceil(self.per_page as u64)
        }
    }

    pub fn has_next(&self) -> bool {
        (self.page as u64) < self.pages()
    }

    pub fn has_prev(&self) -> bool {
        self.page > 1
    }
}

impl JobStore {
    /// Open (or create) the database at the given path and run schema setup.
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create database directory")?;
        }

        let conn = Connection::open(db_path).context("Failed to open database")?;
        Self::init_schema(&conn)?;

        info!(path = %db_path.display(), "Job store initialized");

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id            TEXT PRIMARY KEY,
                filename      TEXT NOT NULL,
                model         TEXT NOT NULL,
                status        TEXT NOT NULL DEFAULT 'pending',
                progress      INTEGER NOT NULL DEFAULT 0,
                error_message TEXT,
                transcript    TEXT,
                segments      TEXT,
                created_at    TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);
            CREATE INDEX IF NOT EXISTS idx_jobs_created_at ON jobs(created_at);
            "#,
        )
        .context("Failed to initialize job schema")?;
        Ok(())
    }

    fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Failed to lock database connection: {}", e))?;
        f(&conn)
    }

    /// Create a new job row with `pending` status and progress 0.
    ///
    /// The id is assigned here; callers get the full snapshot back.
    pub fn create(&self, filename: &str, model: &str) -> Result<Job> {
        let job = Job {
            id: Uuid::new_v4().to_string(),
            filename: filename.to_string(),
            model: model.to_string(),
            status: JobStatus::Pending,
            progress: 0,
            error_message: None,
            transcript: None,
            segments: None,
            created_at: Utc::now(),
        };

        self.with_connection(|conn| {
            conn.execute(
                r#"
                INSERT INTO jobs (id, filename, model, status, progress, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
                params![
                    job.id,
                    job.filename,
                    job.model,
                    job.status.as_str(),
                    job.progress,
                    job.created_at.to_rfc3339(),
                ],
            )
            .context("Failed to insert job")?;
            Ok(())
        })?;

        Ok(job)
    }

    /// Fetch one job by id.
    pub fn get(&self, id: &str) -> Result<Option<Job>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, filename, model, status, progress, error_message, transcript, segments, created_at
                 FROM jobs WHERE id = ?1",
            )?;
            let mut rows = stmt.query(params![id])?;

            match rows.next()? {
                Some(row) => Ok(Some(job_from_row(row)?)),
                None => Ok(None),
            }
        })
    }

    /// Apply a partial update to one job row as a single statement.
    pub fn update(&self, id: &str, update: &JobUpdate) -> Result<()> {
        let mut assignments: Vec<String> = Vec::new();
        let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(status) = update.status {
            assignments.push(format!("status = ?{}", values.len() + 1));
            values.push(Box::new(status.as_str().to_string()));
        }
        if let Some(progress) = update.progress {
            assignments.push(format!("progress = ?{}", values.len() + 1));
            values.push(Box::new(progress));
        }
        if let Some(ref error_message) = update.error_message {
            assignments.push(format!("error_message = ?{}", values.len() + 1));
            values.push(Box::new(error_message.clone()));
        }
        if let Some(ref transcript) = update.transcript {
            assignments.push(format!("transcript = ?{}", values.len() + 1));
            values.push(Box::new(transcript.clone()));
        }
        if let Some(ref segments) = update.segments {
            let encoded = encode_segments(segments).context("Failed to encode segments")?;
            assignments.push(format!("segments = ?{}", values.len() + 1));
            values.push(Box::new(encoded));
        }
        if let Some(ref model) = update.model {
            assignments.push(format!("model = ?{}", values.len() + 1));
            values.push(Box::new(model.clone()));
        }

        if assignments.is_empty() {
            return Ok(());
        }

        let sql = format!(
            "UPDATE jobs SET {} WHERE id = ?{}",
            assignments.join(", "),
            values.len() + 1
        );
        values.push(Box::new(id.to_string()));

        self.with_connection(|conn| {
            let changed = conn
                .execute(&sql, rusqlite::params_from_iter(values.iter()))
                .context("Failed to update job")?;
            if changed == 0 {
                anyhow::bail!("Job {} not found", id);
            }
            Ok(())
        })
    }

    /// All jobs currently in one of the given states, oldest first.
    ///
    /// Used by the recovery scanner to find ghost jobs after a restart.
    pub fn list_by_status(&self, statuses: &[JobStatus]) -> Result<Vec<Job>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = (1..=statuses.len())
            .map(|i| format!("?{}", i))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT id, filename, model, status, progress, error_message, transcript, segments, created_at
             FROM jobs WHERE status IN ({}) ORDER BY created_at ASC",
            placeholders
        );

        self.with_connection(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let names: Vec<String> = statuses.iter().map(|s| s.as_str().to_string()).collect();
            let mut rows = stmt.query(rusqlite::params_from_iter(names.iter()))?;

            let mut jobs = Vec::new();
            while let Some(row) = rows.next()? {
                jobs.push(job_from_row(row)?);
            }
            Ok(jobs)
        })
    }

    /// One page of all jobs, newest first. `page` is 1-based.
    pub fn list_page(&self, page: u32, per_page: u32) -> Result<JobPage> {
        let page = page.max(1);
        let per_page = per_page.clamp(1, 100);
        let offset = (page as u64 - 1) * per_page as u64;

        self.with_connection(|conn| {
            let total: u64 =
                conn.query_row("SELECT COUNT(*) FROM jobs", [], |row| row.get(0))?;

            let mut stmt = conn.prepare(
                "SELECT id, filename, model, status, progress, error_message, transcript, segments, created_at
                 FROM jobs ORDER BY created_at DESC LIMIT ?1 OFFSET ?2",
            )?;
            let mut rows = stmt.query(params![per_page, offset])?;

            let mut items = Vec::new();
            while let Some(row) = rows.next()? {
                items.push(job_from_row(row)?);
            }

            Ok(JobPage {
                items,
                total,
                page,
                per_page,
            })
        })
    }
}

fn job_from_row(row: &Row<'_>) -> Result<Job> {
    let status_raw: String = row.get(3)?;
    let status = JobStatus::parse(&status_raw)
        .ok_or_else(|| anyhow::anyhow!("Unknown job status in database: {}", status_raw))?;

    let segments_raw: Option<String> = row.get(7)?;
    let segments = match segments_raw {
        Some(raw) => Some(decode_segments(&raw).context("Failed to decode stored segments")?),
        None => None,
    };

    let created_raw: String = row.get(8)?;
    let created_at = DateTime::parse_from_rfc3339(&created_raw)
        .context("Invalid created_at timestamp in database")?
        .with_timezone(&Utc);

    Ok(Job {
        id: row.get(0)?,
        filename: row.get(1)?,
        model: row.get(2)?,
        status,
        progress: row.get(4)?,
        error_message: row.get(5)?,
        transcript: row.get(6)?,
        segments,
        created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_open_creates_database_file() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("nested").join("jobs.db");

        let store = JobStore::open(&db_path).unwrap();
        assert!(db_path.exists());

        let job = store.create("meeting.wav", "base").unwrap();
        assert_eq!(store.get(&job.id).unwrap().unwrap().filename, "meeting.wav");
    }

    #[test]
    fn test_create_starts_pending_with_zero_progress() {
        let store = JobStore::open_in_memory().unwrap();
        let job = store.create("a.wav", "base").unwrap();

        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.progress, 0);
        assert!(job.error_message.is_none());
        assert!(job.transcript.is_none());
        assert!(job.segments.is_none());
    }

    #[test]
    fn test_update_applies_only_masked_fields() {
        let store = JobStore::open_in_memory().unwrap();
        let job = store.create("a.wav", "base").unwrap();

        store.update(&job.id, &JobUpdate::processing()).unwrap();
        let loaded = store.get(&job.id).unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Processing);
        assert_eq!(loaded.progress, 10);
        // Untouched fields survive
        assert_eq!(loaded.filename, "a.wav");
        assert_eq!(loaded.model, "base");
    }

    #[test]
    fn test_completed_update_persists_result() {
        let store = JobStore::open_in_memory().unwrap();
        let job = store.create("a.wav", "base").unwrap();

        let segments = vec![Segment {
            start: 0.0,
            end: 1.0,
            text: "hi".to_string(),
            speaker: "A".to_string(),
        }];
        store
            .update(&job.id, &JobUpdate::completed("hi".to_string(), segments.clone()))
            .unwrap();

        let loaded = store.get(&job.id).unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Completed);
        assert_eq!(loaded.progress, 100);
        assert_eq!(loaded.transcript.as_deref(), Some("hi"));
        assert_eq!(loaded.segments.unwrap(), segments);
    }

    #[test]
    fn test_failed_then_reset_clears_error() {
        let store = JobStore::open_in_memory().unwrap();
        let job = store.create("a.wav", "base").unwrap();

        store
            .update(&job.id, &JobUpdate::failed("engine exploded".to_string()))
            .unwrap();
        let failed = store.get(&job.id).unwrap().unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.error_message.as_deref(), Some("engine exploded"));

        store
            .update(&job.id, &JobUpdate::reset_pending("small".to_string()))
            .unwrap();
        let reset = store.get(&job.id).unwrap().unwrap();
        assert_eq!(reset.status, JobStatus::Pending);
        assert_eq!(reset.progress, 0);
        assert!(reset.error_message.is_none());
        assert_eq!(reset.model, "small");
    }

    #[test]
    fn test_update_unknown_job_is_an_error() {
        let store = JobStore::open_in_memory().unwrap();
        assert!(store.update("no-such-id", &JobUpdate::processing()).is_err());
    }

    #[test]
    fn test_list_by_status_finds_ghost_jobs() {
        let store = JobStore::open_in_memory().unwrap();
        let ghost_pending = store.create("a.wav", "base").unwrap();
        let ghost_processing = store.create("b.wav", "base").unwrap();
        let done = store.create("c.wav", "base").unwrap();

        store
            .update(&ghost_processing.id, &JobUpdate::processing())
            .unwrap();
        store
            .update(&done.id, &JobUpdate::completed(String::new(), Vec::new()))
            .unwrap();

        let ghosts = store
            .list_by_status(&[JobStatus::Pending, JobStatus::Processing])
            .unwrap();
        let ids: Vec<&str> = ghosts.iter().map(|j| j.id.as_str()).collect();

        assert_eq!(ghosts.len(), 2);
        assert!(ids.contains(&ghost_pending.id.as_str()));
        assert!(ids.contains(&ghost_processing.id.as_str()));
    }

    #[test]
    fn test_pagination_counts_and_flags() {
        let store = JobStore::open_in_memory().unwrap();
        for i in 0..7 {
            store.create(&format!("f{}.wav", i), "base").unwrap();
        }

        let first = store.list_page(1, 5).unwrap();
        assert_eq!(first.items.len(), 5);
        assert_eq!(first.total, 7);
        assert_eq!(first.pages(), 2);
        assert!(first.has_next());
        assert!(!first.has_prev());

        let second = store.list_page(2, 5).unwrap();
        assert_eq!(second.items.len(), 2);
        assert!(!second.has_next());
        assert!(second.has_prev());
    }
}
