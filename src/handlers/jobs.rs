//! # Job REST API Handlers
//!
//! HTTP surface of the background transcription pipeline. Submission never
//! blocks on engine work: it creates the durable row, queues a descriptor
//! and returns 202 immediately; clients poll the status endpoint.
//!
//! ## Available Endpoints:
//! - `POST /jobs` - Submit an uploaded file for transcription
//! - `GET /jobs` - Paginated job listing, newest first
//! - `GET /jobs/{id}/status` - Poll status/progress/result
//! - `POST /jobs/{id}/retry` - Re-arm a pending or failed job
//! - `GET /jobs/{id}/download` - Download the transcript as a .txt file
//! - `PUT /jobs/{id}/speakers` - Rename a speaker label in the result

use crate::error::{AppError, AppResult};
use crate::export;
use crate::jobs::retry::retry_job;
use crate::jobs::types::{Job, JobDescriptor, JobStatus};
use crate::state::AppState;
use crate::store::JobUpdate;
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

/// Request body for submitting a transcription job.
#[derive(Debug, Deserialize)]
pub struct SubmitJobRequest {
    /// Name of a previously uploaded file
    pub filename: String,

    /// Optional model override; defaults to the configured preference
    pub model: Option<String>,
}

/// Request body for renaming a speaker label.
#[derive(Debug, Deserialize)]
pub struct RenameSpeakerRequest {
    pub old_label: String,
    pub new_label: String,
}

/// Pagination query parameters for the job listing.
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

/// Strip path components and replace anything outside `[A-Za-z0-9._-]`,
/// mirroring the upload-side sanitization so both ends agree on names.
pub fn sanitize_filename(filename: &str) -> String {
    let base = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(filename);
    base.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

pub async fn submit_job(
    state: web::Data<AppState>,
    body: web::Json<SubmitJobRequest>,
) -> AppResult<HttpResponse> {
    let request = body.into_inner();
    let filename = sanitize_filename(&request.filename);
    if filename.is_empty() {
        return Err(AppError::BadRequest("Filename must not be empty".to_string()));
    }

    let config = state.get_config();
    let input_path = config.storage.upload_dir().join(&filename);

    // Reject before a job row is even created: a submission that points at
    // nothing should not leave a permanently failed record behind.
    if !input_path.exists() {
        return Err(AppError::InputMissing(format!(
            "No uploaded file named {}",
            filename
        )));
    }

    let model = request
        .model
        .filter(|m| !m.trim().is_empty())
        .unwrap_or(config.models.whisper_model);

    let job = state.store.create(&filename, &model)?;
    state.dispatcher.submit(JobDescriptor {
        job_id: job.id.clone(),
        input_path,
        model,
    });
    state.increment_jobs_submitted();

    info!(job_id = %job.id, filename = %filename, "Job accepted");

    // 202 Accepted: processing happens in the background
    Ok(HttpResponse::Accepted().json(json!({
        "id": job.id,
        "status": job.status,
        "progress": job.progress,
        "created_at": job.created_at.to_rfc3339(),
    })))
}

pub async fn job_status(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    let job = load_job(&state, &path)?;

    let mut response = json!({
        "id": job.id,
        "filename": job.filename,
        "model": job.model,
        "status": job.status,
        "progress": job.progress,
        "created_at": job.created_at.to_rfc3339(),
    });

    // Result fields only exist in their matching terminal state.
    match job.status {
        JobStatus::Completed => {
            response["transcript"] = json!(job.transcript);
            response["segments"] = json!(job.segments);
        }
        JobStatus::Failed => {
            response["error_message"] = json!(job.error_message);
        }
        _ => {}
    }

    Ok(HttpResponse::Ok().json(response))
}

pub async fn list_jobs(
    state: web::Data<AppState>,
    query: web::Query<ListQuery>,
) -> AppResult<HttpResponse> {
    let page = query.page.unwrap_or(1);
    let per_page = query.per_page.unwrap_or(5);

    let listing = state.store.list_page(page, per_page)?;

    Ok(HttpResponse::Ok().json(json!({
        "items": listing.items,
        "total": listing.total,
        "pages": listing.pages(),
        "current_page": listing.page,
        "per_page": listing.per_page,
        "has_next": listing.has_next(),
        "has_prev": listing.has_prev(),
    })))
}

pub async fn retry(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    let config = state.get_config();
    let job = retry_job(
        &state.store,
        &state.dispatcher,
        &config.storage.upload_dir(),
        &config.models.whisper_model,
        &path,
    )?;
    state.increment_jobs_submitted();

    Ok(HttpResponse::Ok().json(json!({
        "id": job.id,
        "status": job.status,
        "progress": job.progress,
    })))
}

pub async fn download_transcript(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    let job = load_job(&state, &path)?;
    if job.status != JobStatus::Completed {
        return Err(AppError::BadRequest(format!(
            "Job is not completed yet (status: {})",
            job.status
        )));
    }

    let content = export::render_transcript(&job);
    let attachment = export::download_name(&job.filename);

    Ok(HttpResponse::Ok()
        .content_type("text/plain; charset=utf-8")
        .insert_header((
            "Content-Disposition",
            format!("attachment; filename=\"{}\"", attachment),
        ))
        .body(content))
}

pub async fn rename_speaker(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<RenameSpeakerRequest>,
) -> AppResult<HttpResponse> {
    let request = body.into_inner();
    if request.old_label.is_empty() || request.new_label.is_empty() {
        return Err(AppError::BadRequest(
            "Both old_label and new_label are required".to_string(),
        ));
    }

    let job = load_job(&state, &path)?;
    let Some(segments) = job.segments else {
        return Err(AppError::BadRequest(
            "Job has no segments to rename speakers in".to_string(),
        ));
    };

    let mut renamed = 0;
    let segments: Vec<_> = segments
        .into_iter()
        .map(|mut segment| {
            if segment.speaker == request.old_label {
                segment.speaker = request.new_label.clone();
                renamed += 1;
            }
            segment
        })
        .collect();

    if renamed == 0 {
        return Err(AppError::NotFound(format!(
            "No segments with speaker {}",
            request.old_label
        )));
    }

    state.store.update(
        &job.id,
        &JobUpdate {
            segments: Some(segments),
            ..JobUpdate::default()
        },
    )?;

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "renamed_segments": renamed,
    })))
}

fn load_job(state: &AppState, id: &str) -> Result<Job, AppError> {
    state
        .store
        .get(id)?
        .ok_or_else(|| AppError::NotFound(format!("Job {} not found", id)))
}
