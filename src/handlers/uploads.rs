//! # Upload Handler
//!
//! Accepts multipart WAV uploads and lands them in the configured upload
//! directory. Uploading and submitting are separate steps: a client first
//! uploads the audio, then posts a job referencing the stored filename.
//!
//! Validation is deliberately strict: only `.wav` files with a WAV
//! content type are accepted, and filenames are sanitized before they
//! touch the filesystem.

use crate::error::{AppError, AppResult};
use crate::handlers::jobs::sanitize_filename;
use crate::state::AppState;
use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use futures_util::TryStreamExt;
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tracing::info;

const ALLOWED_MIME_TYPES: [&str; 3] = ["audio/wav", "audio/x-wav", "audio/wave"];

pub async fn upload_audio(
    state: web::Data<AppState>,
    mut payload: Multipart,
) -> AppResult<HttpResponse> {
    let config = state.get_config();
    let upload_dir = config.storage.upload_dir();
    let max_bytes = config.storage.max_upload_bytes();

    while let Some(mut field) = payload
        .try_next()
        .await
        .map_err(|e| AppError::BadRequest(format!("Malformed multipart payload: {}", e)))?
    {
        let Some(filename) = field
            .content_disposition()
            .and_then(|cd| cd.get_filename())
            .map(sanitize_filename)
        else {
            // Not a file part; skip form fields we don't care about.
            continue;
        };

        if filename.is_empty() || !filename.to_ascii_lowercase().ends_with(".wav") {
            return Err(AppError::ValidationError(
                "Only .wav files are accepted".to_string(),
            ));
        }

        if let Some(mime) = field.content_type() {
            if !ALLOWED_MIME_TYPES.contains(&mime.essence_str()) {
                return Err(AppError::ValidationError(format!(
                    "Unsupported content type: {}",
                    mime.essence_str()
                )));
            }
        }

        let target = upload_dir.join(&filename);
        let mut file = tokio::fs::File::create(&target)
            .await
            .map_err(|e| AppError::Internal(format!("Could not create upload file: {}", e)))?;

        let mut written: usize = 0;
        while let Some(chunk) = field
            .try_next()
            .await
            .map_err(|e| AppError::BadRequest(format!("Upload interrupted: {}", e)))?
        {
            written += chunk.len();
            if written > max_bytes {
                // Remove the partial file before rejecting.
                drop(file);
                let _ = tokio::fs::remove_file(&target).await;
                return Err(AppError::ValidationError(format!(
                    "File exceeds the {} MB upload limit",
                    config.storage.max_upload_mb
                )));
            }
            file.write_all(&chunk)
                .await
                .map_err(|e| AppError::Internal(format!("Could not write upload: {}", e)))?;
        }

        file.flush()
            .await
            .map_err(|e| AppError::Internal(format!("Could not flush upload: {}", e)))?;

        info!(filename = %filename, bytes = written, "Upload stored");

        return Ok(HttpResponse::Ok().json(json!({
            "success": true,
            "filename": filename,
            "bytes": written,
        })));
    }

    Err(AppError::BadRequest("No file part in request".to_string()))
}
