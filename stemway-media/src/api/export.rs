//! Export job API handlers
//!
//! POST /export, POST /export/:job_id/upload, GET /export/:job_id/status,
//! GET /export/:job_id/download

use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio_util::io::ReaderStream;
use uuid::Uuid;

use crate::{
    error::{ApiError, ApiResult},
    models::{ExportFormat, ExportParams, ExportState},
    AppState,
};

/// Upper bound on an export upload request body (raw multi-stem renders)
const MAX_EXPORT_BODY_BYTES: usize = 2 * 1024 * 1024 * 1024;

/// Default target sample rate when the request omits one
const DEFAULT_SAMPLE_RATE: u32 = 44_100;

/// Default target bit depth when the request omits one
const DEFAULT_BIT_DEPTH: u16 = 16;

/// POST /export request
#[derive(Debug, Deserialize)]
pub struct CreateExportRequest {
    pub project_id: String,
    pub format: String,
    #[serde(default)]
    pub sample_rate: Option<u32>,
    #[serde(default)]
    pub bit_depth: Option<u16>,
}

/// POST /export response
#[derive(Debug, Serialize)]
pub struct CreateExportResponse {
    pub job_id: Uuid,
    pub state: ExportState,
}

/// POST /export/:job_id/upload response
#[derive(Debug, Serialize)]
pub struct ExportUploadResponse {
    pub job_id: Uuid,
    pub state: ExportState,
    pub stem_count: usize,
}

/// GET /export/:job_id/status response
#[derive(Debug, Serialize)]
pub struct ExportStatusResponse {
    pub job_id: Uuid,
    pub state: ExportState,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// POST /export
///
/// Create an export job. Returns 202 Accepted; the client uploads renders
/// next and then polls status.
pub async fn create_export(
    State(state): State<AppState>,
    Json(request): Json<CreateExportRequest>,
) -> ApiResult<(StatusCode, Json<CreateExportResponse>)> {
    let format = ExportFormat::parse(&request.format)?;
    let params = ExportParams {
        project_id: request.project_id,
        format,
        sample_rate: request.sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE),
        bit_depth: request.bit_depth.unwrap_or(DEFAULT_BIT_DEPTH),
    };

    let job = state.exports.create_job(params).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(CreateExportResponse {
            job_id: job.job_id,
            state: job.state,
        }),
    ))
}

/// POST /export/:job_id/upload
///
/// Multipart audio upload: each file part is staged as one stem, then the
/// conversion pipeline starts. Returns 202 Accepted immediately.
pub async fn upload_export_audio(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<ExportUploadResponse>)> {
    // Reject before staging any bytes for missing or already-started jobs
    let job = state.exports.job_status(job_id).await?;
    if job.state != ExportState::AwaitingUpload {
        return Err(ApiError::Conflict(format!(
            "Export job {} is not awaiting upload (state: {})",
            job_id,
            job.state.as_str()
        )));
    }

    let staging = state.exports.staging_dir(job_id);
    let mut files: Vec<PathBuf> = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Malformed multipart body: {}", e)))?
    {
        if field.file_name().is_none() {
            continue; // Non-file parts are ignored
        }

        let path = staging.join(format!("stem_{:03}.wav", files.len()));
        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(format!("Malformed audio part: {}", e)))?;
        if data.is_empty() {
            return Err(ApiError::BadRequest("Empty audio part".to_string()));
        }
        tokio::fs::write(&path, &data).await?;
        files.push(path);
    }

    let job = state.exports.attach_uploads(job_id, files).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(ExportUploadResponse {
            job_id,
            state: job.state,
            stem_count: job.stem_files.len(),
        }),
    ))
}

/// GET /export/:job_id/status
pub async fn export_status(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Json<ExportStatusResponse>> {
    let job = state.exports.job_status(job_id).await?;
    Ok(Json(ExportStatusResponse {
        job_id,
        state: job.state,
        progress: job.progress,
        error: job.error,
    }))
}

/// GET /export/:job_id/download
///
/// Stream the artifact, then remove the job and its file: at-most-one
/// download. Non-completed and unknown jobs are 404.
pub async fn download_export(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Response> {
    let (job, artifact) = state.exports.take_completed(job_id).await?;

    let file = match tokio::fs::File::open(&artifact).await {
        Ok(file) => file,
        Err(e) => {
            let message = format!("Artifact missing for job {}: {}", job_id, e);
            state.record_error(message.clone()).await;
            return Err(ApiError::Internal(message));
        }
    };
    let size = file.metadata().await?.len();

    // Unlink while the handle is open: the stream drains the open file and
    // the name disappears immediately, so a re-download cannot find it.
    if let Err(e) = tokio::fs::remove_file(&artifact).await {
        tracing::warn!(job_id = %job_id, error = %e, "Failed to unlink artifact");
    }
    if let Some(dir) = artifact.parent() {
        tokio::fs::remove_dir_all(dir).await.ok();
    }

    let filename = artifact
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("export.bin")
        .to_string();

    tracing::info!(
        job_id = %job_id,
        project_id = %job.project_id,
        size,
        "Streaming export artifact"
    );

    let stream = ReaderStream::new(file);
    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::CONTENT_LENGTH, size)
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", filename),
        )
        .body(Body::from_stream(stream))
        .map_err(|e| ApiError::Internal(format!("Failed to build response: {}", e)))?;

    Ok(response.into_response())
}

/// Build export routes
pub fn export_routes() -> Router<AppState> {
    Router::new()
        .route("/export", post(create_export))
        .route(
            "/export/:job_id/upload",
            post(upload_export_audio).layer(DefaultBodyLimit::max(MAX_EXPORT_BODY_BYTES)),
        )
        .route("/export/:job_id/status", get(export_status))
        .route("/export/:job_id/download", get(download_export))
}
