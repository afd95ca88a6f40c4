//! Chunked upload API handlers
//!
//! POST /upload/init, POST /upload/:session_id/chunk,
//! GET /upload/:session_id/status, POST /upload/:session_id/finalize,
//! DELETE /upload/:session_id

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::{ApiError, ApiResult},
    models::{UploadSession, UploadState},
    AppState,
};

/// Upper bound on a chunk request body: the largest legal chunk plus
/// multipart framing headroom
const MAX_CHUNK_BODY_BYTES: usize = crate::config::MAX_CHUNK_BYTES as usize + 1024 * 1024;

/// POST /upload/init request
#[derive(Debug, Deserialize)]
pub struct InitUploadRequest {
    #[serde(default)]
    pub user_id: Option<String>,
    pub filename: String,
    pub total_size: u64,
    #[serde(default)]
    pub chunk_size: Option<u64>,
}

/// POST /upload/init response
#[derive(Debug, Serialize)]
pub struct InitUploadResponse {
    pub session_id: Uuid,
    pub state: UploadState,
    pub total_chunks: u32,
    pub chunk_size: u64,
}

/// Per-chunk acknowledgement
#[derive(Debug, Serialize)]
pub struct ChunkAckResponse {
    pub session_id: Uuid,
    pub chunk_index: u32,
    pub received_chunks: u32,
    pub total_chunks: u32,
    pub state: UploadState,
}

/// GET /upload/:session_id/status response
#[derive(Debug, Serialize)]
pub struct UploadStatusResponse {
    pub session_id: Uuid,
    pub state: UploadState,
    pub filename: String,
    pub total_size: u64,
    pub received_chunks: u32,
    pub total_chunks: u32,
    pub missing_chunks: Vec<u32>,
}

impl From<UploadSession> for UploadStatusResponse {
    fn from(session: UploadSession) -> Self {
        Self {
            session_id: session.session_id,
            state: session.state,
            filename: session.filename.clone(),
            total_size: session.total_size,
            received_chunks: session.received.len() as u32,
            total_chunks: session.total_chunks,
            missing_chunks: session.missing_chunks(),
        }
    }
}

/// POST /upload/:session_id/finalize response
#[derive(Debug, Serialize)]
pub struct FinalizeResponse {
    pub session_id: Uuid,
    pub state: UploadState,
    pub path: String,
    pub size: u64,
}

/// DELETE /upload/:session_id response
#[derive(Debug, Serialize)]
pub struct AbortResponse {
    pub session_id: Uuid,
    pub state: UploadState,
}

/// POST /upload/init
///
/// Create an upload session. Rejects oversized declared totals before any
/// chunk is accepted.
pub async fn init_upload(
    State(state): State<AppState>,
    Json(request): Json<InitUploadRequest>,
) -> ApiResult<(StatusCode, Json<InitUploadResponse>)> {
    if request.total_size > state.config.max_upload_bytes {
        return Err(ApiError::PayloadTooLarge(format!(
            "total_size {} exceeds maximum upload size {}",
            request.total_size, state.config.max_upload_bytes
        )));
    }

    let session = state
        .uploads
        .initialize_session(
            request.user_id,
            &request.filename,
            request.total_size,
            request.chunk_size,
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(InitUploadResponse {
            session_id: session.session_id,
            state: session.state,
            total_chunks: session.total_chunks,
            chunk_size: session.chunk_size,
        }),
    ))
}

/// POST /upload/:session_id/chunk
///
/// Multipart fields: `chunk_index` (text), `chunk_hash` (hex SHA-256, text),
/// `chunk` (file part with the bytes).
pub async fn upload_chunk(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    mut multipart: Multipart,
) -> ApiResult<Json<ChunkAckResponse>> {
    let mut chunk_index: Option<u32> = None;
    let mut chunk_hash: Option<String> = None;
    let mut bytes: Option<Vec<u8>> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Malformed multipart body: {}", e)))?
    {
        match field.name() {
            Some("chunk_index") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Malformed chunk_index: {}", e)))?;
                chunk_index = Some(text.trim().parse().map_err(|_| {
                    ApiError::BadRequest(format!("chunk_index is not a valid index: {}", text))
                })?);
            }
            Some("chunk_hash") => {
                chunk_hash = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| ApiError::BadRequest(format!("Malformed chunk_hash: {}", e)))?,
                );
            }
            Some("chunk") => {
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Malformed chunk body: {}", e)))?;
                bytes = Some(data.to_vec());
            }
            _ => {} // Unknown parts are ignored
        }
    }

    let chunk_index =
        chunk_index.ok_or_else(|| ApiError::BadRequest("Missing chunk_index field".to_string()))?;
    let chunk_hash =
        chunk_hash.ok_or_else(|| ApiError::BadRequest("Missing chunk_hash field".to_string()))?;
    let bytes = bytes.ok_or_else(|| ApiError::BadRequest("Missing chunk field".to_string()))?;

    let session = state
        .uploads
        .upload_chunk(session_id, chunk_index, bytes, &chunk_hash)
        .await?;

    Ok(Json(ChunkAckResponse {
        session_id,
        chunk_index,
        received_chunks: session.received.len() as u32,
        total_chunks: session.total_chunks,
        state: session.state,
    }))
}

/// GET /upload/:session_id/status
pub async fn upload_status(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<UploadStatusResponse>> {
    let session = state.uploads.session_status(session_id).await?;
    Ok(Json(session.into()))
}

/// POST /upload/:session_id/finalize
///
/// Assemble the chunks into the final file. Fails with 409 while chunks are
/// still missing.
pub async fn finalize_upload(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<FinalizeResponse>> {
    let (session, path, size) = state.uploads.finalize_upload(session_id).await?;
    Ok(Json(FinalizeResponse {
        session_id,
        state: session.state,
        path: path.display().to_string(),
        size,
    }))
}

/// DELETE /upload/:session_id
///
/// Abort the session and discard all partial chunk data.
pub async fn abort_upload(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<AbortResponse>> {
    let session = state.uploads.abort_upload(session_id).await?;
    Ok(Json(AbortResponse {
        session_id,
        state: session.state,
    }))
}

/// Build upload routes
pub fn upload_routes() -> Router<AppState> {
    Router::new()
        .route("/upload/init", post(init_upload))
        .route(
            "/upload/:session_id/chunk",
            post(upload_chunk).layer(DefaultBodyLimit::max(MAX_CHUNK_BODY_BYTES)),
        )
        .route("/upload/:session_id/status", get(upload_status))
        .route("/upload/:session_id/finalize", post(finalize_upload))
        .route("/upload/:session_id", delete(abort_upload))
}
