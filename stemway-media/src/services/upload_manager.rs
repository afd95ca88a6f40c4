//! Chunked upload session manager
//!
//! Owns the in-memory session table and drives the upload lifecycle against
//! the filesystem [`ChunkStore`]. Concurrent chunk uploads to one session are
//! serialized by the session-table write lock: an index is only marked
//! received after its bytes are safely on disk, and acceptance is keyed on
//! the verified content hash, so racing duplicate writers converge.

use chrono::Utc;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use stemway_common::{Error, Result};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{UploadSession, UploadState};
use crate::services::ChunkStore;

/// Chunked upload session manager
#[derive(Clone)]
pub struct UploadManager {
    sessions: Arc<RwLock<HashMap<Uuid, UploadSession>>>,
    store: ChunkStore,
    max_upload_bytes: u64,
    default_chunk_bytes: u64,
}

impl UploadManager {
    pub fn new(store: ChunkStore, max_upload_bytes: u64, default_chunk_bytes: u64) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            store,
            max_upload_bytes,
            default_chunk_bytes,
        }
    }

    /// Create a new upload session.
    ///
    /// Rejects oversized or empty declared totals before any chunk is
    /// accepted. Returns a snapshot of the session in `Uploading` state.
    pub async fn initialize_session(
        &self,
        user_id: Option<String>,
        filename: &str,
        total_size: u64,
        chunk_size: Option<u64>,
    ) -> Result<UploadSession> {
        if total_size == 0 {
            return Err(Error::InvalidInput(
                "total_size must be greater than zero".to_string(),
            ));
        }
        if total_size > self.max_upload_bytes {
            return Err(Error::InvalidInput(format!(
                "total_size {} exceeds maximum upload size {}",
                total_size, self.max_upload_bytes
            )));
        }

        let chunk_size = chunk_size.unwrap_or(self.default_chunk_bytes);
        if chunk_size == 0 {
            return Err(Error::InvalidInput(
                "chunk_size must be greater than zero".to_string(),
            ));
        }
        if chunk_size > crate::config::MAX_CHUNK_BYTES {
            return Err(Error::InvalidInput(format!(
                "chunk_size {} exceeds maximum chunk size {}",
                chunk_size,
                crate::config::MAX_CHUNK_BYTES
            )));
        }

        let filename = sanitize_filename(filename)?;
        let mut session = UploadSession::new(
            user_id.unwrap_or_else(|| "anonymous".to_string()),
            filename,
            total_size,
            chunk_size,
        );

        self.store.create_session_dir(session.session_id).await?;
        session.transition_to(UploadState::Uploading)?;

        tracing::info!(
            session_id = %session.session_id,
            user_id = %session.user_id,
            filename = %session.filename,
            total_size,
            total_chunks = session.total_chunks,
            "Upload session initialized"
        );

        let snapshot = session.clone();
        self.sessions.write().await.insert(session.session_id, session);
        Ok(snapshot)
    }

    /// Accept one chunk: verify its hash, persist it, mark the index received.
    ///
    /// A re-upload of an already-accepted index is verified like a first
    /// upload (the claimed hash alone is never trusted) and acked without
    /// rewriting. A duplicate claiming a different hash is a conflict; a hash
    /// mismatch rejects the chunk and leaves the session untouched.
    pub async fn upload_chunk(
        &self,
        session_id: Uuid,
        chunk_index: u32,
        bytes: Vec<u8>,
        chunk_hash: &str,
    ) -> Result<UploadSession> {
        let supplied = chunk_hash.trim().to_ascii_lowercase();

        // Validate against a snapshot before paying for the hash
        {
            let sessions = self.sessions.read().await;
            let session = sessions
                .get(&session_id)
                .ok_or_else(|| Error::NotFound(format!("Upload session not found: {}", session_id)))?;

            if session.state != UploadState::Uploading {
                return Err(Error::Conflict(format!(
                    "Session {} is not accepting chunks (state: {})",
                    session_id,
                    session.state.as_str()
                )));
            }
            if chunk_index >= session.total_chunks {
                return Err(Error::InvalidInput(format!(
                    "chunk_index {} out of range (expected 0..{})",
                    chunk_index, session.total_chunks
                )));
            }
            let expected_len = session.expected_chunk_len(chunk_index);
            if bytes.len() as u64 != expected_len {
                return Err(Error::InvalidInput(format!(
                    "Chunk {} has {} bytes, expected {}",
                    chunk_index,
                    bytes.len(),
                    expected_len
                )));
            }
            if session.is_received(chunk_index)
                && session.chunk_hashes.get(&chunk_index) != Some(&supplied)
            {
                return Err(Error::Conflict(format!(
                    "Chunk {} already accepted with a different hash",
                    chunk_index
                )));
            }
        }

        let computed = sha256_hex(bytes.clone()).await?;
        if computed != supplied {
            tracing::warn!(
                session_id = %session_id,
                chunk_index,
                expected = %supplied,
                computed = %computed,
                "Chunk checksum mismatch, rejecting"
            );
            return Err(Error::ChecksumMismatch {
                chunk_index,
                expected: supplied,
                computed,
            });
        }

        // Verified duplicate: ack without touching the bytes already on disk
        {
            let sessions = self.sessions.read().await;
            if let Some(session) = sessions.get(&session_id) {
                if session.is_received(chunk_index) {
                    tracing::debug!(
                        session_id = %session_id,
                        chunk_index,
                        "Duplicate chunk re-verified, ignoring"
                    );
                    return Ok(session.clone());
                }
            }
        }

        self.store.write_chunk(session_id, chunk_index, &bytes).await?;

        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(&session_id)
            .ok_or_else(|| Error::NotFound(format!("Upload session not found: {}", session_id)))?;
        if session.state != UploadState::Uploading {
            // Session was finalized or aborted while the write was in flight
            return Err(Error::Conflict(format!(
                "Session {} is not accepting chunks (state: {})",
                session_id,
                session.state.as_str()
            )));
        }
        session.record_chunk(chunk_index, computed);

        tracing::debug!(
            session_id = %session_id,
            chunk_index,
            received = session.received.len(),
            total = session.total_chunks,
            "Chunk accepted"
        );

        Ok(session.clone())
    }

    /// Number of sessions currently tracked, in any state
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Snapshot of a session's current state
    pub async fn session_status(&self, session_id: Uuid) -> Result<UploadSession> {
        self.sessions
            .read()
            .await
            .get(&session_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Upload session not found: {}", session_id)))
    }

    /// Assemble the final file once every chunk is present.
    ///
    /// Fails with a conflict (session stays `Uploading`) when chunks are
    /// missing. On assembly failure the session rolls back to `Uploading`.
    pub async fn finalize_upload(&self, session_id: Uuid) -> Result<(UploadSession, PathBuf, u64)> {
        let snapshot = {
            let mut sessions = self.sessions.write().await;
            let session = sessions
                .get_mut(&session_id)
                .ok_or_else(|| Error::NotFound(format!("Upload session not found: {}", session_id)))?;

            if session.state != UploadState::Uploading {
                return Err(Error::Conflict(format!(
                    "Session {} cannot be finalized (state: {})",
                    session_id,
                    session.state.as_str()
                )));
            }
            if !session.is_complete_set() {
                let missing = session.missing_chunks();
                return Err(Error::Conflict(format!(
                    "Session {} is missing {} chunk(s): {:?}",
                    session_id,
                    missing.len(),
                    preview(&missing)
                )));
            }
            session.transition_to(UploadState::Finalizing)?;
            session.clone()
        };

        match self.store.assemble(&snapshot).await {
            Ok((path, size)) => {
                let mut sessions = self.sessions.write().await;
                let session = sessions.get_mut(&session_id).ok_or_else(|| {
                    Error::NotFound(format!("Upload session not found: {}", session_id))
                })?;
                session.transition_to(UploadState::Complete)?;

                tracing::info!(
                    session_id = %session_id,
                    path = %path.display(),
                    size,
                    "Upload finalized"
                );
                Ok((session.clone(), path, size))
            }
            Err(e) => {
                tracing::error!(session_id = %session_id, error = %e, "Assembly failed");
                let mut sessions = self.sessions.write().await;
                if let Some(session) = sessions.get_mut(&session_id) {
                    session.transition_to(UploadState::Uploading).ok();
                }
                Err(e)
            }
        }
    }

    /// Abort a session, discarding all partial chunk data
    pub async fn abort_upload(&self, session_id: Uuid) -> Result<UploadSession> {
        let snapshot = {
            let mut sessions = self.sessions.write().await;
            let session = sessions
                .get_mut(&session_id)
                .ok_or_else(|| Error::NotFound(format!("Upload session not found: {}", session_id)))?;
            session.transition_to(UploadState::Aborted)?;
            session.clone()
        };

        self.store.purge_session(session_id).await;
        tracing::info!(session_id = %session_id, "Upload session aborted");
        Ok(snapshot)
    }

    /// Drop sessions idle for longer than `ttl_secs`, purging their chunks.
    ///
    /// Returns the number of evicted sessions.
    pub async fn evict_stale(&self, ttl_secs: u64) -> usize {
        let cutoff = Utc::now() - chrono::Duration::seconds(ttl_secs as i64);

        let stale: Vec<Uuid> = {
            let sessions = self.sessions.read().await;
            sessions
                .values()
                .filter(|s| s.state != UploadState::Finalizing && s.updated_at < cutoff)
                .map(|s| s.session_id)
                .collect()
        };

        let mut evicted = 0;
        for session_id in stale {
            self.sessions.write().await.remove(&session_id);
            self.store.purge_session(session_id).await;
            evicted += 1;
            tracing::info!(session_id = %session_id, "Evicted stale upload session");
        }
        evicted
    }
}

/// Compute the lowercase hex SHA-256 of a buffer off the async runtime
async fn sha256_hex(bytes: Vec<u8>) -> Result<String> {
    tokio::task::spawn_blocking(move || {
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        format!("{:x}", hasher.finalize())
    })
    .await
    .map_err(|e| Error::Internal(format!("Hash task failed: {}", e)))
}

/// Reduce a client-supplied filename to a safe basename
fn sanitize_filename(raw: &str) -> Result<String> {
    let name = std::path::Path::new(raw)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("")
        .trim()
        .to_string();

    if name.is_empty() || name == "." || name == ".." {
        return Err(Error::InvalidInput(format!("Invalid filename: {}", raw)));
    }
    Ok(name)
}

/// First few entries of a missing-chunk list, for error messages
fn preview(indices: &[u32]) -> Vec<u32> {
    indices.iter().take(10).copied().collect()
}
