//! Filesystem persistence for chunks, assembled files, and export artifacts
//!
//! Layout under the storage root:
//!
//! ```text
//! <root>/uploads/<session_id>/chunk_<index>.part
//! <root>/files/<session_id>_<filename>
//! <root>/exports/<job_id>/...
//! ```

use std::path::{Path, PathBuf};
use stemway_common::{Error, Result};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::models::UploadSession;

/// Filesystem chunk and artifact store rooted at a single directory
#[derive(Debug, Clone)]
pub struct ChunkStore {
    root: PathBuf,
}

impl ChunkStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create the storage directory tree if missing
    pub async fn init(&self) -> Result<()> {
        for dir in [self.uploads_dir(), self.files_dir(), self.exports_dir()] {
            tokio::fs::create_dir_all(&dir).await?;
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn uploads_dir(&self) -> PathBuf {
        self.root.join("uploads")
    }

    fn files_dir(&self) -> PathBuf {
        self.root.join("files")
    }

    fn exports_dir(&self) -> PathBuf {
        self.root.join("exports")
    }

    /// In-flight chunk directory for a session
    pub fn session_dir(&self, session_id: Uuid) -> PathBuf {
        self.uploads_dir().join(session_id.to_string())
    }

    /// Path of one chunk file
    pub fn chunk_path(&self, session_id: Uuid, index: u32) -> PathBuf {
        self.session_dir(session_id)
            .join(format!("chunk_{:06}.part", index))
    }

    /// Destination of the assembled upload
    pub fn assembled_path(&self, session_id: Uuid, filename: &str) -> PathBuf {
        self.files_dir().join(format!("{}_{}", session_id, filename))
    }

    /// Working directory for an export job
    pub fn export_dir(&self, job_id: Uuid) -> PathBuf {
        self.exports_dir().join(job_id.to_string())
    }

    /// Create the chunk directory for a new session
    pub async fn create_session_dir(&self, session_id: Uuid) -> Result<()> {
        tokio::fs::create_dir_all(self.session_dir(session_id)).await?;
        Ok(())
    }

    /// Create the working directory for a new export job
    pub async fn create_export_dir(&self, job_id: Uuid) -> Result<()> {
        tokio::fs::create_dir_all(self.export_dir(job_id)).await?;
        Ok(())
    }

    /// Write one chunk to disk (overwrites any previous bytes for the index)
    pub async fn write_chunk(&self, session_id: Uuid, index: u32, bytes: &[u8]) -> Result<()> {
        let path = self.chunk_path(session_id, index);
        let mut file = tokio::fs::File::create(&path).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        Ok(())
    }

    /// Concatenate all chunks in index order into the assembled file.
    ///
    /// Verifies the assembled size against the declared total and removes
    /// the chunk directory on success.
    pub async fn assemble(&self, session: &UploadSession) -> Result<(PathBuf, u64)> {
        let dest = self.assembled_path(session.session_id, &session.filename);
        let mut out = tokio::fs::File::create(&dest).await?;

        let mut written: u64 = 0;
        for index in 0..session.total_chunks {
            let chunk = self.chunk_path(session.session_id, index);
            let mut src = tokio::fs::File::open(&chunk).await.map_err(|e| {
                Error::Internal(format!(
                    "Chunk {} missing on disk during assembly: {}",
                    index, e
                ))
            })?;
            written += tokio::io::copy(&mut src, &mut out).await?;
        }
        out.flush().await?;

        if written != session.total_size {
            // Leave chunks in place so the client can retry after re-upload
            tokio::fs::remove_file(&dest).await.ok();
            return Err(Error::Internal(format!(
                "Assembled size {} does not match declared total {}",
                written, session.total_size
            )));
        }

        tokio::fs::remove_dir_all(self.session_dir(session.session_id))
            .await
            .ok();

        Ok((dest, written))
    }

    /// Discard all partial chunk data for a session (best-effort)
    pub async fn purge_session(&self, session_id: Uuid) {
        let dir = self.session_dir(session_id);
        if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(session_id = %session_id, error = %e, "Failed to purge session dir");
            }
        }
    }

    /// Discard the working directory of an export job (best-effort)
    pub async fn purge_export(&self, job_id: Uuid) {
        let dir = self.export_dir(job_id);
        if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(job_id = %job_id, error = %e, "Failed to purge export dir");
            }
        }
    }
}
