//! Export job tracker
//!
//! Owns the in-memory job table and the fire-and-forget conversion pipeline.
//! Jobs move AWAITING_UPLOAD -> PROCESSING -> {COMPLETED | FAILED}; the HTTP
//! caller gets the job id immediately and polls for completion. A completed
//! job supports exactly one download: taking the artifact removes the entry.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use stemway_common::{Error, Result};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use crate::models::{ExportJob, ExportParams, ExportState};
use crate::services::wav::{convert_wav, ConversionSpec};
use crate::services::ChunkStore;

/// Export job tracker and conversion pipeline
#[derive(Clone)]
pub struct ExportTracker {
    jobs: Arc<RwLock<HashMap<Uuid, ExportJob>>>,
    /// Cancellation tokens for in-flight conversions
    cancel_tokens: Arc<RwLock<HashMap<Uuid, CancellationToken>>>,
    store: ChunkStore,
}

impl ExportTracker {
    pub fn new(store: ChunkStore) -> Self {
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
            cancel_tokens: Arc::new(RwLock::new(HashMap::new())),
            store,
        }
    }

    /// Create a new job in `AwaitingUpload` state
    pub async fn create_job(&self, params: ExportParams) -> Result<ExportJob> {
        params.validate()?;

        let job = ExportJob::new(params);
        self.store.create_export_dir(job.job_id).await?;

        tracing::info!(
            job_id = %job.job_id,
            project_id = %job.project_id,
            sample_rate = job.sample_rate,
            bit_depth = job.bit_depth,
            "Export job created"
        );

        let snapshot = job.clone();
        self.jobs.write().await.insert(job.job_id, job);
        self.cancel_tokens
            .write()
            .await
            .insert(snapshot.job_id, CancellationToken::new());
        Ok(snapshot)
    }

    /// Working directory where raw renders for a job are staged
    pub fn staging_dir(&self, job_id: Uuid) -> PathBuf {
        self.store.export_dir(job_id)
    }

    /// Number of jobs currently tracked, in any state
    pub async fn job_count(&self) -> usize {
        self.jobs.read().await.len()
    }

    /// Snapshot of a job's current state
    pub async fn job_status(&self, job_id: Uuid) -> Result<ExportJob> {
        self.jobs
            .read()
            .await
            .get(&job_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Export job not found: {}", job_id)))
    }

    /// Attach uploaded renders and start the conversion pipeline.
    ///
    /// Transitions the job to `Processing` and spawns a background task; the
    /// returned snapshot reflects the transition, not the outcome.
    pub async fn attach_uploads(&self, job_id: Uuid, files: Vec<PathBuf>) -> Result<ExportJob> {
        if files.is_empty() {
            return Err(Error::InvalidInput(
                "At least one audio file is required".to_string(),
            ));
        }

        let snapshot = {
            let mut jobs = self.jobs.write().await;
            let job = jobs
                .get_mut(&job_id)
                .ok_or_else(|| Error::NotFound(format!("Export job not found: {}", job_id)))?;
            if job.state != ExportState::AwaitingUpload {
                return Err(Error::Conflict(format!(
                    "Export job {} is not awaiting upload (state: {})",
                    job_id,
                    job.state.as_str()
                )));
            }
            job.stem_files = files;
            job.transition_to(ExportState::Processing)?;
            job.clone()
        };

        let token = self
            .cancel_tokens
            .read()
            .await
            .get(&job_id)
            .cloned()
            .unwrap_or_default();

        let tracker = self.clone();
        tokio::spawn(async move {
            tracing::info!(job_id = %job_id, "Export processing task started");
            if let Err(e) = tracker.process(snapshot_for_task(&tracker, job_id).await, token).await {
                tracing::error!(job_id = %job_id, error = %e, "Export processing task failed");
            }
        });

        Ok(snapshot)
    }

    /// At-most-one download: remove a completed job and return its artifact.
    ///
    /// Non-completed and unknown jobs both report not-found; the client is
    /// expected to keep polling status instead.
    pub async fn take_completed(&self, job_id: Uuid) -> Result<(ExportJob, PathBuf)> {
        let mut jobs = self.jobs.write().await;
        let completed = jobs
            .get(&job_id)
            .map(|job| job.state == ExportState::Completed)
            .unwrap_or(false);
        if !completed {
            return Err(Error::NotFound(format!(
                "No completed export job: {}",
                job_id
            )));
        }

        let job = jobs
            .remove(&job_id)
            .ok_or_else(|| Error::NotFound(format!("No completed export job: {}", job_id)))?;
        drop(jobs);
        self.cancel_tokens.write().await.remove(&job_id);

        let artifact = job
            .artifact_path
            .clone()
            .ok_or_else(|| Error::Internal(format!("Completed job {} has no artifact", job_id)))?;

        tracing::info!(job_id = %job_id, artifact = %artifact.display(), "Export artifact taken");
        Ok((job, artifact))
    }

    /// Drop terminal or idle jobs older than `ttl_secs`; in-flight
    /// `Processing` jobs are exempt. Returns the number evicted.
    pub async fn evict_stale(&self, ttl_secs: u64) -> usize {
        let cutoff = chrono::Utc::now() - chrono::Duration::seconds(ttl_secs as i64);

        let stale: Vec<Uuid> = {
            let jobs = self.jobs.read().await;
            jobs.values()
                .filter(|j| j.state != ExportState::Processing && j.updated_at < cutoff)
                .map(|j| j.job_id)
                .collect()
        };

        let mut evicted = 0;
        for job_id in stale {
            self.jobs.write().await.remove(&job_id);
            if let Some(token) = self.cancel_tokens.write().await.remove(&job_id) {
                token.cancel();
            }
            self.store.purge_export(job_id).await;
            evicted += 1;
            tracing::info!(job_id = %job_id, "Evicted stale export job");
        }
        evicted
    }

    /// Conversion pipeline: convert each stem, archive multi-stem sets,
    /// delete intermediates, and record the terminal state.
    async fn process(&self, job: Option<ExportJob>, token: CancellationToken) -> Result<()> {
        let job = match job {
            Some(job) => job,
            None => return Ok(()), // evicted before the task started
        };
        let job_id = job.job_id;

        match self.run_pipeline(&job, &token).await {
            Ok(artifact) => {
                let mut jobs = self.jobs.write().await;
                if let Some(entry) = jobs.get_mut(&job_id) {
                    entry.complete(artifact)?;
                    tracing::info!(job_id = %job_id, "Export job completed");
                }
                Ok(())
            }
            Err(e) => {
                let message = e.to_string();
                {
                    let mut jobs = self.jobs.write().await;
                    if let Some(entry) = jobs.get_mut(&job_id) {
                        entry.fail(message.clone())?;
                    }
                }
                // Best-effort cleanup of whatever the pipeline left behind
                self.store.purge_export(job_id).await;
                tracing::warn!(job_id = %job_id, error = %message, "Export job failed");
                Ok(())
            }
        }
    }

    /// Convert stems and produce the final artifact path
    async fn run_pipeline(&self, job: &ExportJob, token: &CancellationToken) -> Result<PathBuf> {
        let dir = self.store.export_dir(job.job_id);
        let spec = ConversionSpec {
            sample_rate: job.sample_rate,
            bit_depth: job.bit_depth,
        };
        let stem_count = job.stem_files.len();

        let mut converted: Vec<PathBuf> = Vec::with_capacity(stem_count);
        for (i, stem) in job.stem_files.iter().enumerate() {
            if token.is_cancelled() {
                return Err(Error::Internal("Export cancelled".to_string()));
            }

            let output = dir.join(format!("converted_{:03}.wav", i));
            let stem = stem.clone();
            let out_clone = output.clone();
            tokio::task::spawn_blocking(move || convert_wav(&stem, &out_clone, spec))
                .await
                .map_err(|e| Error::Internal(format!("Conversion task failed: {}", e)))??;
            converted.push(output);

            // Conversion accounts for the first 90%, archiving the rest
            let progress = (((i + 1) * 90) / stem_count) as u8;
            self.set_progress(job.job_id, progress).await;
        }

        let artifact = if converted.len() == 1 {
            let artifact = dir.join(format!("{}_export.wav", job.project_id));
            tokio::fs::rename(&converted[0], &artifact).await?;
            artifact
        } else {
            let artifact = dir.join(format!("{}_stems.zip", job.project_id));
            let sources = converted.clone();
            let artifact_clone = artifact.clone();
            tokio::task::spawn_blocking(move || zip_stems(&sources, &artifact_clone))
                .await
                .map_err(|e| Error::Internal(format!("Archive task failed: {}", e)))??;
            for path in &converted {
                tokio::fs::remove_file(path).await.ok();
            }
            artifact
        };

        // Raw uploads are no longer needed
        for stem in &job.stem_files {
            tokio::fs::remove_file(stem).await.ok();
        }

        self.set_progress(job.job_id, 100).await;
        Ok(artifact)
    }

    async fn set_progress(&self, job_id: Uuid, progress: u8) {
        let mut jobs = self.jobs.write().await;
        if let Some(job) = jobs.get_mut(&job_id) {
            job.set_progress(progress);
        }
    }
}

async fn snapshot_for_task(tracker: &ExportTracker, job_id: Uuid) -> Option<ExportJob> {
    tracker.jobs.read().await.get(&job_id).cloned()
}

/// Bundle converted stems into one deflated zip archive
fn zip_stems(sources: &[PathBuf], archive: &PathBuf) -> Result<()> {
    let file = std::fs::File::create(archive)?;
    let mut writer = ZipWriter::new(file);
    let options = SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .compression_level(Some(6));

    for (i, source) in sources.iter().enumerate() {
        let name = source
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.to_string())
            .unwrap_or_else(|| format!("stem_{:03}.wav", i));

        writer
            .start_file(&name, options)
            .map_err(|e| Error::Internal(format!("Failed to add {} to archive: {}", name, e)))?;
        let data = std::fs::read(source)?;
        use std::io::Write;
        writer
            .write_all(&data)
            .map_err(|e| Error::Internal(format!("Failed to write {} to archive: {}", name, e)))?;
    }

    writer
        .finish()
        .map_err(|e| Error::Internal(format!("Failed to finalize archive: {}", e)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ExportFormat;
    use hound::{SampleFormat, WavSpec, WavWriter};
    use std::path::Path;
    use std::time::Duration;

    fn params() -> ExportParams {
        ExportParams {
            project_id: "proj-1".to_string(),
            format: ExportFormat::Wav,
            sample_rate: 44_100,
            bit_depth: 16,
        }
    }

    fn write_test_wav(path: &Path) {
        let spec = WavSpec {
            channels: 1,
            sample_rate: 44_100,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(path, spec).unwrap();
        for i in 0..4_410u32 {
            let t = i as f32 / 44_100.0;
            let v = (t * 440.0 * 2.0 * std::f32::consts::PI).sin();
            writer.write_sample((v * 16_000.0) as i16).unwrap();
        }
        writer.finalize().unwrap();
    }

    async fn tracker() -> (ExportTracker, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = ChunkStore::new(dir.path());
        store.init().await.unwrap();
        (ExportTracker::new(store), dir)
    }

    async fn wait_terminal(tracker: &ExportTracker, job_id: Uuid) -> ExportJob {
        for _ in 0..100 {
            let job = tracker.job_status(job_id).await.unwrap();
            if job.is_terminal() {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("job {} did not reach a terminal state", job_id);
    }

    #[tokio::test]
    async fn single_stem_produces_wav_artifact() {
        let (tracker, _dir) = tracker().await;
        let job = tracker.create_job(params()).await.unwrap();
        assert_eq!(job.state, ExportState::AwaitingUpload);

        let stem = tracker.staging_dir(job.job_id).join("stem_000.wav");
        write_test_wav(&stem);

        let started = tracker
            .attach_uploads(job.job_id, vec![stem.clone()])
            .await
            .unwrap();
        assert_eq!(started.state, ExportState::Processing);

        let done = wait_terminal(&tracker, job.job_id).await;
        assert_eq!(done.state, ExportState::Completed);
        assert_eq!(done.progress, 100);

        let artifact = done.artifact_path.clone().unwrap();
        assert!(artifact.extension().is_some_and(|e| e == "wav"));
        assert!(artifact.exists());
        // Raw upload was deleted
        assert!(!stem.exists());
    }

    #[tokio::test]
    async fn multi_stem_produces_zip_artifact() {
        let (tracker, _dir) = tracker().await;
        let job = tracker.create_job(params()).await.unwrap();

        let dir = tracker.staging_dir(job.job_id);
        let stems: Vec<PathBuf> = (0..3)
            .map(|i| {
                let path = dir.join(format!("stem_{:03}.wav", i));
                write_test_wav(&path);
                path
            })
            .collect();

        tracker.attach_uploads(job.job_id, stems).await.unwrap();
        let done = wait_terminal(&tracker, job.job_id).await;
        assert_eq!(done.state, ExportState::Completed);

        let artifact = done.artifact_path.unwrap();
        assert!(artifact.extension().is_some_and(|e| e == "zip"));
        assert!(artifact.exists());
    }

    #[tokio::test]
    async fn corrupt_stem_fails_job_with_error_detail() {
        let (tracker, _dir) = tracker().await;
        let job = tracker.create_job(params()).await.unwrap();

        let stem = tracker.staging_dir(job.job_id).join("bad.wav");
        std::fs::write(&stem, b"not audio").unwrap();

        tracker.attach_uploads(job.job_id, vec![stem]).await.unwrap();
        let done = wait_terminal(&tracker, job.job_id).await;
        assert_eq!(done.state, ExportState::Failed);
        assert!(done.error.as_deref().unwrap_or("").contains("decode"));

        // Failed jobs stay pollable and are not downloadable
        assert!(tracker.job_status(job.job_id).await.is_ok());
        assert!(tracker.take_completed(job.job_id).await.is_err());
    }

    #[tokio::test]
    async fn download_is_at_most_once() {
        let (tracker, _dir) = tracker().await;
        let job = tracker.create_job(params()).await.unwrap();

        let stem = tracker.staging_dir(job.job_id).join("stem.wav");
        write_test_wav(&stem);
        tracker.attach_uploads(job.job_id, vec![stem]).await.unwrap();
        wait_terminal(&tracker, job.job_id).await;

        let (taken, artifact) = tracker.take_completed(job.job_id).await.unwrap();
        assert_eq!(taken.state, ExportState::Completed);
        assert!(artifact.exists());

        // Entry is gone: second take and status both fail
        assert!(tracker.take_completed(job.job_id).await.is_err());
        assert!(tracker.job_status(job.job_id).await.is_err());
    }

    #[tokio::test]
    async fn attach_requires_awaiting_upload() {
        let (tracker, _dir) = tracker().await;
        let job = tracker.create_job(params()).await.unwrap();

        let stem = tracker.staging_dir(job.job_id).join("stem.wav");
        write_test_wav(&stem);
        tracker
            .attach_uploads(job.job_id, vec![stem.clone()])
            .await
            .unwrap();

        // Second attach races the pipeline but is never AwaitingUpload again
        let err = tracker.attach_uploads(job.job_id, vec![stem]).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn attach_rejects_empty_file_set() {
        let (tracker, _dir) = tracker().await;
        let job = tracker.create_job(params()).await.unwrap();
        let err = tracker.attach_uploads(job.job_id, Vec::new()).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn evict_stale_skips_processing_jobs() {
        let (tracker, _dir) = tracker().await;
        let processing = tracker.create_job(params()).await.unwrap();
        let awaiting = tracker.create_job(params()).await.unwrap();

        // Hold one job mid-pipeline
        {
            let mut jobs = tracker.jobs.write().await;
            jobs.get_mut(&processing.job_id)
                .unwrap()
                .transition_to(ExportState::Processing)
                .unwrap();
        }

        // Zero TTL sweeps the awaiting job but not the in-flight one
        assert_eq!(tracker.evict_stale(0).await, 1);
        assert!(tracker.job_status(awaiting.job_id).await.is_err());
        let survivor = tracker.job_status(processing.job_id).await.unwrap();
        assert_eq!(survivor.state, ExportState::Processing);

        // Once terminal, the job becomes sweepable
        {
            let mut jobs = tracker.jobs.write().await;
            jobs.get_mut(&processing.job_id)
                .unwrap()
                .fail("stem decode failed".to_string())
                .unwrap();
        }
        assert_eq!(tracker.evict_stale(0).await, 1);
        assert!(tracker.job_status(processing.job_id).await.is_err());
    }
}
