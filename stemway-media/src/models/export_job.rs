//! Export job state machine
//!
//! An export job tracks an asynchronous render/conversion task:
//! AWAITING_UPLOAD -> PROCESSING -> {COMPLETED | FAILED}. Terminal states
//! never transition; a job can only reach COMPLETED through PROCESSING.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use stemway_common::{Error, Result};
use uuid::Uuid;

/// Supported export artifact formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    /// PCM WAV, the studio's render interchange format
    Wav,
}

impl ExportFormat {
    /// Parse a client-supplied format string
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "wav" => Ok(ExportFormat::Wav),
            other => Err(Error::InvalidInput(format!(
                "Unsupported export format: {}",
                other
            ))),
        }
    }
}

/// Export job lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportState {
    /// Job created, waiting for raw renders
    AwaitingUpload,
    /// Conversion pipeline running
    Processing,
    /// Artifact ready for download
    Completed,
    /// Conversion failed, error retained for inspection
    Failed,
}

impl ExportState {
    /// Whether `self -> next` is a legal transition
    pub fn can_transition_to(self, next: ExportState) -> bool {
        use ExportState::*;
        matches!(
            (self, next),
            (AwaitingUpload, Processing) | (Processing, Completed) | (Processing, Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExportState::AwaitingUpload => "awaiting_upload",
            ExportState::Processing => "processing",
            ExportState::Completed => "completed",
            ExportState::Failed => "failed",
        }
    }
}

/// Validated export job parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportParams {
    /// Project the renders belong to
    pub project_id: String,
    /// Target artifact format
    pub format: ExportFormat,
    /// Target sample rate in Hz
    pub sample_rate: u32,
    /// Target bit depth (16, 24, or 32-bit float)
    pub bit_depth: u16,
}

impl ExportParams {
    pub fn validate(&self) -> Result<()> {
        if self.project_id.trim().is_empty() {
            return Err(Error::InvalidInput("project_id cannot be empty".to_string()));
        }
        if !(8_000..=192_000).contains(&self.sample_rate) {
            return Err(Error::InvalidInput(format!(
                "sample_rate {} outside supported range 8000-192000",
                self.sample_rate
            )));
        }
        if !matches!(self.bit_depth, 16 | 24 | 32) {
            return Err(Error::InvalidInput(format!(
                "bit_depth {} not supported (expected 16, 24, or 32)",
                self.bit_depth
            )));
        }
        Ok(())
    }
}

/// Export job (in-memory state)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportJob {
    /// Unique job identifier
    pub job_id: Uuid,

    /// Project the renders belong to
    pub project_id: String,

    /// Current lifecycle state
    pub state: ExportState,

    /// Completion percentage (0-100)
    pub progress: u8,

    /// Target artifact format
    pub format: ExportFormat,

    /// Target sample rate in Hz
    pub sample_rate: u32,

    /// Target bit depth
    pub bit_depth: u16,

    /// Uploaded raw render paths, in upload order
    pub stem_files: Vec<PathBuf>,

    /// Final artifact path, set on completion
    pub artifact_path: Option<PathBuf>,

    /// Failure detail, set on failure
    pub error: Option<String>,

    /// Job creation time
    pub created_at: DateTime<Utc>,

    /// Last state or progress change
    pub updated_at: DateTime<Utc>,
}

impl ExportJob {
    /// Create a new job in `AwaitingUpload` state
    pub fn new(params: ExportParams) -> Self {
        let now = Utc::now();
        Self {
            job_id: Uuid::new_v4(),
            project_id: params.project_id,
            state: ExportState::AwaitingUpload,
            progress: 0,
            format: params.format,
            sample_rate: params.sample_rate,
            bit_depth: params.bit_depth,
            stem_files: Vec::new(),
            artifact_path: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Transition to a new state, rejecting illegal moves
    pub fn transition_to(&mut self, next: ExportState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                from: self.state.as_str().to_string(),
                to: next.as_str().to_string(),
            });
        }
        self.state = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Update completion percentage (clamped to 100)
    pub fn set_progress(&mut self, progress: u8) {
        self.progress = progress.min(100);
        self.updated_at = Utc::now();
    }

    /// Mark the job completed with its artifact
    pub fn complete(&mut self, artifact: PathBuf) -> Result<()> {
        self.transition_to(ExportState::Completed)?;
        self.artifact_path = Some(artifact);
        self.progress = 100;
        Ok(())
    }

    /// Mark the job failed, retaining the error message
    pub fn fail(&mut self, message: String) -> Result<()> {
        self.transition_to(ExportState::Failed)?;
        self.error = Some(message);
        Ok(())
    }

    /// Whether the job is finished (no further transitions)
    pub fn is_terminal(&self) -> bool {
        matches!(self.state, ExportState::Completed | ExportState::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ExportParams {
        ExportParams {
            project_id: "proj-1".to_string(),
            format: ExportFormat::Wav,
            sample_rate: 48_000,
            bit_depth: 24,
        }
    }

    #[test]
    fn new_job_awaits_upload() {
        let job = ExportJob::new(params());
        assert_eq!(job.state, ExportState::AwaitingUpload);
        assert_eq!(job.progress, 0);
        assert!(job.artifact_path.is_none());
    }

    #[test]
    fn completed_requires_processing() {
        let mut job = ExportJob::new(params());
        // Direct awaiting_upload -> completed is illegal
        assert!(job.complete(PathBuf::from("/tmp/out.wav")).is_err());
        assert_eq!(job.state, ExportState::AwaitingUpload);

        job.transition_to(ExportState::Processing).unwrap();
        assert!(job.complete(PathBuf::from("/tmp/out.wav")).is_ok());
        assert_eq!(job.state, ExportState::Completed);
        assert_eq!(job.progress, 100);
    }

    #[test]
    fn fail_retains_error_detail() {
        let mut job = ExportJob::new(params());
        job.transition_to(ExportState::Processing).unwrap();
        job.fail("WAV decode failed".to_string()).unwrap();
        assert_eq!(job.state, ExportState::Failed);
        assert_eq!(job.error.as_deref(), Some("WAV decode failed"));
        assert!(job.is_terminal());
    }

    #[test]
    fn terminal_states_reject_transitions() {
        let mut job = ExportJob::new(params());
        job.transition_to(ExportState::Processing).unwrap();
        job.fail("boom".to_string()).unwrap();
        assert!(job.transition_to(ExportState::Processing).is_err());
        assert!(job.transition_to(ExportState::Completed).is_err());
    }

    #[test]
    fn params_validation() {
        assert!(params().validate().is_ok());

        let mut p = params();
        p.project_id = "  ".to_string();
        assert!(p.validate().is_err());

        let mut p = params();
        p.sample_rate = 1_000;
        assert!(p.validate().is_err());

        let mut p = params();
        p.bit_depth = 12;
        assert!(p.validate().is_err());
    }

    #[test]
    fn format_parsing() {
        assert_eq!(ExportFormat::parse("wav").unwrap(), ExportFormat::Wav);
        assert_eq!(ExportFormat::parse(" WAV ").unwrap(), ExportFormat::Wav);
        assert!(ExportFormat::parse("mp3").is_err());
    }
}
