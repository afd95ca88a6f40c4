//! Domain models for stemway-media

pub mod export_job;
pub mod upload_session;

pub use export_job::{ExportFormat, ExportJob, ExportParams, ExportState};
pub use upload_session::{UploadSession, UploadState};
