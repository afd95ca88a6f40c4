//! Service layer for stemway-media

pub mod chunk_store;
pub mod export_tracker;
pub mod reaper;
pub mod upload_manager;
pub mod wav;

pub use chunk_store::ChunkStore;
pub use export_tracker::ExportTracker;
pub use upload_manager::UploadManager;
