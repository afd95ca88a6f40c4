//! stemway-media library interface
//!
//! Exposes the application state and router for the binary and for
//! integration testing.

pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod services;

pub use crate::config::ServiceConfig;
pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;

use crate::services::{ChunkStore, ExportTracker, UploadManager};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Resolved runtime configuration
    pub config: Arc<ServiceConfig>,
    /// Chunked upload session manager
    pub uploads: UploadManager,
    /// Export job tracker
    pub exports: ExportTracker,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last error for diagnostic purposes
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    /// Build the state and create the storage directory tree
    pub async fn new(config: ServiceConfig) -> stemway_common::Result<Self> {
        let store = ChunkStore::new(config.root_folder.clone());
        store.init().await?;

        Ok(Self {
            uploads: UploadManager::new(
                store.clone(),
                config.max_upload_bytes,
                config.default_chunk_bytes,
            ),
            exports: ExportTracker::new(store),
            config: Arc::new(config),
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        })
    }

    /// Record a diagnostic error surfaced by /health
    pub async fn record_error(&self, message: impl Into<String>) {
        *self.last_error.write().await = Some(message.into());
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::upload_routes())
        .merge(api::export_routes())
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
