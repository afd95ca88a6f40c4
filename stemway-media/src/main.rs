//! stemway-media - Media Transfer Microservice
//!
//! Handles the platform's large-file plumbing: chunked uploads of project
//! renders and asynchronous export jobs that convert raw renders into
//! downloadable artifacts. HTTP REST with poll-based progress.

use anyhow::Result;
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use stemway_media::{build_router, AppState, ServiceConfig};

/// Media transfer service for the Stemway platform
#[derive(Debug, Parser)]
#[command(name = "stemway-media", version)]
struct Args {
    /// Storage root folder (overrides STEMWAY_ROOT and TOML config)
    #[arg(long)]
    root_folder: Option<String>,

    /// HTTP listen port (overrides STEMWAY_PORT and TOML config)
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting stemway-media (Media Transfer) microservice");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = ServiceConfig::resolve(args.root_folder.as_deref(), args.port)?;
    info!("Storage root: {}", config.root_folder.display());
    info!(
        "Limits: max_upload_bytes={} default_chunk_bytes={}",
        config.max_upload_bytes, config.default_chunk_bytes
    );

    let port = config.port;
    let state = AppState::new(config).await?;

    // TTL eviction sweep for stale sessions and terminal jobs
    stemway_media::services::reaper::spawn(state.clone());

    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await?;
    info!("Listening on http://127.0.0.1:{}", port);
    info!("Health check: http://127.0.0.1:{}/health", port);

    axum::serve(listener, app).await?;

    Ok(())
}
