//! Configuration resolution for stemway-media
//!
//! Merges the service TOML config with `STEMWAY_*` environment overrides and
//! CLI arguments into a fully-defaulted [`ServiceConfig`].

use std::path::PathBuf;
use stemway_common::config::{load_toml_config, resolve_root_folder};
use stemway_common::{Error, Result};

/// Default HTTP listen port for the media transfer service
pub const DEFAULT_PORT: u16 = 5741;

/// Maximum declared size of a chunked upload (5 GiB)
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 5 * 1024 * 1024 * 1024;

/// Default chunk size when the client does not specify one (8 MiB)
pub const DEFAULT_CHUNK_BYTES: u64 = 8 * 1024 * 1024;

/// Largest chunk size a client may request at init (32 MiB). The chunk
/// endpoint's body limit is derived from this, so a session can never be
/// created with chunks too large to upload.
pub const MAX_CHUNK_BYTES: u64 = 32 * 1024 * 1024;

/// Default idle TTL for sessions and terminal jobs (24 h)
pub const DEFAULT_SESSION_TTL_SECS: u64 = 24 * 60 * 60;

/// Default eviction sweep interval (5 min)
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 300;

/// Fully-resolved runtime configuration
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Storage root for chunks, assembled files, and export artifacts
    pub root_folder: PathBuf,
    /// HTTP listen port
    pub port: u16,
    /// Maximum declared size of a single upload
    pub max_upload_bytes: u64,
    /// Default chunk size when the init request omits one
    pub default_chunk_bytes: u64,
    /// Idle entries older than this are evicted
    pub session_ttl_secs: u64,
    /// Interval between eviction sweeps
    pub sweep_interval_secs: u64,
}

impl ServiceConfig {
    /// Resolve configuration from TOML, environment, and CLI arguments.
    ///
    /// Priority per value: CLI -> `STEMWAY_*` env -> TOML -> compiled default.
    pub fn resolve(cli_root: Option<&str>, cli_port: Option<u16>) -> Result<Self> {
        let toml = load_toml_config("stemway-media")?;

        let root_folder = resolve_root_folder(cli_root, "STEMWAY_ROOT", &toml);

        let port = match cli_port {
            Some(p) => p,
            None => match env_parse::<u16>("STEMWAY_PORT")? {
                Some(p) => p,
                None => toml.port.unwrap_or(DEFAULT_PORT),
            },
        };

        let max_upload_bytes = match env_parse::<u64>("STEMWAY_MAX_UPLOAD_BYTES")? {
            Some(v) => v,
            None => toml.max_upload_bytes.unwrap_or(DEFAULT_MAX_UPLOAD_BYTES),
        };

        let default_chunk_bytes = toml.default_chunk_bytes.unwrap_or(DEFAULT_CHUNK_BYTES);
        let session_ttl_secs = toml.session_ttl_secs.unwrap_or(DEFAULT_SESSION_TTL_SECS);
        let sweep_interval_secs = toml
            .sweep_interval_secs
            .unwrap_or(DEFAULT_SWEEP_INTERVAL_SECS);

        let config = Self {
            root_folder,
            port,
            max_upload_bytes,
            default_chunk_bytes,
            session_ttl_secs,
            sweep_interval_secs,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject nonsensical limit combinations before the service starts
    pub fn validate(&self) -> Result<()> {
        if self.max_upload_bytes == 0 {
            return Err(Error::Config("max_upload_bytes cannot be zero".to_string()));
        }
        if self.default_chunk_bytes == 0 {
            return Err(Error::Config(
                "default_chunk_bytes cannot be zero".to_string(),
            ));
        }
        if self.default_chunk_bytes > self.max_upload_bytes {
            return Err(Error::Config(format!(
                "default_chunk_bytes ({}) exceeds max_upload_bytes ({})",
                self.default_chunk_bytes, self.max_upload_bytes
            )));
        }
        if self.default_chunk_bytes > MAX_CHUNK_BYTES {
            return Err(Error::Config(format!(
                "default_chunk_bytes ({}) exceeds maximum chunk size ({})",
                self.default_chunk_bytes, MAX_CHUNK_BYTES
            )));
        }
        Ok(())
    }
}

/// Parse an optional environment variable, erroring on malformed values
fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| Error::Config(format!("{} is not a valid value: {}", name, raw))),
        _ => Ok(None),
    }
}
