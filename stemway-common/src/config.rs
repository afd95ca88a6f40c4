//! Configuration loading and storage root resolution
//!
//! Storage root resolution follows the priority order used by every Stemway
//! service:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. OS-dependent compiled default (fallback)

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Service configuration file model (`~/.config/stemway/<service>.toml`)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Storage root folder for uploads, assembled files, and export artifacts
    pub root_folder: Option<String>,

    /// HTTP listen port
    pub port: Option<u16>,

    /// Maximum declared size of a single chunked upload, in bytes
    pub max_upload_bytes: Option<u64>,

    /// Default chunk size when the client does not specify one, in bytes
    pub default_chunk_bytes: Option<u64>,

    /// Idle sessions/jobs older than this are evicted, in seconds
    pub session_ttl_secs: Option<u64>,

    /// Interval between eviction sweeps, in seconds
    pub sweep_interval_secs: Option<u64>,
}

/// Resolve the storage root folder for a service.
///
/// Priority: CLI argument, then `env_var_name`, then the `root_folder` key of
/// the service TOML config, then the OS default data directory.
pub fn resolve_root_folder(
    cli_arg: Option<&str>,
    env_var_name: &str,
    toml_config: &TomlConfig,
) -> PathBuf {
    if let Some(path) = cli_arg {
        return PathBuf::from(path);
    }

    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = &toml_config.root_folder {
        return PathBuf::from(path);
    }

    default_root_folder()
}

/// Load the TOML config for a service, returning defaults when no file exists.
///
/// Looks for `~/.config/stemway/<service>.toml` (or the platform equivalent).
/// A missing file is not an error; a malformed file is.
pub fn load_toml_config(service: &str) -> Result<TomlConfig> {
    let path = match config_file_path(service) {
        Some(p) => p,
        None => return Ok(TomlConfig::default()),
    };

    if !path.exists() {
        return Ok(TomlConfig::default());
    }

    let content = std::fs::read_to_string(&path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    let config = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;

    tracing::info!(path = %path.display(), "Loaded TOML config");
    Ok(config)
}

/// Write a TOML config file (best-effort atomicity via temp file + rename)
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tmp = path.with_extension("toml.tmp");
    std::fs::write(&tmp, content)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Config file path for the platform (`None` when no config dir is known)
pub fn config_file_path(service: &str) -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("stemway").join(format!("{}.toml", service)))
}

/// OS-dependent default storage root
pub fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("stemway"))
        .unwrap_or_else(|| PathBuf::from("./stemway_data"))
}
