//! Optional TOML configuration file for the standalone binary.
//!
//! Every field is optional; anything missing falls back to the CLI, the
//! environment, or the built-in defaults (in that order of precedence, see
//! `main.rs`).
//!
//! ```toml
//! bind = "127.0.0.1"
//! port = 4059
//! capture_timeout_secs = 10
//! backdrop = "screens/home.png"
//! device_pixel_ratio = 2.0
//! ```

use std::net::IpAddr;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("I/O error reading config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Contents of a config file.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    /// IP address to bind.  Should stay a loopback address.
    pub bind: Option<IpAddr>,
    /// Listener port.
    pub port: Option<u16>,
    /// Screenshot capture timeout in seconds.
    pub capture_timeout_secs: Option<u64>,
    /// Backdrop image served by the headless host.  Relative paths resolve
    /// against the config file's directory.
    pub backdrop: Option<PathBuf>,
    /// Device pixel ratio reported by the headless host.
    pub device_pixel_ratio: Option<f64>,
}

impl FileConfig {
    /// Parses TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }
}

/// Reads and parses the config file at `path`.
///
/// # Errors
///
/// [`ConfigError::Io`] if the file cannot be read, [`ConfigError::Parse`] if
/// it is not valid TOML or contains unknown keys.
pub fn load_config_file(path: &Path) -> Result<FileConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut config = FileConfig::from_toml_str(&text)?;

    if let (Some(backdrop), Some(dir)) = (&config.backdrop, path.parent()) {
        if backdrop.is_relative() {
            config.backdrop = Some(dir.join(backdrop));
        }
    }
    Ok(config)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
