//! TOML configuration file loading
//!
//! Supports `~/.config/gateway-addon/config.toml` as a persistent config
//! source. All fields are optional. The file is a partial overlay on top of
//! defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::Result;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct AddonConfigFile {
    /// Transport configuration
    #[serde(default)]
    pub ipc: IpcFileConfig,

    /// Registration handshake configuration
    #[serde(default)]
    pub registration: RegistrationFileConfig,
}

/// Transport configuration
#[derive(Debug, Default, Deserialize)]
pub struct IpcFileConfig {
    /// "ipc" or "inproc"
    pub protocol: Option<String>,

    /// Directory holding socket files
    pub socket_dir: Option<String>,

    /// Logical name of the gateway's registration endpoint
    pub gateway_address: Option<String>,

    /// Fail duplicate bind/connect calls instead of logging them
    pub strict_addresses: Option<bool>,

    /// Largest accepted frame payload in bytes
    pub max_frame_bytes: Option<usize>,
}

/// Registration handshake configuration
#[derive(Debug, Default, Deserialize)]
pub struct RegistrationFileConfig {
    /// Keep the rendezvous channel open after registration
    pub keep_rendezvous_open: Option<bool>,

    /// Give up waiting for the gateway after this many seconds
    pub timeout_secs: Option<u64>,
}

/// Parse config file contents
///
/// # Errors
///
/// Returns error if the contents are not valid TOML for this schema
pub fn parse_config_file(content: &str) -> Result<AddonConfigFile> {
    Ok(toml::from_str(content)?)
}

/// Load the TOML config file from the standard path
///
/// Returns `AddonConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> AddonConfigFile {
    config_file_path().map_or_else(AddonConfigFile::default, |path| load_config_file_from(&path))
}

/// Load a TOML config file from `path`, falling back to defaults
pub fn load_config_file_from(path: &Path) -> AddonConfigFile {
    if !path.exists() {
        return AddonConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match parse_config_file(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                AddonConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            AddonConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/gateway-addon/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("gateway-addon").join("config.toml"))
}
