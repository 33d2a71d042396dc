//! Configuration for the add-on process
//!
//! Priority is environment > TOML file > defaults.

pub mod file;

use std::path::PathBuf;
use std::time::Duration;

use crate::ipc::frame::DEFAULT_MAX_FRAME_BYTES;
use crate::ipc::{ChannelAddress, ChannelOptions, GATEWAY_ADDRESS, IpcConfig, Protocol};
use crate::{Error, Result};

use self::file::AddonConfigFile;

/// Add-on process configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddonConfig {
    /// Transport used for every channel
    pub ipc: IpcConfig,

    /// Logical name of the gateway's registration endpoint
    pub gateway_name: String,

    /// Fail duplicate bind/connect calls instead of logging them
    pub strict_addresses: bool,

    /// Keep the rendezvous channel open after a successful handshake
    pub keep_rendezvous_open: bool,

    /// Bound on the registration wait (unbounded when `None`)
    pub registration_timeout: Option<Duration>,

    /// Largest accepted frame payload
    pub max_frame_bytes: usize,
}

impl Default for AddonConfig {
    fn default() -> Self {
        Self {
            ipc: IpcConfig::default(),
            gateway_name: GATEWAY_ADDRESS.to_string(),
            strict_addresses: false,
            keep_rendezvous_open: false,
            registration_timeout: None,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

fn parse_flag(value: &str) -> bool {
    value == "true" || value == "1"
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{key} must be a non-negative integer, got '{value}'")))
}

impl AddonConfig {
    /// Load configuration from the process environment and config file
    ///
    /// # Errors
    ///
    /// Returns error if a setting has an invalid value
    pub fn load() -> Result<Self> {
        Self::from_sources(&file::load_config_file(), |key| std::env::var(key).ok())
    }

    /// Build configuration from a parsed file and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if a setting has an invalid value
    pub fn from_sources<F>(fc: &AddonConfigFile, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let protocol = match env("GATEWAY_ADDON_IPC_PROTOCOL").or_else(|| fc.ipc.protocol.clone()) {
            Some(value) => value.parse::<Protocol>()?,
            None => defaults.ipc.protocol,
        };

        let socket_dir = env("GATEWAY_ADDON_SOCKET_DIR")
            .or_else(|| fc.ipc.socket_dir.clone())
            .map_or(defaults.ipc.socket_dir, PathBuf::from);

        let gateway_name = env("GATEWAY_ADDON_GATEWAY_ADDRESS")
            .or_else(|| fc.ipc.gateway_address.clone())
            .unwrap_or(defaults.gateway_name);

        let strict_addresses = env("GATEWAY_ADDON_STRICT_ADDRESSES")
            .map(|v| parse_flag(&v))
            .or(fc.ipc.strict_addresses)
            .unwrap_or(defaults.strict_addresses);

        let keep_rendezvous_open = env("GATEWAY_ADDON_KEEP_RENDEZVOUS")
            .map(|v| parse_flag(&v))
            .or(fc.registration.keep_rendezvous_open)
            .unwrap_or(defaults.keep_rendezvous_open);

        let timeout_secs = match env("GATEWAY_ADDON_REGISTRATION_TIMEOUT_SECS") {
            Some(value) => Some(parse_number::<u64>("GATEWAY_ADDON_REGISTRATION_TIMEOUT_SECS", &value)?),
            None => fc.registration.timeout_secs,
        };

        let max_frame_bytes = match env("GATEWAY_ADDON_MAX_FRAME_BYTES") {
            Some(value) => parse_number("GATEWAY_ADDON_MAX_FRAME_BYTES", &value)?,
            None => fc.ipc.max_frame_bytes.unwrap_or(defaults.max_frame_bytes),
        };

        if max_frame_bytes == 0 {
            return Err(Error::Config("max frame size must be positive".to_string()));
        }

        let ipc = IpcConfig {
            protocol,
            socket_dir,
        };
        ipc.address(&gateway_name)?;

        Ok(Self {
            ipc,
            gateway_name,
            strict_addresses,
            keep_rendezvous_open,
            // Zero means wait forever
            registration_timeout: timeout_secs.filter(|s| *s > 0).map(Duration::from_secs),
            max_frame_bytes,
        })
    }

    /// Configuration for an in-process gateway, used by tests and embedders
    #[must_use]
    pub fn inproc() -> Self {
        Self {
            ipc: IpcConfig::inproc(),
            ..Self::default()
        }
    }

    /// Address of the gateway's registration endpoint
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the gateway name is not a plain file name
    pub fn gateway_address(&self) -> Result<ChannelAddress> {
        self.ipc.address(&self.gateway_name)
    }

    /// Channel options using the process-wide registries
    #[must_use]
    pub fn channel_options(&self) -> ChannelOptions {
        ChannelOptions {
            max_frame_bytes: self.max_frame_bytes,
            strict: self.strict_addresses,
            ..ChannelOptions::default()
        }
    }
}
