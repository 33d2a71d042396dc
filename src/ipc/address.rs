//! Channel addresses
//!
//! An address is a `(protocol, location)` pair, written `protocol://location`.
//! Logical endpoint names such as `gateway.addonManager` are turned into
//! addresses by [`IpcConfig::address`].

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Transport protocol of a channel address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Unix domain socket backed by a file path
    #[default]
    Ipc,
    /// Named endpoint inside the current process
    Inproc,
}

impl Protocol {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ipc => "ipc",
            Self::Inproc => "inproc",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "ipc" => Ok(Self::Ipc),
            "inproc" => Ok(Self::Inproc),
            other => Err(Error::Config(format!("unsupported IPC protocol '{other}'"))),
        }
    }
}

/// Fully resolved channel address
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelAddress {
    protocol: Protocol,
    location: String,
}

impl ChannelAddress {
    /// Address of a Unix socket at `path`
    #[must_use]
    pub fn ipc(path: impl AsRef<Path>) -> Self {
        Self {
            protocol: Protocol::Ipc,
            location: path.as_ref().to_string_lossy().into_owned(),
        }
    }

    /// Address of an in-process endpoint called `name`
    #[must_use]
    pub fn inproc(name: impl Into<String>) -> Self {
        Self {
            protocol: Protocol::Inproc,
            location: name.into(),
        }
    }

    #[must_use]
    pub const fn protocol(&self) -> Protocol {
        self.protocol
    }

    #[must_use]
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Filesystem path of an `ipc` address
    #[must_use]
    pub fn socket_path(&self) -> Option<&Path> {
        match self.protocol {
            Protocol::Ipc => Some(Path::new(&self.location)),
            Protocol::Inproc => None,
        }
    }
}

impl fmt::Display for ChannelAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.protocol, self.location)
    }
}

impl FromStr for ChannelAddress {
    type Err = Error;

    /// Parse `protocol://location`
    fn from_str(s: &str) -> Result<Self> {
        let (protocol, location) = s
            .split_once("://")
            .ok_or_else(|| Error::Config(format!("address '{s}' has no protocol")))?;
        if location.is_empty() {
            return Err(Error::Config(format!("address '{s}' has no location")));
        }
        Ok(Self {
            protocol: protocol.parse()?,
            location: location.to_string(),
        })
    }
}

/// Transport settings shared by every channel of a plugin process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpcConfig {
    /// Protocol used for all endpoints
    pub protocol: Protocol,
    /// Directory holding `ipc` socket files
    pub socket_dir: PathBuf,
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            protocol: Protocol::Ipc,
            socket_dir: std::env::temp_dir(),
        }
    }
}

impl IpcConfig {
    /// In-process transport, used for embedding and tests
    #[must_use]
    pub fn inproc() -> Self {
        Self {
            protocol: Protocol::Inproc,
            ..Self::default()
        }
    }

    /// Resolve a logical endpoint name to an address
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `name` is not a plain file name, since it
    /// could then resolve outside `socket_dir`
    pub fn address(&self, name: &str) -> Result<ChannelAddress> {
        check_endpoint_name(name)?;
        Ok(match self.protocol {
            Protocol::Ipc => ChannelAddress::ipc(self.socket_dir.join(name)),
            Protocol::Inproc => ChannelAddress::inproc(name),
        })
    }
}

fn check_endpoint_name(name: &str) -> Result<()> {
    let plain = !matches!(name, "" | "." | "..")
        && !name.contains(['/', '\\', '\0'])
        && !Path::new(name).is_absolute();
    if plain {
        Ok(())
    } else {
        Err(Error::Config(format!("endpoint name '{name}' is not a plain file name")))
    }
}
