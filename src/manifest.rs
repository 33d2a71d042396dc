//! Add-on manifest format (`manifest.json`)

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// File name of the manifest inside an add-on directory
pub const MANIFEST_FILE: &str = "manifest.json";

/// Manifest describing an add-on package
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddonManifest {
    /// Unique add-on identifier, used as the plugin id (e.g. "zigbee-adapter")
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Semver version string
    pub version: String,
    /// Short description
    #[serde(default)]
    pub description: Option<String>,
    /// Add-on author
    #[serde(default)]
    pub author: Option<String>,
    /// Main thing this add-on provides
    pub primary_type: AddonKind,
    /// User-editable options, opaque to the IPC core
    #[serde(default)]
    pub options: serde_json::Value,
}

/// Add-on category
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AddonKind {
    /// Provides device adapters
    Adapter,
    /// Provides notification outlets
    Notifier,
    /// Provides REST API handlers
    Extension,
}

impl AddonManifest {
    /// Load `manifest.json` from an add-on directory
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read, is not valid JSON, or has an
    /// empty id
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(MANIFEST_FILE);
        let content = std::fs::read_to_string(&path)?;
        let manifest: Self = serde_json::from_str(&content)?;

        if manifest.id.trim().is_empty() {
            return Err(Error::Config(format!("{} has an empty id", path.display())));
        }

        tracing::debug!(id = %manifest.id, version = %manifest.version, "loaded add-on manifest");
        Ok(manifest)
    }
}
