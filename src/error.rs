//! Error types for the add-on IPC core

use thiserror::Error;

use crate::ipc::ValidationError;

/// Result type alias for add-on operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the add-on IPC core
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// A channel could not be bound or connected at all
    #[error("transport error: {0}")]
    Transport(String),

    /// Channel used in a state that does not allow the operation
    #[error("channel error: {0}")]
    Channel(String),

    /// Payload was not a valid message
    #[error("invalid message: {0}")]
    Validation(#[from] ValidationError),

    /// Valid message addressed to an id that is not registered
    #[error("unknown target: {0}")]
    UnknownTarget(String),

    /// Message type not expected in the current protocol state
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// Operation did not complete in time
    #[error("timed out: {0}")]
    Timeout(String),

    /// Failure reported by an adapter, device, notifier or API handler
    #[error("addon error: {0}")]
    Addon(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Whether this error should abort startup
    ///
    /// Everything except transport failures is logged and dropped where it
    /// is detected.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Config(_))
    }
}
