//! Gateway add-on IPC core
//!
//! An add-on process (a *plugin*) runs outside the gateway yet appears to it
//! as a driver for devices, notification outlets and REST extensions. This
//! crate provides the plugin side of the protocol:
//! - Schema-validated message envelope
//! - Rendezvous and session channels over Unix sockets or in-process pipes
//! - Registration handshake
//! - Dispatch router for adapters, notifiers and API handlers
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                      Gateway                          │
//! │   gateway.addonManager (rendezvous)  │  <id> session  │
//! └──────────────┬───────────────────────┬───────────────┘
//!                │ register              │ messages
//! ┌──────────────▼───────────────────────▼───────────────┐
//! │                   Add-on process                      │
//! │   PluginClient  →  Router  →  Adapters │ Notifiers    │
//! └──────────────────────────────────────────────────────┘
//! ```

pub mod addon;
pub mod config;
pub mod error;
pub mod ipc;
pub mod manifest;
pub mod plugin;

pub use addon::{Adapter, ApiHandler, Device, NotificationLevel, Notifier, Outlet};
pub use config::AddonConfig;
pub use error::{Error, Result};
pub use ipc::{Channel, ChannelAddress, ChannelRole, Message, MessageType, MessageValidator};
pub use manifest::{AddonKind, AddonManifest};
pub use plugin::{HandshakeState, PluginClient, Registration, Router, RouterHandle};
