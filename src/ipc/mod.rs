//! Message transport between a plugin process and the gateway
//!
//! - [`message`]: the typed message set and its JSON envelope
//! - [`schema`]: validation of inbound bytes against the schema set
//! - [`channel`]: rendezvous and session channels over `ipc` or `inproc`

pub mod address;
pub mod channel;
pub mod frame;
pub mod inproc;
pub mod message;
pub mod registry;
pub mod schema;

pub use address::{ChannelAddress, IpcConfig, Protocol};
pub use channel::{Channel, ChannelOptions, ChannelRole, ChannelState};
pub use inproc::InprocHub;
pub use message::{Envelope, Message, MessageType};
pub use registry::{AddressRegistry, ClaimKind};
pub use schema::{MessageValidator, SCHEMA_VERSION, ValidationError, ValidationErrorKind};

/// Logical name of the gateway's registration endpoint
pub const GATEWAY_ADDRESS: &str = "gateway.addonManager";
