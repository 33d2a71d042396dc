//! Plugin runtime: registration with the gateway and message dispatch

pub mod client;
pub mod handle;
pub mod registry;
pub mod router;

pub use client::{HandshakeState, PluginClient, Registration};
pub use handle::RouterHandle;
pub use registry::DispatchRegistry;
pub use router::Router;
