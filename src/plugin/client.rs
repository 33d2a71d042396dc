//! Registration handshake
//!
//! A plugin announces itself on the gateway's rendezvous endpoint, receives
//! the address of its private session channel and hands that channel to a
//! [`Router`].

use serde_json::Value;

use super::handle::RouterHandle;
use super::router::Router;
use crate::config::AddonConfig;
use crate::ipc::message::{PluginRegisterRequest, PluginRegisterResponse};
use crate::ipc::{Channel, ChannelOptions, ChannelRole, Message};
use crate::{Error, Result};

/// Progress of the registration handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Idle,
    AwaitingResponse,
    Registered,
    Failed,
}

/// Outcome of a successful registration
#[derive(Debug, Clone)]
pub struct Registration {
    pub gateway_version: String,
    pub user_profile: Value,
    /// Handle to the router now running on the session channel
    pub router: RouterHandle,
}

#[derive(Debug)]
struct PendingRegistration {
    rendezvous: Channel,
}

/// Plugin side of the registration handshake
#[derive(Debug)]
pub struct PluginClient {
    plugin_id: String,
    config: AddonConfig,
    options: ChannelOptions,
    state: HandshakeState,
    pending: Option<PendingRegistration>,
    /// Rendezvous channel kept after registration when configured
    rendezvous: Option<Channel>,
}

impl PluginClient {
    /// Create a client using the process-wide address registry and hub
    #[must_use]
    pub fn new(plugin_id: impl Into<String>, config: &AddonConfig) -> Self {
        Self::with_options(plugin_id, config, config.channel_options())
    }

    /// Create a client with explicit channel options
    #[must_use]
    pub fn with_options(plugin_id: impl Into<String>, config: &AddonConfig, options: ChannelOptions) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            config: config.clone(),
            options,
            state: HandshakeState::Idle,
            pending: None,
            rendezvous: None,
        }
    }

    #[must_use]
    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    #[must_use]
    pub const fn state(&self) -> HandshakeState {
        self.state
    }

    /// Whether the rendezvous channel is still open after registration
    #[must_use]
    pub const fn rendezvous_open(&self) -> bool {
        self.rendezvous.is_some()
    }

    /// Send the registration request
    ///
    /// Only the first call does anything. Later calls are logged and return
    /// `Ok(())` without sending.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if the gateway endpoint cannot be reached;
    /// the client then stays idle
    pub fn register(&mut self) -> Result<()> {
        if self.state != HandshakeState::Idle {
            tracing::error!(
                plugin_id = %self.plugin_id,
                state = ?self.state,
                "registration already started, ignoring"
            );
            return Ok(());
        }

        let address = self.config.gateway_address()?;
        let mut rendezvous = Channel::new(
            format!("{}.rendezvous", self.plugin_id),
            ChannelRole::Rendezvous,
            self.options.clone(),
        );
        rendezvous.connect(&address)?;
        rendezvous.send(&Message::PluginRegisterRequest(PluginRegisterRequest {
            plugin_id: self.plugin_id.clone(),
        }))?;

        self.pending = Some(PendingRegistration { rendezvous });
        self.state = HandshakeState::AwaitingResponse;
        tracing::info!(plugin_id = %self.plugin_id, %address, "registration requested");
        Ok(())
    }

    /// Wait for the gateway's registration response
    ///
    /// An unexpected message type marks the handshake failed and keeps
    /// waiting, bounded only by the configured registration timeout.
    ///
    /// # Errors
    ///
    /// - [`Error::Protocol`] if no registration is pending
    /// - [`Error::Timeout`] if the configured timeout elapses
    /// - [`Error::Transport`] if the session channel cannot be connected or
    ///   the gateway drops the rendezvous channel
    pub async fn wait_registered(&mut self) -> Result<Registration> {
        let Some(limit) = self.config.registration_timeout else {
            return self.await_response().await;
        };

        match tokio::time::timeout(limit, self.await_response()).await {
            Ok(result) => result,
            Err(_) => {
                self.fail();
                Err(Error::Timeout(format!(
                    "no registration response within {}s",
                    limit.as_secs()
                )))
            }
        }
    }

    fn fail(&mut self) {
        self.state = HandshakeState::Failed;
        self.pending = None;
    }

    async fn await_response(&mut self) -> Result<Registration> {
        let Some(pending) = self.pending.as_mut() else {
            return Err(Error::Protocol("no registration is pending".to_string()));
        };

        let response = loop {
            match pending.rendezvous.recv().await {
                Some(Message::PluginRegisterResponse(response)) => break response,
                Some(other) => {
                    tracing::error!(
                        plugin_id = %self.plugin_id,
                        message_type = %other.type_name(),
                        "protocol violation: expected PLUGIN_REGISTER_RESPONSE"
                    );
                    self.state = HandshakeState::Failed;
                    std::future::pending::<()>().await;
                }
                None => {
                    self.fail();
                    return Err(Error::Transport(
                        "gateway closed the registration channel".to_string(),
                    ));
                }
            }
        };

        self.complete(response)
    }

    fn complete(&mut self, response: PluginRegisterResponse) -> Result<Registration> {
        let address = match self.config.ipc.address(&response.ipc_base_addr) {
            Ok(address) => address,
            Err(e) => {
                self.fail();
                return Err(Error::Protocol(format!("unusable session address from gateway: {e}")));
            }
        };
        let mut session = Channel::new(
            format!("{}.session", self.plugin_id),
            ChannelRole::Session,
            self.options.clone(),
        );
        if let Err(e) = session.connect(&address) {
            self.fail();
            return Err(e);
        }

        let router = Router::spawn(
            self.plugin_id.clone(),
            response.gateway_version.clone(),
            response.user_profile.clone(),
            session,
        );

        let pending = self.pending.take();
        if self.config.keep_rendezvous_open {
            self.rendezvous = pending.map(|p| p.rendezvous);
        }
        self.state = HandshakeState::Registered;

        tracing::info!(
            plugin_id = %self.plugin_id,
            gateway_version = %response.gateway_version,
            session = %address,
            "registered with gateway"
        );

        Ok(Registration {
            gateway_version: response.gateway_version,
            user_profile: response.user_profile,
            router,
        })
    }
}
