//! Dispatch router
//!
//! The router task is the single owner of the session channel. It reads
//! inbound messages, finds the addressed collaborator in its
//! [`DispatchRegistry`] and runs the call in a spawned task. Replies come back
//! through the same command queue that [`RouterHandle`] feeds, so every send
//! happens on the router task.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde_json::Value;
use tokio::sync::{mpsc, watch};

use super::handle::{Command, RouterHandle, RouterInfo};
use super::registry::DispatchRegistry;
use crate::addon::{ApiResponse, NotificationLevel};
use crate::ipc::Channel;
use crate::ipc::message::{
    ActionResponse, AdapterAdded, AdapterDeviceRef, ApiHandlerAdded, ApiRequestMessage,
    ApiResponseMessage, DeviceSaved, DeviceSetupResponse, Message, NotifierAdded, OutletNotify,
    OutletNotifyResponse, PluginRef, PropertyChanged, RemoveAction, RequestAction, SetCredentials,
    SetPin, SetProperty, StartPairing,
};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

/// Queue a reply from a spawned task
fn reply(commands: &mpsc::UnboundedSender<Command>, message: Message) {
    if commands.send(Command::Send(message)).is_err() {
        tracing::debug!("router stopped, dropping reply");
    }
}

/// Per-plugin message router
pub struct Router {
    info: Arc<RouterInfo>,
    session: Channel,
    registry: DispatchRegistry,
    commands_tx: mpsc::UnboundedSender<Command>,
    commands_rx: mpsc::UnboundedReceiver<Command>,
    closed_tx: watch::Sender<bool>,
}

impl Router {
    /// Start a router on a connected session channel
    ///
    /// Must be called inside a Tokio runtime.
    pub fn spawn(
        plugin_id: impl Into<String>,
        gateway_version: impl Into<String>,
        user_profile: Value,
        session: Channel,
    ) -> RouterHandle {
        let info = Arc::new(RouterInfo {
            plugin_id: plugin_id.into(),
            gateway_version: gateway_version.into(),
            user_profile,
            session_address: session.address().cloned(),
        });
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (closed_tx, closed_rx) = watch::channel(false);

        let handle = RouterHandle::new(Arc::clone(&info), commands_tx.clone(), closed_rx);
        let router = Self {
            info,
            session,
            registry: DispatchRegistry::new(),
            commands_tx,
            commands_rx,
            closed_tx,
        };

        tokio::spawn(router.run());
        handle
    }

    async fn run(mut self) {
        tracing::info!(plugin_id = %self.info.plugin_id, "router started");

        loop {
            let flow = tokio::select! {
                inbound = self.session.recv() => match inbound {
                    Some(message) => self.dispatch(message).await,
                    None => {
                        tracing::warn!(plugin_id = %self.info.plugin_id, "session closed by gateway");
                        Flow::Stop
                    }
                },
                Some(command) = self.commands_rx.recv() => self.execute(command),
            };

            if flow == Flow::Stop {
                break;
            }
        }

        self.teardown();
    }

    fn send(&mut self, message: &Message) {
        match self.session.send(message) {
            Ok(()) => {}
            Err(Error::Validation(e)) => tracing::warn!(
                plugin_id = %self.info.plugin_id,
                message_type = %message.type_name(),
                error = %e,
                "dropping outbound message that fails its schema"
            ),
            Err(e) => tracing::warn!(
                plugin_id = %self.info.plugin_id,
                message_type = %message.type_name(),
                error = %e,
                "failed to send message"
            ),
        }
    }

    fn execute(&mut self, command: Command) -> Flow {
        match command {
            Command::Send(message) => self.send(&message),
            Command::AddAdapter(adapter) => {
                let announcement = Message::AdapterAdded(AdapterAdded {
                    plugin_id: self.info.plugin_id.clone(),
                    adapter_id: adapter.id().to_string(),
                    name: adapter.name().to_string(),
                    package_name: adapter.package_name().to_string(),
                });
                if self.registry.add_adapter(adapter).is_some() {
                    tracing::debug!(plugin_id = %self.info.plugin_id, "replaced existing adapter");
                }
                self.send(&announcement);
            }
            Command::AddNotifier(notifier) => {
                let announcement = Message::NotifierAdded(NotifierAdded {
                    plugin_id: self.info.plugin_id.clone(),
                    notifier_id: notifier.id().to_string(),
                    name: notifier.name().to_string(),
                    package_name: notifier.package_name().to_string(),
                });
                if self.registry.add_notifier(notifier).is_some() {
                    tracing::debug!(plugin_id = %self.info.plugin_id, "replaced existing notifier");
                }
                self.send(&announcement);
            }
            Command::AddApiHandler(handler) => {
                let announcement = Message::ApiHandlerAdded(ApiHandlerAdded {
                    plugin_id: self.info.plugin_id.clone(),
                    package_name: handler.package_name().to_string(),
                });
                if self.registry.add_api_handler(handler).is_some() {
                    tracing::debug!(plugin_id = %self.info.plugin_id, "replaced existing API handler");
                }
                self.send(&announcement);
            }
            Command::RemoveAdapter(id) => {
                if self.registry.remove_adapter(&id).is_none() {
                    tracing::warn!(adapter_id = %id, "remove of unknown adapter");
                }
            }
            Command::RemoveNotifier(id) => {
                if self.registry.remove_notifier(&id).is_none() {
                    tracing::warn!(notifier_id = %id, "remove of unknown notifier");
                }
            }
            Command::RemoveApiHandler(package) => {
                if self.registry.remove_api_handler(&package).is_none() {
                    tracing::warn!(package_name = %package, "remove of unknown API handler");
                }
            }
            Command::Shutdown => return Flow::Stop,
        }
        Flow::Continue
    }

    async fn dispatch(&mut self, message: Message) -> Flow {
        let message_type = message.type_name().to_string();
        let result = match message {
            Message::Unload(request) => return self.unload(&request).await,
            Message::SetProperty(m) => self.set_property(m),
            Message::RequestAction(m) => self.request_action(m),
            Message::RemoveAction(m) => self.remove_action(m),
            Message::DeviceSaved(m) => self.device_saved(m),
            Message::StartPairing(m) => self.start_pairing(&m),
            Message::CancelPairing(m) => self.registry.adapter(&m.adapter_id).map(|adapter| {
                tokio::spawn(async move {
                    if let Err(e) = adapter.cancel_pairing().await {
                        tracing::warn!(adapter_id = %adapter.id(), error = %e, "cancel pairing failed");
                    }
                });
            }),
            Message::RemoveDevice(m) => self.remove_device(m),
            Message::CancelRemoveDevice(m) => self.cancel_remove_device(m),
            Message::SetPin(m) => self.set_pin(m),
            Message::SetCredentials(m) => self.set_credentials(m),
            Message::OutletNotify(m) => self.outlet_notify(m),
            Message::ApiRequest(m) => self.api_request(m),
            other => {
                tracing::debug!(message_type = %other.type_name(), "ignoring message not handled by plugins");
                Ok(())
            }
        };

        if let Err(e) = result {
            tracing::warn!(
                plugin_id = %self.info.plugin_id,
                message_type = %message_type,
                error = %e,
                "dropping message"
            );
        }
        Flow::Continue
    }

    fn set_property(&self, m: SetProperty) -> Result<()> {
        let (adapter, device) = self.registry.device(m.adapter_id.as_deref(), &m.device_id)?;
        let commands = self.commands_tx.clone();

        tokio::spawn(async move {
            let property = match device.set_property(&m.name, m.value).await {
                Ok(property) => Some(property),
                Err(e) => {
                    tracing::warn!(device_id = %m.device_id, property = %m.name, error = %e, "set property failed");
                    device.property(&m.name)
                }
            };

            if let Some(property) = property {
                reply(
                    &commands,
                    Message::PropertyChanged(PropertyChanged {
                        adapter_id: adapter.id().to_string(),
                        device_id: m.device_id,
                        property,
                    }),
                );
            }
        });
        Ok(())
    }

    fn request_action(&self, m: RequestAction) -> Result<()> {
        let (_, device) = self.registry.device(m.adapter_id.as_deref(), &m.device_id)?;
        let commands = self.commands_tx.clone();

        tokio::spawn(async move {
            let input = (!m.input.is_null()).then_some(m.input);
            let outcome = device.request_action(&m.action_id, &m.name, input).await;
            if let Err(e) = &outcome {
                tracing::warn!(device_id = %m.device_id, action = %m.name, error = %e, "request action failed");
            }
            reply(
                &commands,
                Message::RequestActionResponse(action_response(m.device_id, m.action_id, &outcome)),
            );
        });
        Ok(())
    }

    fn remove_action(&self, m: RemoveAction) -> Result<()> {
        let (_, device) = self.registry.device(m.adapter_id.as_deref(), &m.device_id)?;
        let commands = self.commands_tx.clone();

        tokio::spawn(async move {
            let outcome = device.remove_action(&m.action_id, &m.name).await;
            if let Err(e) = &outcome {
                tracing::warn!(device_id = %m.device_id, action = %m.name, error = %e, "remove action failed");
            }
            reply(
                &commands,
                Message::RemoveActionResponse(action_response(m.device_id, m.action_id, &outcome)),
            );
        });
        Ok(())
    }

    fn device_saved(&self, m: DeviceSaved) -> Result<()> {
        let adapter = self.registry.adapter(&m.adapter_id)?;
        tokio::spawn(async move {
            if let Err(e) = adapter.handle_device_saved(&m.device_id, m.device).await {
                tracing::warn!(adapter_id = %m.adapter_id, device_id = %m.device_id, error = %e, "device saved handler failed");
            }
        });
        Ok(())
    }

    fn start_pairing(&self, m: &StartPairing) -> Result<()> {
        let adapter = self.registry.adapter(&m.adapter_id)?;
        let timeout = Duration::from_secs(m.timeout);
        tokio::spawn(async move {
            if let Err(e) = adapter.start_pairing(timeout).await {
                tracing::warn!(adapter_id = %adapter.id(), error = %e, "start pairing failed");
            }
        });
        Ok(())
    }

    fn remove_device(&self, m: AdapterDeviceRef) -> Result<()> {
        let (adapter, _) = self.registry.device(Some(&m.adapter_id), &m.device_id)?;
        let commands = self.commands_tx.clone();

        tokio::spawn(async move {
            let outcome = adapter.remove_device(&m.device_id).await;
            match outcome {
                Ok(()) => reply(&commands, Message::DeviceRemoved(m)),
                Err(e) => {
                    tracing::warn!(adapter_id = %m.adapter_id, device_id = %m.device_id, error = %e, "remove device failed");
                }
            }
        });
        Ok(())
    }

    fn cancel_remove_device(&self, m: AdapterDeviceRef) -> Result<()> {
        let adapter = self.registry.adapter(&m.adapter_id)?;
        tokio::spawn(async move {
            if let Err(e) = adapter.cancel_remove_device(&m.device_id).await {
                tracing::warn!(adapter_id = %m.adapter_id, device_id = %m.device_id, error = %e, "cancel remove device failed");
            }
        });
        Ok(())
    }

    fn set_pin(&self, m: SetPin) -> Result<()> {
        let adapter = self.registry.adapter(&m.adapter_id)?;
        let commands = self.commands_tx.clone();

        tokio::spawn(async move {
            let outcome = adapter.set_pin(&m.device_id, &m.pin).await;
            if let Err(e) = &outcome {
                tracing::warn!(adapter_id = %m.adapter_id, device_id = %m.device_id, error = %e, "set PIN failed");
            }
            reply(
                &commands,
                Message::SetPinResponse(setup_response(m.adapter_id, m.device_id, m.message_id, outcome)),
            );
        });
        Ok(())
    }

    fn set_credentials(&self, m: SetCredentials) -> Result<()> {
        let adapter = self.registry.adapter(&m.adapter_id)?;
        let commands = self.commands_tx.clone();

        tokio::spawn(async move {
            let outcome = adapter
                .set_credentials(&m.device_id, &m.username, &m.password)
                .await;
            if let Err(e) = &outcome {
                tracing::warn!(adapter_id = %m.adapter_id, device_id = %m.device_id, error = %e, "set credentials failed");
            }
            reply(
                &commands,
                Message::SetCredentialsResponse(setup_response(
                    m.adapter_id,
                    m.device_id,
                    m.message_id,
                    outcome,
                )),
            );
        });
        Ok(())
    }

    fn outlet_notify(&self, m: OutletNotify) -> Result<()> {
        let outlet = self.registry.outlet(&m.notifier_id, &m.outlet_id)?;
        let commands = self.commands_tx.clone();

        tokio::spawn(async move {
            let outcome = match NotificationLevel::try_from(m.level) {
                Ok(level) => outlet.notify(&m.title, &m.message, level).await,
                Err(e) => Err(e),
            };
            if let Err(e) = &outcome {
                tracing::warn!(notifier_id = %m.notifier_id, outlet_id = %m.outlet_id, error = %e, "notify failed");
            }
            reply(
                &commands,
                Message::OutletNotifyResponse(OutletNotifyResponse {
                    notifier_id: m.notifier_id,
                    outlet_id: m.outlet_id,
                    message_id: m.message_id,
                    success: outcome.is_ok(),
                }),
            );
        });
        Ok(())
    }

    fn api_request(&self, m: ApiRequestMessage) -> Result<()> {
        let handler = self.registry.api_handler(&m.package_name)?;
        let commands = self.commands_tx.clone();

        tokio::spawn(async move {
            let response = match handler.handle_request(m.request).await {
                Ok(response) => response,
                Err(e) => {
                    tracing::warn!(package_name = %m.package_name, error = %e, "API handler failed");
                    ApiResponse::status(500)
                }
            };
            reply(
                &commands,
                Message::ApiResponse(ApiResponseMessage {
                    package_name: m.package_name,
                    message_id: m.message_id,
                    response,
                }),
            );
        });
        Ok(())
    }

    /// Unload every collaborator, acknowledge and stop
    async fn unload(&mut self, request: &PluginRef) -> Flow {
        if request.plugin_id != self.info.plugin_id {
            tracing::warn!(
                plugin_id = %self.info.plugin_id,
                requested = %request.plugin_id,
                "ignoring unload for another plugin"
            );
            return Flow::Continue;
        }

        tracing::info!(plugin_id = %self.info.plugin_id, "unloading");
        let drained = self.registry.drain();

        let adapters = drained.adapters.iter().map(|a| async move { (a.id().to_string(), a.unload().await) });
        let notifiers = drained.notifiers.iter().map(|n| async move { (n.id().to_string(), n.unload().await) });
        let handlers = drained
            .api_handlers
            .iter()
            .map(|h| async move { (h.package_name().to_string(), h.unload().await) });

        let (adapters, notifiers, handlers) =
            futures::join!(join_all(adapters), join_all(notifiers), join_all(handlers));

        for (id, outcome) in adapters.into_iter().chain(notifiers).chain(handlers) {
            if let Err(e) = outcome {
                tracing::warn!(id = %id, error = %e, "unload failed");
            }
        }

        self.send(&Message::UnloadResponse(PluginRef {
            plugin_id: self.info.plugin_id.clone(),
        }));
        Flow::Stop
    }

    fn teardown(&mut self) {
        self.session.close();
        let dropped = self.registry.drain();
        self.closed_tx.send_replace(true);
        tracing::info!(
            plugin_id = %self.info.plugin_id,
            adapters = dropped.adapters.len(),
            notifiers = dropped.notifiers.len(),
            "router stopped"
        );
    }
}

fn action_response(device_id: String, action_id: String, outcome: &Result<()>) -> ActionResponse {
    ActionResponse {
        device_id,
        action_id,
        success: outcome.is_ok(),
        error: outcome.as_ref().err().map(ToString::to_string),
    }
}

fn setup_response(
    adapter_id: String,
    device_id: String,
    message_id: u64,
    outcome: Result<Value>,
) -> DeviceSetupResponse {
    let success = outcome.is_ok();
    // Only an object describes a device, anything else is left out
    let device = match outcome {
        Ok(Value::Object(device)) => Some(device),
        _ => None,
    };
    DeviceSetupResponse {
        adapter_id,
        device_id,
        message_id,
        success,
        device,
    }
}
