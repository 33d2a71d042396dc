//! Manager-facing handle to a running router
//!
//! Every call is fire-and-forget: the request is queued for the router task,
//! which owns the session channel. Once the router has stopped, calls are
//! logged and dropped.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, watch};

use crate::addon::{Adapter, ApiHandler, Device, Notifier, Outlet};
use crate::ipc::ChannelAddress;
use crate::ipc::message::{
    ActionStatus, AdapterDeviceRef, ConnectedState, DeviceAdded, DeviceEvent, Message, OutletAdded,
    OutletRemoved, PluginError, PropertyChanged, Prompt,
};

/// Work queued for the router task
pub(crate) enum Command {
    Send(Message),
    AddAdapter(Arc<dyn Adapter>),
    RemoveAdapter(String),
    AddNotifier(Arc<dyn Notifier>),
    RemoveNotifier(String),
    AddApiHandler(Arc<dyn ApiHandler>),
    RemoveApiHandler(String),
    Shutdown,
}

impl Command {
    const fn label(&self) -> &'static str {
        match self {
            Self::Send(_) => "send",
            Self::AddAdapter(_) => "add_adapter",
            Self::RemoveAdapter(_) => "remove_adapter",
            Self::AddNotifier(_) => "add_notifier",
            Self::RemoveNotifier(_) => "remove_notifier",
            Self::AddApiHandler(_) => "add_api_handler",
            Self::RemoveApiHandler(_) => "remove_api_handler",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Registration data shared by the router and its handles
#[derive(Debug)]
pub(crate) struct RouterInfo {
    pub plugin_id: String,
    pub gateway_version: String,
    pub user_profile: Value,
    pub session_address: Option<ChannelAddress>,
}

/// Cloneable handle to a plugin's router
#[derive(Clone)]
pub struct RouterHandle {
    info: Arc<RouterInfo>,
    commands: mpsc::UnboundedSender<Command>,
    closed: watch::Receiver<bool>,
}

impl std::fmt::Debug for RouterHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouterHandle")
            .field("plugin_id", &self.info.plugin_id)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl RouterHandle {
    pub(crate) const fn new(
        info: Arc<RouterInfo>,
        commands: mpsc::UnboundedSender<Command>,
        closed: watch::Receiver<bool>,
    ) -> Self {
        Self {
            info,
            commands,
            closed,
        }
    }

    fn submit(&self, command: Command) {
        let label = command.label();
        if self.commands.send(command).is_err() {
            tracing::debug!(plugin_id = %self.info.plugin_id, command = label, "router stopped, dropping request");
        }
    }

    /// Queue a raw message for the gateway
    pub fn send(&self, message: Message) {
        self.submit(Command::Send(message));
    }

    #[must_use]
    pub fn plugin_id(&self) -> &str {
        &self.info.plugin_id
    }

    /// Version string reported by the gateway at registration
    #[must_use]
    pub fn gateway_version(&self) -> &str {
        &self.info.gateway_version
    }

    /// User profile reported by the gateway at registration
    #[must_use]
    pub fn user_profile(&self) -> &Value {
        &self.info.user_profile
    }

    /// Address of the session channel
    #[must_use]
    pub fn session_address(&self) -> Option<&ChannelAddress> {
        self.info.session_address.as_ref()
    }

    pub fn send_property_changed_notification(&self, adapter_id: &str, device_id: &str, property: Value) {
        self.send(Message::PropertyChanged(PropertyChanged {
            adapter_id: adapter_id.to_string(),
            device_id: device_id.to_string(),
            property,
        }));
    }

    pub fn send_action_status_notification(&self, adapter_id: &str, device_id: &str, action: Value) {
        self.send(Message::ActionStatus(ActionStatus {
            adapter_id: adapter_id.to_string(),
            device_id: device_id.to_string(),
            action,
        }));
    }

    pub fn send_event_notification(&self, adapter_id: &str, device_id: &str, event: Value) {
        self.send(Message::Event(DeviceEvent {
            adapter_id: adapter_id.to_string(),
            device_id: device_id.to_string(),
            event,
        }));
    }

    pub fn send_connected_notification(&self, adapter_id: &str, device_id: &str, connected: bool) {
        self.send(Message::Connected(ConnectedState {
            adapter_id: adapter_id.to_string(),
            device_id: device_id.to_string(),
            connected,
        }));
    }

    /// Ask the gateway to show a pairing prompt
    pub fn send_pairing_prompt(
        &self,
        adapter_id: &str,
        prompt: &str,
        url: Option<&str>,
        device_id: Option<&str>,
    ) {
        self.send(Message::PairingPrompt(make_prompt(adapter_id, prompt, url, device_id)));
    }

    /// Ask the gateway to show an unpairing prompt
    pub fn send_unpairing_prompt(
        &self,
        adapter_id: &str,
        prompt: &str,
        url: Option<&str>,
        device_id: Option<&str>,
    ) {
        self.send(Message::UnpairingPrompt(make_prompt(adapter_id, prompt, url, device_id)));
    }

    /// Report a plugin-level error to the gateway
    pub fn send_error(&self, message: &str) {
        self.send(Message::PluginError(PluginError {
            plugin_id: self.info.plugin_id.clone(),
            message: message.to_string(),
        }));
    }

    /// Announce a new device of `adapter_id`
    pub fn handle_device_added(&self, adapter_id: &str, device: &dyn Device) {
        self.send(Message::DeviceAdded(DeviceAdded {
            adapter_id: adapter_id.to_string(),
            device: device.as_dict(),
        }));
    }

    pub fn handle_device_removed(&self, adapter_id: &str, device_id: &str) {
        self.send(Message::DeviceRemoved(AdapterDeviceRef {
            adapter_id: adapter_id.to_string(),
            device_id: device_id.to_string(),
        }));
    }

    /// Announce a new outlet of `notifier_id`
    pub fn handle_outlet_added(&self, notifier_id: &str, outlet: &dyn Outlet) {
        self.send(Message::OutletAdded(OutletAdded {
            notifier_id: notifier_id.to_string(),
            outlet: outlet.as_dict(),
        }));
    }

    pub fn handle_outlet_removed(&self, notifier_id: &str, outlet_id: &str) {
        self.send(Message::OutletRemoved(OutletRemoved {
            notifier_id: notifier_id.to_string(),
            outlet_id: outlet_id.to_string(),
        }));
    }

    /// Register an adapter and announce it with `ADAPTER_ADDED`
    pub fn add_adapter(&self, adapter: Arc<dyn Adapter>) {
        self.submit(Command::AddAdapter(adapter));
    }

    pub fn remove_adapter(&self, adapter_id: &str) {
        self.submit(Command::RemoveAdapter(adapter_id.to_string()));
    }

    /// Register a notifier and announce it with `NOTIFIER_ADDED`
    pub fn add_notifier(&self, notifier: Arc<dyn Notifier>) {
        self.submit(Command::AddNotifier(notifier));
    }

    pub fn remove_notifier(&self, notifier_id: &str) {
        self.submit(Command::RemoveNotifier(notifier_id.to_string()));
    }

    /// Register an API handler and announce it with `API_HANDLER_ADDED`
    pub fn add_api_handler(&self, handler: Arc<dyn ApiHandler>) {
        self.submit(Command::AddApiHandler(handler));
    }

    pub fn remove_api_handler(&self, package_name: &str) {
        self.submit(Command::RemoveApiHandler(package_name.to_string()));
    }

    /// Stop the router and close the session channel
    pub fn shutdown(&self) {
        self.submit(Command::Shutdown);
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Wait until the router has stopped
    pub async fn closed(&self) {
        let mut closed = self.closed.clone();
        // An error means the router is gone, which is also closed
        let _ = closed.wait_for(|closed| *closed).await;
    }
}

fn make_prompt(adapter_id: &str, prompt: &str, url: Option<&str>, device_id: Option<&str>) -> Prompt {
    Prompt {
        adapter_id: adapter_id.to_string(),
        prompt: prompt.to_string(),
        url: url.map(str::to_string),
        device_id: device_id.map(str::to_string),
    }
}
