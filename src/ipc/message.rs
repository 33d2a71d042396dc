//! IPC message model
//!
//! Every message on the wire is an envelope `{"messageType": ..., "data": ...}`.
//! In Rust the envelope is the [`Message`] enum: one variant per entry of the
//! closed [`MessageType`] set, each carrying its own typed payload, plus
//! [`Message::Other`] for types this build does not know about.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Raw envelope as it appears on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub message_type: String,
    pub data: Value,
}

macro_rules! message_types {
    ($( $(#[$doc:meta])* $variant:ident($payload:ty) = $wire:literal, )+) => {
        /// Closed set of message types understood by this protocol version
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum MessageType {
            $( $(#[$doc])* $variant, )+
        }

        impl MessageType {
            /// Every known message type, in protocol order
            pub const ALL: &'static [Self] = &[ $( Self::$variant, )+ ];

            /// Wire name of this message type
            #[must_use]
            pub const fn as_str(self) -> &'static str {
                match self {
                    $( Self::$variant => $wire, )+
                }
            }
        }

        impl FromStr for MessageType {
            type Err = UnknownMessageType;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $( $wire => Ok(Self::$variant), )+
                    other => Err(UnknownMessageType(other.to_string())),
                }
            }
        }

        /// A decoded IPC message
        #[derive(Debug, Clone, PartialEq)]
        pub enum Message {
            $( $(#[$doc])* $variant($payload), )+
            /// Message type outside the known set, kept as-is
            Other {
                message_type: String,
                data: Value,
            },
        }

        impl Message {
            /// The known type of this message, `None` for [`Message::Other`]
            #[must_use]
            pub const fn message_type(&self) -> Option<MessageType> {
                match self {
                    $( Self::$variant(_) => Some(MessageType::$variant), )+
                    Self::Other { .. } => None,
                }
            }

            /// Serialize the payload into the `data` object
            ///
            /// # Errors
            ///
            /// Returns error if a payload value cannot be represented as JSON
            pub fn data(&self) -> serde_json::Result<Value> {
                match self {
                    $( Self::$variant(payload) => serde_json::to_value(payload), )+
                    Self::Other { data, .. } => Ok(data.clone()),
                }
            }

            /// Decode a typed message from its type and `data` object
            ///
            /// # Errors
            ///
            /// Returns error if `data` does not match the payload shape
            pub fn from_parts(message_type: MessageType, data: Value) -> serde_json::Result<Self> {
                match message_type {
                    $( MessageType::$variant => serde_json::from_value(data).map(Self::$variant), )+
                }
            }
        }
    };
}

message_types! {
    /// Plugin asks the gateway to register it
    PluginRegisterRequest(PluginRegisterRequest) = "PLUGIN_REGISTER_REQUEST",
    /// Gateway accepts a registration and names the session channel
    PluginRegisterResponse(PluginRegisterResponse) = "PLUGIN_REGISTER_RESPONSE",
    /// Gateway asks the plugin to unload everything and exit
    Unload(PluginRef) = "UNLOAD",
    /// Plugin finished unloading
    UnloadResponse(PluginRef) = "UNLOAD_RESPONSE",
    /// Plugin-level error report
    PluginError(PluginError) = "PLUGIN_ERROR",
    AdapterAdded(AdapterAdded) = "ADAPTER_ADDED",
    NotifierAdded(NotifierAdded) = "NOTIFIER_ADDED",
    ApiHandlerAdded(ApiHandlerAdded) = "API_HANDLER_ADDED",
    StartPairing(StartPairing) = "START_PAIRING",
    CancelPairing(AdapterRef) = "CANCEL_PAIRING",
    RemoveDevice(AdapterDeviceRef) = "REMOVE_DEVICE",
    CancelRemoveDevice(AdapterDeviceRef) = "CANCEL_REMOVE_DEVICE",
    DeviceSaved(DeviceSaved) = "DEVICE_SAVED",
    SetPin(SetPin) = "SET_PIN",
    SetCredentials(SetCredentials) = "SET_CREDENTIALS",
    SetProperty(SetProperty) = "SET_PROPERTY",
    RequestAction(RequestAction) = "REQUEST_ACTION",
    RemoveAction(RemoveAction) = "REMOVE_ACTION",
    RequestActionResponse(ActionResponse) = "REQUEST_ACTION_RESPONSE",
    RemoveActionResponse(ActionResponse) = "REMOVE_ACTION_RESPONSE",
    SetPinResponse(DeviceSetupResponse) = "SET_PIN_RESPONSE",
    SetCredentialsResponse(DeviceSetupResponse) = "SET_CREDENTIALS_RESPONSE",
    OutletNotifyResponse(OutletNotifyResponse) = "OUTLET_NOTIFY_RESPONSE",
    ApiResponse(ApiResponseMessage) = "API_RESPONSE",
    DeviceAdded(DeviceAdded) = "DEVICE_ADDED",
    DeviceRemoved(AdapterDeviceRef) = "DEVICE_REMOVED",
    PropertyChanged(PropertyChanged) = "PROPERTY_CHANGED",
    ActionStatus(ActionStatus) = "ACTION_STATUS",
    Event(DeviceEvent) = "EVENT",
    Connected(ConnectedState) = "CONNECTED",
    PairingPrompt(Prompt) = "PAIRING_PROMPT",
    UnpairingPrompt(Prompt) = "UNPAIRING_PROMPT",
    OutletAdded(OutletAdded) = "OUTLET_ADDED",
    OutletRemoved(OutletRemoved) = "OUTLET_REMOVED",
    OutletNotify(OutletNotify) = "OUTLET_NOTIFY",
    ApiRequest(ApiRequestMessage) = "API_REQUEST",
}

/// Message type name that is not part of [`MessageType`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownMessageType(pub String);

impl fmt::Display for UnknownMessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown message type: {}", self.0)
    }
}

impl std::error::Error for UnknownMessageType {}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Message {
    /// Wire name of this message's type
    #[must_use]
    pub fn type_name(&self) -> &str {
        match self {
            Self::Other { message_type, .. } => message_type,
            known => known.message_type().map_or("", MessageType::as_str),
        }
    }

    /// Build the wire envelope
    ///
    /// # Errors
    ///
    /// Returns error if the payload cannot be represented as JSON
    pub fn to_envelope(&self) -> serde_json::Result<Envelope> {
        Ok(Envelope {
            message_type: self.type_name().to_string(),
            data: self.data()?,
        })
    }

    /// Encode to the bytes of one transport frame
    ///
    /// # Errors
    ///
    /// Returns error if the payload cannot be represented as JSON
    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(&self.to_envelope()?)
    }
}

// -- Handshake and plugin lifecycle --

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginRegisterRequest {
    pub plugin_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginRegisterResponse {
    pub gateway_version: String,
    pub user_profile: Value,
    /// Logical name of the session channel for this plugin instance
    pub ipc_base_addr: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginRef {
    pub plugin_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginError {
    pub plugin_id: String,
    pub message: String,
}

// -- Collaborator registration --

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdapterAdded {
    pub plugin_id: String,
    pub adapter_id: String,
    pub name: String,
    pub package_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifierAdded {
    pub plugin_id: String,
    pub notifier_id: String,
    pub name: String,
    pub package_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiHandlerAdded {
    pub plugin_id: String,
    pub package_name: String,
}

// -- Adapter commands --

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdapterRef {
    pub adapter_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdapterDeviceRef {
    pub adapter_id: String,
    pub device_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartPairing {
    pub adapter_id: String,
    /// Pairing window in seconds
    pub timeout: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSaved {
    pub adapter_id: String,
    pub device_id: String,
    pub device: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetPin {
    pub adapter_id: String,
    pub device_id: String,
    pub pin: String,
    pub message_id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetCredentials {
    pub adapter_id: String,
    pub device_id: String,
    pub username: String,
    pub password: String,
    pub message_id: u64,
}

// -- Device commands --

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetProperty {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adapter_id: Option<String>,
    pub device_id: String,
    pub name: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestAction {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adapter_id: Option<String>,
    pub device_id: String,
    pub action_id: String,
    pub name: String,
    /// Action input, `Null` when the action takes none
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub input: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveAction {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adapter_id: Option<String>,
    pub device_id: String,
    pub action_id: String,
    pub name: String,
}

// -- Responses --

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResponse {
    pub device_id: String,
    pub action_id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSetupResponse {
    pub adapter_id: String,
    pub device_id: String,
    pub message_id: u64,
    pub success: bool,
    /// Device description after a successful setup
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutletNotifyResponse {
    pub notifier_id: String,
    pub outlet_id: String,
    pub message_id: u64,
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponseMessage {
    pub package_name: String,
    pub message_id: u64,
    pub response: ApiResponse,
}

/// Response produced by an API handler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse {
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl ApiResponse {
    /// JSON response with the given status
    #[must_use]
    pub fn json(status: u16, content: &Value) -> Self {
        Self {
            status,
            content_type: Some("application/json".to_string()),
            content: Some(content.to_string()),
        }
    }

    /// Empty response with the given status
    #[must_use]
    pub const fn status(status: u16) -> Self {
        Self {
            status,
            content_type: None,
            content: None,
        }
    }
}

// -- Notifications --

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceAdded {
    pub adapter_id: String,
    pub device: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyChanged {
    pub adapter_id: String,
    pub device_id: String,
    pub property: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionStatus {
    pub adapter_id: String,
    pub device_id: String,
    pub action: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceEvent {
    pub adapter_id: String,
    pub device_id: String,
    pub event: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedState {
    pub adapter_id: String,
    pub device_id: String,
    pub connected: bool,
}

/// Pairing or unpairing prompt shown to the user by the gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prompt {
    pub adapter_id: String,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutletAdded {
    pub notifier_id: String,
    pub outlet: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutletRemoved {
    pub notifier_id: String,
    pub outlet_id: String,
}

// -- Notifier and API handler commands --

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutletNotify {
    pub notifier_id: String,
    pub outlet_id: String,
    pub title: String,
    pub message: String,
    pub level: u8,
    pub message_id: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiRequestMessage {
    pub package_name: String,
    pub message_id: u64,
    pub request: ApiRequest,
}

/// REST request forwarded by the gateway to an API handler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiRequest {
    pub method: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub query: Value,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub body: Value,
}
