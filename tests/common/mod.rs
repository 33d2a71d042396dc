//! Shared test utilities: an in-process fake gateway and mock collaborators

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use gateway_addon::addon::{
    Adapter, ApiHandler, ApiRequest, ApiResponse, Device, NotificationLevel, Notifier, Outlet,
};
use gateway_addon::ipc::inproc::InprocListener;
use gateway_addon::ipc::message::PluginRegisterResponse;
use gateway_addon::ipc::{Channel, ChannelOptions, ChannelRole, Message};
use gateway_addon::{AddonConfig, Error, PluginClient, Result};
use serde_json::{Value, json};

pub const GATEWAY_VERSION: &str = "1.1.0";

/// Receive the next message or fail the test after five seconds
pub async fn next(channel: &mut Channel) -> Message {
    tokio::time::timeout(Duration::from_secs(5), channel.recv())
        .await
        .expect("timed out waiting for a message")
        .expect("channel closed")
}

/// Assert that nothing arrives on `channel` for a short while
pub async fn expect_silence(channel: &mut Channel) {
    let outcome = tokio::time::timeout(Duration::from_millis(200), channel.recv()).await;
    assert!(outcome.is_err(), "unexpected message: {outcome:?}");
}

/// Gateway side of the protocol, bound on private in-process registries
pub struct FakeGateway {
    pub options: ChannelOptions,
    pub config: AddonConfig,
    rendezvous: Channel,
}

impl FakeGateway {
    pub fn start() -> Self {
        let options = ChannelOptions::isolated();
        let config = AddonConfig::inproc();
        let mut rendezvous = Channel::new("gateway.addonManager", ChannelRole::Rendezvous, options.clone());
        rendezvous
            .bind(&config.gateway_address().expect("invalid gateway name"))
            .expect("failed to bind rendezvous");
        Self {
            options,
            config,
            rendezvous,
        }
    }

    pub fn client(&self, plugin_id: &str) -> PluginClient {
        PluginClient::with_options(plugin_id, &self.config, self.options.clone())
    }

    /// Read one registration request and return its plugin id
    pub async fn expect_registration(&mut self) -> String {
        match next(&mut self.rendezvous).await {
            Message::PluginRegisterRequest(request) => request.plugin_id,
            other => panic!("expected registration request, got {other:?}"),
        }
    }

    fn respond(&mut self, session_name: &str) {
        self.rendezvous
            .send(&Message::PluginRegisterResponse(PluginRegisterResponse {
                gateway_version: GATEWAY_VERSION.to_string(),
                user_profile: json!({ "baseDir": "/var/lib/gateway", "dataDir": "/var/lib/gateway/data" }),
                ipc_base_addr: session_name.to_string(),
            }))
            .expect("failed to send registration response");
    }

    /// Accept a registration and return the bound session channel
    pub async fn accept(&mut self, session_name: &str) -> Channel {
        self.expect_registration().await;
        let mut session = Channel::new(
            format!("gateway.{session_name}"),
            ChannelRole::Session,
            self.options.clone(),
        );
        session
            .bind(&self.config.ipc.address(session_name).expect("invalid session name"))
            .expect("failed to bind session");
        self.respond(session_name);
        session
    }

    /// Accept a registration and hand back the raw session pipe listener
    pub async fn accept_raw(&mut self, session_name: &str) -> InprocListener {
        self.expect_registration().await;
        let (_token, listener) = self.options.inproc.bind(session_name);
        self.respond(session_name);
        listener
    }

    /// Send a message that the rendezvous side is not supposed to send
    pub fn reply_with(&mut self, message: &Message) {
        self.rendezvous.send(message).expect("failed to reply");
    }
}

/// Device storing property values in memory
pub struct MockDevice {
    id: String,
    properties: Mutex<HashMap<String, Value>>,
    reject_writes: bool,
    bare_reports: bool,
}

impl MockDevice {
    pub fn new(id: &str) -> Self {
        let mut properties = HashMap::new();
        properties.insert("on".to_string(), Value::Bool(false));
        Self {
            id: id.to_string(),
            properties: Mutex::new(properties),
            reject_writes: false,
            bare_reports: false,
        }
    }

    /// Device whose writes report a bare value instead of a property object
    pub fn bare(id: &str) -> Self {
        Self {
            bare_reports: true,
            ..Self::new(id)
        }
    }

    pub fn read_only(id: &str) -> Self {
        Self {
            reject_writes: true,
            ..Self::new(id)
        }
    }

    pub fn value(&self, name: &str) -> Option<Value> {
        self.properties.lock().unwrap().get(name).cloned()
    }
}

#[async_trait]
impl Device for MockDevice {
    fn id(&self) -> &str {
        &self.id
    }

    fn as_dict(&self) -> Value {
        json!({ "id": self.id, "title": format!("Mock {}", self.id) })
    }

    fn property(&self, name: &str) -> Option<Value> {
        self.value(name).map(|value| json!({ "name": name, "value": value }))
    }

    async fn set_property(&self, name: &str, value: Value) -> Result<Value> {
        if self.reject_writes {
            return Err(Error::Addon(format!("{name} is read-only")));
        }
        let mut properties = self.properties.lock().unwrap();
        if !properties.contains_key(name) {
            return Err(Error::Addon(format!("no property {name}")));
        }
        properties.insert(name.to_string(), value.clone());
        if self.bare_reports {
            return Ok(value);
        }
        Ok(json!({ "name": name, "value": value }))
    }

    async fn request_action(&self, _action_id: &str, name: &str, _input: Option<Value>) -> Result<()> {
        if name == "reboot" {
            Ok(())
        } else {
            Err(Error::Addon(format!("unknown action {name}")))
        }
    }
}

/// Adapter holding a fixed set of mock devices
pub struct MockAdapter {
    id: String,
    devices: HashMap<String, Arc<MockDevice>>,
    pin_reply: Option<Value>,
    pub unloaded: Arc<AtomicBool>,
}

impl MockAdapter {
    pub fn new(id: &str, devices: Vec<Arc<MockDevice>>) -> Self {
        Self {
            id: id.to_string(),
            devices: devices.into_iter().map(|d| (d.id.clone(), d)).collect(),
            pin_reply: None,
            unloaded: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Accept every PIN, answering with `reply` as the device description
    pub fn accepting_pins(id: &str, devices: Vec<Arc<MockDevice>>, reply: Value) -> Self {
        Self {
            pin_reply: Some(reply),
            ..Self::new(id, devices)
        }
    }

    pub fn was_unloaded(&self) -> bool {
        self.unloaded.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Adapter for MockAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        "Mock Adapter"
    }

    fn package_name(&self) -> &str {
        "mock-adapter"
    }

    fn device(&self, device_id: &str) -> Option<Arc<dyn Device>> {
        self.devices
            .get(device_id)
            .map(|d| Arc::clone(d) as Arc<dyn Device>)
    }

    async fn set_pin(&self, device_id: &str, _pin: &str) -> Result<Value> {
        self.pin_reply
            .clone()
            .ok_or_else(|| Error::Addon(format!("no PIN support for {device_id}")))
    }

    async fn unload(&self) -> Result<()> {
        self.unloaded.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Outlet recording delivered notifications
#[derive(Default)]
pub struct MockOutlet {
    pub delivered: Mutex<Vec<(String, NotificationLevel)>>,
}

#[async_trait]
impl Outlet for MockOutlet {
    fn id(&self) -> &str {
        "o1"
    }

    fn as_dict(&self) -> Value {
        json!({ "id": "o1", "name": "Inbox" })
    }

    async fn notify(&self, title: &str, _message: &str, level: NotificationLevel) -> Result<()> {
        self.delivered.lock().unwrap().push((title.to_string(), level));
        Ok(())
    }
}

pub struct MockNotifier {
    pub outlet: Arc<MockOutlet>,
}

#[async_trait]
impl Notifier for MockNotifier {
    fn id(&self) -> &str {
        "n1"
    }

    fn name(&self) -> &str {
        "Mock Notifier"
    }

    fn package_name(&self) -> &str {
        "mock-notifier"
    }

    fn outlet(&self, outlet_id: &str) -> Option<Arc<dyn Outlet>> {
        (outlet_id == "o1").then(|| Arc::clone(&self.outlet) as Arc<dyn Outlet>)
    }
}

/// API handler echoing the request path, failing on `/fail`
pub struct EchoApi;

#[async_trait]
impl ApiHandler for EchoApi {
    fn package_name(&self) -> &str {
        "echo-api"
    }

    async fn handle_request(&self, request: ApiRequest) -> Result<ApiResponse> {
        if request.path == "/fail" {
            return Err(Error::Addon("handler exploded".to_string()));
        }
        Ok(ApiResponse::json(200, &json!({ "path": request.path })))
    }
}
