//! Dispatch router integration tests
//!
//! A fake gateway drives a registered plugin over in-process channels

use std::sync::Arc;
use std::time::Duration;

use gateway_addon::addon::NotificationLevel;
use gateway_addon::ipc::frame::{DEFAULT_MAX_FRAME_BYTES, read_frame, write_frame};
use gateway_addon::ipc::message::{
    AdapterDeviceRef, ApiRequest, ApiRequestMessage, OutletNotify, PluginRef, RequestAction,
    SetPin, SetProperty,
};
use gateway_addon::ipc::{Channel, Message, MessageValidator};
use gateway_addon::RouterHandle;
use serde_json::{Value, json};

mod common;
use common::{EchoApi, FakeGateway, MockAdapter, MockDevice, MockNotifier, MockOutlet, expect_silence, next};

struct Harness {
    _gateway: FakeGateway,
    session: Channel,
    router: RouterHandle,
    adapter: Arc<MockAdapter>,
    d1: Arc<MockDevice>,
}

/// Register "acme" with one adapter "a1" holding devices d1 and a read-only d2
async fn harness() -> Harness {
    let mut gateway = FakeGateway::start();
    let mut client = gateway.client("acme");
    client.register().unwrap();
    let mut session = gateway.accept("acme.session").await;
    let router = client.wait_registered().await.unwrap().router;

    let d1 = Arc::new(MockDevice::new("d1"));
    let d2 = Arc::new(MockDevice::read_only("d2"));
    let adapter = Arc::new(MockAdapter::new("a1", vec![Arc::clone(&d1), d2]));
    router.add_adapter(adapter.clone());

    match next(&mut session).await {
        Message::AdapterAdded(added) => {
            assert_eq!(added.plugin_id, "acme");
            assert_eq!(added.adapter_id, "a1");
            assert_eq!(added.package_name, "mock-adapter");
        }
        other => panic!("expected ADAPTER_ADDED, got {other:?}"),
    }

    Harness {
        _gateway: gateway,
        session,
        router,
        adapter,
        d1,
    }
}

fn set_property(adapter_id: Option<&str>, device_id: &str, name: &str, value: Value) -> Message {
    Message::SetProperty(SetProperty {
        adapter_id: adapter_id.map(str::to_string),
        device_id: device_id.to_string(),
        name: name.to_string(),
        value,
    })
}

#[tokio::test]
async fn test_set_property_reports_property_changed() {
    let mut h = harness().await;

    h.session
        .send(&set_property(Some("a1"), "d1", "on", Value::Bool(true)))
        .unwrap();

    match next(&mut h.session).await {
        Message::PropertyChanged(changed) => {
            assert_eq!(changed.adapter_id, "a1");
            assert_eq!(changed.device_id, "d1");
            assert_eq!(changed.property, json!({ "name": "on", "value": true }));
        }
        other => panic!("expected PROPERTY_CHANGED, got {other:?}"),
    }
    assert_eq!(h.d1.value("on"), Some(Value::Bool(true)));
}

#[tokio::test]
async fn test_set_property_without_adapter_scans_adapters() {
    let mut h = harness().await;

    h.session
        .send(&set_property(None, "d1", "on", Value::Bool(true)))
        .unwrap();

    assert!(matches!(next(&mut h.session).await, Message::PropertyChanged(c) if c.adapter_id == "a1"));
}

#[tokio::test]
async fn test_unknown_device_is_dropped_silently() {
    let mut h = harness().await;

    h.session
        .send(&set_property(Some("a1"), "ghost", "on", Value::Bool(true)))
        .unwrap();
    expect_silence(&mut h.session).await;

    h.session
        .send(&set_property(Some("a9"), "d1", "on", Value::Bool(true)))
        .unwrap();
    expect_silence(&mut h.session).await;

    // The router keeps serving known targets
    h.session
        .send(&set_property(Some("a1"), "d1", "on", Value::Bool(true)))
        .unwrap();
    assert!(matches!(next(&mut h.session).await, Message::PropertyChanged(_)));
    assert!(!h.router.is_closed());
}

#[tokio::test]
async fn test_rejected_write_reports_current_value() {
    let mut h = harness().await;

    h.session
        .send(&set_property(Some("a1"), "d2", "on", Value::Bool(true)))
        .unwrap();

    match next(&mut h.session).await {
        Message::PropertyChanged(changed) => {
            assert_eq!(changed.device_id, "d2");
            assert_eq!(changed.property["value"], false);
        }
        other => panic!("expected PROPERTY_CHANGED, got {other:?}"),
    }
}

#[tokio::test]
async fn test_request_action_responses() {
    let mut h = harness().await;

    for (name, success) in [("reboot", true), ("explode", false)] {
        h.session
            .send(&Message::RequestAction(RequestAction {
                adapter_id: Some("a1".to_string()),
                device_id: "d1".to_string(),
                action_id: format!("{name}-1"),
                name: name.to_string(),
                input: Value::Null,
            }))
            .unwrap();

        match next(&mut h.session).await {
            Message::RequestActionResponse(response) => {
                assert_eq!(response.action_id, format!("{name}-1"));
                assert_eq!(response.success, success);
                assert_eq!(response.error.is_some(), !success);
            }
            other => panic!("expected REQUEST_ACTION_RESPONSE, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_set_pin_unsupported_reports_failure() {
    let mut h = harness().await;

    h.session
        .send(&Message::SetPin(SetPin {
            adapter_id: "a1".to_string(),
            device_id: "d1".to_string(),
            pin: "1234".to_string(),
            message_id: 42,
        }))
        .unwrap();

    match next(&mut h.session).await {
        Message::SetPinResponse(response) => {
            assert_eq!(response.message_id, 42);
            assert!(!response.success);
            assert!(response.device.is_none());
        }
        other => panic!("expected SET_PIN_RESPONSE, got {other:?}"),
    }
}

#[tokio::test]
async fn test_remove_device_reports_removal() {
    let mut h = harness().await;
    let target = AdapterDeviceRef {
        adapter_id: "a1".to_string(),
        device_id: "d1".to_string(),
    };

    h.session.send(&Message::RemoveDevice(target.clone())).unwrap();
    assert_eq!(next(&mut h.session).await, Message::DeviceRemoved(target));
}

#[tokio::test]
async fn test_outlet_notify_round_trip() {
    let mut h = harness().await;
    let outlet = Arc::new(MockOutlet::default());
    h.router.add_notifier(Arc::new(MockNotifier {
        outlet: Arc::clone(&outlet),
    }));
    assert!(matches!(next(&mut h.session).await, Message::NotifierAdded(n) if n.notifier_id == "n1"));

    h.session
        .send(&Message::OutletNotify(OutletNotify {
            notifier_id: "n1".to_string(),
            outlet_id: "o1".to_string(),
            title: "Door".to_string(),
            message: "Front door opened".to_string(),
            level: 2,
            message_id: 7,
        }))
        .unwrap();

    match next(&mut h.session).await {
        Message::OutletNotifyResponse(response) => {
            assert_eq!(response.message_id, 7);
            assert!(response.success);
        }
        other => panic!("expected OUTLET_NOTIFY_RESPONSE, got {other:?}"),
    }
    assert_eq!(
        *outlet.delivered.lock().unwrap(),
        vec![("Door".to_string(), NotificationLevel::High)]
    );
}

#[tokio::test]
async fn test_api_request_success_and_failure() {
    let mut h = harness().await;
    h.router.add_api_handler(Arc::new(EchoApi));
    assert!(matches!(next(&mut h.session).await, Message::ApiHandlerAdded(a) if a.package_name == "echo-api"));

    for (path, status) in [("/things", 200), ("/fail", 500)] {
        h.session
            .send(&Message::ApiRequest(ApiRequestMessage {
                package_name: "echo-api".to_string(),
                message_id: 3,
                request: ApiRequest {
                    method: "GET".to_string(),
                    path: path.to_string(),
                    query: Value::Null,
                    body: Value::Null,
                },
            }))
            .unwrap();

        match next(&mut h.session).await {
            Message::ApiResponse(reply) => {
                assert_eq!(reply.message_id, 3);
                assert_eq!(reply.response.status, status);
            }
            other => panic!("expected API_RESPONSE, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_manager_notifications_reach_gateway() {
    let mut h = harness().await;

    h.router.handle_device_added("a1", h.d1.as_ref());
    h.router.send_connected_notification("a1", "d1", true);
    h.router
        .send_event_notification("a1", "d1", json!({ "name": "pressed" }));
    h.router
        .send_pairing_prompt("a1", "Press the button", None, Some("d1"));

    assert!(matches!(next(&mut h.session).await, Message::DeviceAdded(d) if d.device["id"] == "d1"));
    assert!(matches!(next(&mut h.session).await, Message::Connected(c) if c.connected));
    assert!(matches!(next(&mut h.session).await, Message::Event(e) if e.event["name"] == "pressed"));
    match next(&mut h.session).await {
        Message::PairingPrompt(prompt) => {
            assert_eq!(prompt.prompt, "Press the button");
            assert_eq!(prompt.device_id.as_deref(), Some("d1"));
            assert!(prompt.url.is_none());
        }
        other => panic!("expected PAIRING_PROMPT, got {other:?}"),
    }
}

#[tokio::test]
async fn test_removed_adapter_is_unknown() {
    let mut h = harness().await;

    h.router.remove_adapter("a1");
    // Commands and inbound messages share no ordering, give the removal a moment
    tokio::time::sleep(Duration::from_millis(50)).await;

    h.session
        .send(&set_property(Some("a1"), "d1", "on", Value::Bool(true)))
        .unwrap();
    expect_silence(&mut h.session).await;
}

#[tokio::test]
async fn test_unload_acknowledges_and_closes() {
    let mut h = harness().await;

    h.session
        .send(&Message::Unload(PluginRef {
            plugin_id: "acme".to_string(),
        }))
        .unwrap();

    assert_eq!(
        next(&mut h.session).await,
        Message::UnloadResponse(PluginRef {
            plugin_id: "acme".to_string()
        })
    );

    tokio::time::timeout(Duration::from_secs(5), h.router.closed())
        .await
        .expect("router did not close");
    assert!(h.adapter.was_unloaded());
    assert!(h.router.is_closed());

    // Calls after close are dropped without panicking
    h.router.send_error("too late");
}

#[tokio::test]
async fn test_unload_for_other_plugin_is_ignored() {
    let mut h = harness().await;

    h.session
        .send(&Message::Unload(PluginRef {
            plugin_id: "someone-else".to_string(),
        }))
        .unwrap();
    expect_silence(&mut h.session).await;
    assert!(!h.router.is_closed());
    assert!(!h.adapter.was_unloaded());
}

#[tokio::test]
async fn test_shutdown_closes_router() {
    let h = harness().await;

    h.router.shutdown();
    tokio::time::timeout(Duration::from_secs(5), h.router.closed())
        .await
        .expect("router did not close");

    // Shutdown does not unload collaborators
    assert!(!h.adapter.was_unloaded());
}

#[tokio::test]
async fn test_malformed_frames_never_reach_router() {
    let mut gateway = FakeGateway::start();
    let mut client = gateway.client("acme");
    client.register().unwrap();
    let mut listener = gateway.accept_raw("acme.session").await;
    let router = client.wait_registered().await.unwrap().router;
    let mut pipe = listener.recv().await.expect("plugin did not connect");

    let d1 = Arc::new(MockDevice::new("d1"));
    router.add_adapter(Arc::new(MockAdapter::new("a1", vec![d1])));

    let validator = MessageValidator::global();
    let frame = read_frame(&mut pipe, DEFAULT_MAX_FRAME_BYTES).await.unwrap().unwrap();
    assert!(matches!(validator.validate(&frame), Ok(Message::AdapterAdded(_))));

    write_frame(&mut pipe, b"\xff\xfe not json").await.unwrap();
    write_frame(&mut pipe, br#"{"messageType":"SET_PROPERTY","data":{"deviceId":"d1"}}"#)
        .await
        .unwrap();
    write_frame(
        &mut pipe,
        &set_property(Some("a1"), "d1", "on", Value::Bool(true))
            .to_bytes()
            .unwrap(),
    )
    .await
    .unwrap();

    // Only the valid request produces a reply
    let frame = tokio::time::timeout(
        Duration::from_secs(5),
        read_frame(&mut pipe, DEFAULT_MAX_FRAME_BYTES),
    )
    .await
    .expect("no reply")
    .unwrap()
    .unwrap();
    match validator.validate(&frame).unwrap() {
        Message::PropertyChanged(changed) => assert_eq!(changed.property["value"], true),
        other => panic!("expected PROPERTY_CHANGED, got {other:?}"),
    }
    assert!(!router.is_closed());
}

#[tokio::test]
async fn test_successful_pin_is_acknowledged_without_device_description() {
    let mut h = harness().await;

    let replies = [("a2", Value::Null), ("a3", json!({ "id": "d3", "title": "Paired lamp" }))];
    for (adapter_id, reply) in replies.clone() {
        let device = Arc::new(MockDevice::new("d3"));
        h.router
            .add_adapter(Arc::new(MockAdapter::accepting_pins(adapter_id, vec![device], reply)));
        assert!(matches!(next(&mut h.session).await, Message::AdapterAdded(a) if a.adapter_id == adapter_id));
    }

    for (adapter_id, reply) in replies {
        h.session
            .send(&Message::SetPin(SetPin {
                adapter_id: adapter_id.to_string(),
                device_id: "d3".to_string(),
                pin: "1234".to_string(),
                message_id: 9,
            }))
            .unwrap();

        match next(&mut h.session).await {
            Message::SetPinResponse(response) => {
                assert_eq!(response.adapter_id, adapter_id);
                assert_eq!(response.message_id, 9);
                assert!(response.success);
                assert_eq!(response.device.map(Value::Object), reply.is_object().then_some(reply));
            }
            other => panic!("expected SET_PIN_RESPONSE, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_outbound_messages_failing_schema_are_dropped() {
    let mut h = harness().await;
    h.router.add_adapter(Arc::new(MockAdapter::new(
        "a2",
        vec![Arc::new(MockDevice::bare("d3"))],
    )));
    assert!(matches!(next(&mut h.session).await, Message::AdapterAdded(a) if a.adapter_id == "a2"));

    // The device reports `true` instead of a property object
    h.session
        .send(&set_property(Some("a2"), "d3", "on", Value::Bool(true)))
        .unwrap();
    expect_silence(&mut h.session).await;

    h.router
        .send_property_changed_notification("a1", "d1", json!({ "value": true }));
    h.router
        .send_property_changed_notification("a1", "d1", json!({ "name": "on", "value": true }));

    match next(&mut h.session).await {
        Message::PropertyChanged(changed) => assert_eq!(changed.property["name"], "on"),
        other => panic!("expected PROPERTY_CHANGED, got {other:?}"),
    }
    assert!(!h.router.is_closed());
}

#[tokio::test]
async fn test_oversized_frame_costs_only_itself() {
    let mut gateway = FakeGateway::start();
    let mut client = gateway.client("acme");
    client.register().unwrap();
    let mut listener = gateway.accept_raw("acme.session").await;
    let router = client.wait_registered().await.unwrap().router;
    let mut pipe = listener.recv().await.expect("plugin did not connect");

    router.add_adapter(Arc::new(MockAdapter::new("a1", vec![Arc::new(MockDevice::new("d1"))])));
    let validator = MessageValidator::global();
    let frame = read_frame(&mut pipe, DEFAULT_MAX_FRAME_BYTES).await.unwrap().unwrap();
    assert!(matches!(validator.validate(&frame), Ok(Message::AdapterAdded(_))));

    write_frame(&mut pipe, &vec![b' '; DEFAULT_MAX_FRAME_BYTES + 1])
        .await
        .unwrap();
    write_frame(
        &mut pipe,
        &set_property(Some("a1"), "d1", "on", Value::Bool(true))
            .to_bytes()
            .unwrap(),
    )
    .await
    .unwrap();

    let frame = tokio::time::timeout(
        Duration::from_secs(5),
        read_frame(&mut pipe, DEFAULT_MAX_FRAME_BYTES),
    )
    .await
    .expect("no reply")
    .unwrap()
    .unwrap();
    assert!(matches!(validator.validate(&frame), Ok(Message::PropertyChanged(_))));
    assert!(!router.is_closed());
}
