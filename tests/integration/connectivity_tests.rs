//! Broker session behaviour across connects, disconnects, and fatal
//! transport errors, observed on the wire through a recording transport.

use homelink::error::MqttError;
use homelink::mqtt::transport::{BrokerConfig, Qos, SessionEvent};
use homelink::mqtt::{DEFAULT_QOS, MqttClient};

use crate::mocks::{RecordingTransport, WireCall};

fn config() -> BrokerConfig {
    BrokerConfig {
        uri: "mqtt://10.0.0.5".into(),
        username: Some("device".into()),
        password: Some("hunter2".into()),
        topic_base: "home/node1/".into(),
        keepalive_secs: 120,
        last_will: None,
    }
}

#[test]
fn replay_order_matches_registration_order() {
    let wire = RecordingTransport::new();
    let mut client = MqttClient::new(wire.clone());
    client.configure(config());
    client.add_subscription("a", Qos::AtLeastOnce);
    client.add_subscription("b", Qos::ExactlyOnce);
    client.start().unwrap();

    client.handle_event(SessionEvent::Connected);
    assert_eq!(wire.subscribes(), vec!["a".to_string(), "b".to_string()]);
}

#[test]
fn each_reconnect_replays_the_full_set() {
    let wire = RecordingTransport::new();
    let mut client = MqttClient::new(wire.clone());
    client.configure(config());
    client.add_subscription("cmd", DEFAULT_QOS);
    client.start().unwrap();

    for _ in 0..3 {
        client.handle_event(SessionEvent::Connected);
        client.handle_event(SessionEvent::Disconnected);
    }
    assert_eq!(wire.subscribes(), vec!["cmd"; 3]);
}

#[test]
fn replay_happens_before_application_publishes() {
    let wire = RecordingTransport::new();
    let mut client = MqttClient::new(wire.clone());
    client.configure(config());
    client.add_subscription("cmd", DEFAULT_QOS);
    client.start().unwrap();

    client.handle_event(SessionEvent::Connected);
    client
        .publish("home/node1/status", b"up", DEFAULT_QOS, false)
        .unwrap();

    let calls = wire.calls();
    let subscribe_idx = calls
        .iter()
        .position(|c| matches!(c, WireCall::Subscribe(..)))
        .unwrap();
    let publish_idx = calls
        .iter()
        .position(|c| matches!(c, WireCall::Publish { .. }))
        .unwrap();
    assert!(subscribe_idx < publish_idx);
}

#[test]
fn disconnected_publish_is_an_error_with_no_wire_traffic() {
    let wire = RecordingTransport::new();
    let mut client = MqttClient::new(wire.clone());
    client.configure(config());
    client.start().unwrap();

    assert_eq!(
        client.publish("home/node1/status", b"up", DEFAULT_QOS, false),
        Err(MqttError::NotConnected)
    );
    client.handle_event(SessionEvent::Connected);
    client.handle_event(SessionEvent::Disconnected);
    assert_eq!(
        client.publish("home/node1/status", b"up", DEFAULT_QOS, false),
        Err(MqttError::NotConnected)
    );
    assert!(wire.publishes().is_empty());
}

#[test]
fn fatal_error_stops_all_further_dispatch() {
    let wire = RecordingTransport::new();
    let mut client = MqttClient::new(wire.clone());
    client.configure(config());
    client.add_subscription("cmd", DEFAULT_QOS);
    client.start().unwrap();

    client.handle_event(SessionEvent::Connected);
    client.handle_event(SessionEvent::FatalError);
    assert!(client.is_poisoned());

    // Events for the dead session are swallowed: no replay, no inbound.
    let before = wire.calls().len();
    assert_eq!(client.handle_event(SessionEvent::Connected), None);
    assert_eq!(
        client.handle_event(SessionEvent::Message {
            topic: "home/node1/cmd".into(),
            payload: b"x".to_vec(),
        }),
        None
    );
    assert_eq!(wire.calls().len(), before);
}

#[test]
fn inbound_messages_route_to_the_caller() {
    let wire = RecordingTransport::new();
    let mut client = MqttClient::new(wire);
    client.configure(config());
    client.start().unwrap();
    client.handle_event(SessionEvent::Connected);

    let msg = client
        .handle_event(SessionEvent::Message {
            topic: "home/node1/cmd".into(),
            payload: b"identify".to_vec(),
        })
        .unwrap();
    assert_eq!(msg.topic, "home/node1/cmd");
    assert_eq!(msg.payload, b"identify");
}
