//! Whole-lifecycle sequences through the supervisor: boot-image gating,
//! broker bring-up from stored settings, and the update route.

use homelink::mqtt::{DEFAULT_QOS, MqttClient};
use homelink::ota::Updater;
use homelink::ota::platform::ImageState;
use homelink::store::medium::MemoryMedium;
use homelink::store::value::Value;
use homelink::store::{ConfigStore, OpenMode};
use homelink::supervisor::{BootVerdict, Supervisor};
use homelink::system::HostSystem;

use crate::mocks::{MockOtaTransport, RecordingTransport, SharedSlot};

fn store_with_broker_settings() -> ConfigStore<MemoryMedium> {
    let store = ConfigStore::new(MemoryMedium::new()).unwrap();
    let mut h = store.open("mqtt", OpenMode::ReadWrite).unwrap();
    h.set("broker", Value::Str("mqtt://10.0.0.5".into())).unwrap();
    h.set("topic-base", Value::Str("home/node1/".into())).unwrap();
    h.commit().unwrap();
    store
}

fn supervisor_over(
    store: ConfigStore<MemoryMedium>,
    wire: RecordingTransport,
    ota: MockOtaTransport,
    slot: SharedSlot,
) -> Supervisor<MemoryMedium, RecordingTransport, MockOtaTransport, SharedSlot, HostSystem> {
    Supervisor::new(
        store,
        MqttClient::new(wire),
        Updater::new(ota, slot),
        HostSystem::new(),
    )
}

#[test]
fn cold_boot_to_steady_state() {
    let store = store_with_broker_settings();
    let wire = RecordingTransport::new();
    let slot = SharedSlot::new(ImageState::Valid);
    let mut sup = supervisor_over(
        store,
        wire.clone(),
        MockOtaTransport::default(),
        slot.clone(),
    );

    // 1. Trusted image: the gate is a no-op.
    assert_eq!(sup.verify_boot_image(|| true).unwrap(), BootVerdict::NotPending);

    // 2. Broker session from stored settings, command topic registered.
    sup.start_connectivity(&[("cmd", DEFAULT_QOS)], None).unwrap();
    sup.handle_session_event(homelink::mqtt::transport::SessionEvent::Connected);
    assert!(sup.is_broker_connected());

    // 3. Subscription replayed under the configured prefix, then a
    //    publish goes out under the same prefix.
    sup.publish("status", b"up", DEFAULT_QOS, false).unwrap();
    assert_eq!(wire.subscribes(), vec!["home/node1/cmd".to_string()]);
    assert_eq!(wire.publishes(), vec!["home/node1/status".to_string()]);
}

#[test]
fn fresh_image_commits_when_healthy() {
    let store = store_with_broker_settings();
    let slot = SharedSlot::new(ImageState::PendingVerify);
    let mut sup = supervisor_over(
        store,
        RecordingTransport::new(),
        MockOtaTransport::default(),
        slot.clone(),
    );

    assert_eq!(sup.verify_boot_image(|| true).unwrap(), BootVerdict::Committed);
    assert!(!slot.rolled_back());
    // Committed: the next boot sees a trusted image.
    assert_eq!(
        sup.verify_boot_image(|| panic!("gate must not re-run")).unwrap(),
        BootVerdict::NotPending
    );
}

#[test]
fn fresh_image_rolls_back_when_diagnostics_fail() {
    let store = store_with_broker_settings();
    let slot = SharedSlot::new(ImageState::PendingVerify);
    let mut sup = supervisor_over(
        store,
        RecordingTransport::new(),
        MockOtaTransport::default(),
        slot.clone(),
    );

    assert_eq!(
        sup.verify_boot_image(|| false).unwrap(),
        BootVerdict::RolledBack
    );
    assert!(slot.rolled_back());
}

#[test]
fn update_route_attaches_bearer_header_and_reboots() {
    let store = store_with_broker_settings();
    let ota = MockOtaTransport::default();
    let requests = ota.requests.clone();
    let mut sup = supervisor_over(
        store,
        RecordingTransport::new(),
        ota,
        SharedSlot::new(ImageState::Valid),
    );

    sup.updater_mut().add_bearer_token("tok-123");
    sup.handle_update_request(br#"{"url":"https://images.example/fw.bin"}"#)
        .unwrap();

    let requests = requests.lock().unwrap();
    let (url, headers) = &requests[0];
    assert_eq!(url, "https://images.example/fw.bin");
    assert_eq!(headers[0].name, "Authorization");
    assert_eq!(headers[0].value, "Bearer tok-123");
}

#[test]
fn failed_update_is_reported_and_leaves_image_alone() {
    let store = store_with_broker_settings();
    let ota = MockOtaTransport {
        fail_with: Some(homelink::error::UpdateError::Transport),
        ..Default::default()
    };
    let slot = SharedSlot::new(ImageState::Valid);
    let mut sup = supervisor_over(store, RecordingTransport::new(), ota, slot.clone());

    let err = sup
        .handle_update_request(br#"{"url":"https://images.example/fw.bin"}"#)
        .unwrap_err();
    assert!(err.message.contains("firmware update failed"));
    assert!(!slot.rolled_back());
}

#[test]
fn malformed_update_body_never_reaches_the_transport() {
    let store = store_with_broker_settings();
    let ota = MockOtaTransport::default();
    let requests = ota.requests.clone();
    let mut sup = supervisor_over(
        store,
        RecordingTransport::new(),
        ota,
        SharedSlot::new(ImageState::Valid),
    );

    assert!(sup.handle_update_request(b"not json").is_err());
    assert!(sup.handle_update_request(br#"{"url":""}"#).is_err());
    assert!(requests.lock().unwrap().is_empty());
}

#[test]
fn info_route_reports_without_mutating() {
    let store = store_with_broker_settings();
    let mut h = store.open("system", OpenMode::ReadWrite).unwrap();
    h.set("hostname", Value::Str("porch-node".into())).unwrap();
    h.commit().unwrap();

    let sup = supervisor_over(
        store.clone(),
        RecordingTransport::new(),
        MockOtaTransport::default(),
        SharedSlot::new(ImageState::Valid),
    );

    let body = sup.handle_info();
    let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(parsed["hostname"], "porch-node");
    assert!(parsed["uptime-msec"].is_u64());
    assert!(parsed["wifi-mac-address"].as_str().unwrap().contains(':'));

    // Still exactly the entries we wrote: reporting mutated nothing.
    assert_eq!(store.entries(None).count(), 3);
}
