//! Onboarding and reconnection flows through the coordinator's public
//! surface: blocking provision, retry ceiling, and the reprovision
//! trigger.

use std::sync::mpsc;

use homelink::device_id;
use homelink::drivers::status_led::LogStatusSink;
use homelink::error::CredentialFailReason;
use homelink::provision::Provisioner;
use homelink::provision::fsm::{MAX_CREDENTIAL_RETRIES, ProvisionState, WifiEvent};

use crate::mocks::{MockWifi, WifiCall};

fn service_name() -> device_id::ServiceName {
    device_id::service_name(&device_id::read_mac())
}

#[test]
fn first_boot_onboarding_to_connected() {
    let (tx, rx) = mpsc::channel();
    let wifi = MockWifi::default();
    let mut prov = Provisioner::new(wifi.clone(), LogStatusSink::new(), service_name(), rx);
    let signal = prov.connected_signal();

    tx.send(WifiEvent::OnboardingStarted).unwrap();
    tx.send(WifiEvent::CredentialsReceived).unwrap();
    tx.send(WifiEvent::CredentialsAccepted).unwrap();
    tx.send(WifiEvent::OnboardingComplete).unwrap();
    tx.send(WifiEvent::StationStarted).unwrap();
    tx.send(WifiEvent::GotIp).unwrap();

    prov.provision("CH", "pop-secret").unwrap();

    assert_eq!(prov.state(), ProvisionState::Connected);
    assert!(signal.is_set());
    signal.wait(); // latched — returns immediately

    // The service name the onboarding advertised is MAC-derived.
    let calls = wifi.calls();
    assert!(matches!(
        &calls[1],
        WifiCall::StartOnboarding { service, .. } if service == "PROV_EFCAFE"
    ));
    // Country code was applied before onboarding started.
    assert_eq!(calls[0], WifiCall::ApplyCountry("CH".into()));
}

#[test]
fn provisioned_device_skips_onboarding_entirely() {
    let (tx, rx) = mpsc::channel();
    let wifi = MockWifi::provisioned();
    let mut prov = Provisioner::new(wifi.clone(), LogStatusSink::new(), service_name(), rx);

    tx.send(WifiEvent::StationStarted).unwrap();
    tx.send(WifiEvent::GotIp).unwrap();
    prov.provision("CH", "pop-secret").unwrap();

    assert_eq!(prov.state(), ProvisionState::Connected);
    assert!(
        !wifi
            .calls()
            .iter()
            .any(|c| matches!(c, WifiCall::StartOnboarding { .. }))
    );
}

#[test]
fn credential_retries_exhaust_into_fresh_onboarding() {
    let (tx, rx) = mpsc::channel();
    let wifi = MockWifi::default();
    let mut prov = Provisioner::new(wifi.clone(), LogStatusSink::new(), service_name(), rx);

    for _ in 0..MAX_CREDENTIAL_RETRIES {
        tx.send(WifiEvent::CredentialsFailed(CredentialFailReason::AuthError))
            .unwrap();
    }
    // After the reset the user provisions again, successfully this time.
    tx.send(WifiEvent::CredentialsReceived).unwrap();
    tx.send(WifiEvent::CredentialsAccepted).unwrap();
    tx.send(WifiEvent::GotIp).unwrap();

    prov.provision("CH", "pop-secret").unwrap();
    assert_eq!(prov.retry_count(), 0);
    assert_eq!(prov.state(), ProvisionState::Connected);
    assert!(wifi.calls().contains(&WifiCall::ClearCredentials));
}

#[test]
fn steady_state_reconnects_after_disconnect() {
    let (tx, rx) = mpsc::channel();
    let wifi = MockWifi::provisioned();
    let mut prov = Provisioner::new(wifi.clone(), LogStatusSink::new(), service_name(), rx);

    tx.send(WifiEvent::GotIp).unwrap();
    prov.provision("CH", "pop-secret").unwrap();

    // Two drops while in steady state: both trigger immediate reconnects.
    tx.send(WifiEvent::Disconnected).unwrap();
    tx.send(WifiEvent::GotIp).unwrap();
    tx.send(WifiEvent::Disconnected).unwrap();
    tx.send(WifiEvent::GotIp).unwrap();
    drop(tx);
    prov.run();

    assert_eq!(prov.state(), ProvisionState::Connected);
    let reconnects = wifi
        .calls()
        .iter()
        .filter(|c| **c == WifiCall::ConnectStation)
        .count();
    // begin() connect + one per disconnect.
    assert_eq!(reconnects, 3);
}

#[test]
fn reset_request_discards_credentials_without_restarting_the_machine() {
    let (tx, rx) = mpsc::channel();
    let wifi = MockWifi::provisioned();
    let mut prov = Provisioner::new(wifi.clone(), LogStatusSink::new(), service_name(), rx);

    tx.send(WifiEvent::GotIp).unwrap();
    prov.provision("CH", "pop-secret").unwrap();

    // The reprovision watcher posts into the same inbox the driver uses;
    // the reboot that follows is the watcher's job, not the machine's.
    tx.send(WifiEvent::ResetRequested).unwrap();
    drop(tx);
    prov.run();

    assert!(!wifi.has_credentials());
    assert_eq!(prov.state(), ProvisionState::Connected);
    assert_eq!(prov.retry_count(), 0);
}
