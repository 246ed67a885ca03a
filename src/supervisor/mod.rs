//! Device lifecycle orchestrator.
//!
//! Owns one instance of each component for the process lifetime and wires
//! them together with explicit dependency injection — no global state, no
//! lazily constructed singletons. The startup sequence is:
//!
//! 1. read hostname + broker settings from the store,
//! 2. hand off to the provisioning coordinator and block on the
//!    connected signal,
//! 3. gate a freshly flashed image: `pending_verification()` → commit or
//!    rollback against a pluggable health check,
//! 4. configure and start the broker session (subscriptions registered
//!    before start replay on every connect).
//!
//! The reprovision trigger watcher is a background polling loop: a
//! sustained hold discards the stored WiFi credentials — not just a
//! process restart — and then reboots into onboarding.

pub mod info;
pub mod routes;

use std::sync::mpsc::Sender;

use log::{info as log_info, warn};

use crate::drivers::button::{HoldDetector, HoldEvent};
use crate::error::{MqttError, UpdateError};
use crate::mqtt::transport::{LastWill, MqttTransport, Qos, SessionEvent};
use crate::mqtt::{InboundMessage, MqttClient};
use crate::ota::Updater;
use crate::ota::platform::{BootSlotPort, OtaTransport};
use crate::provision::fsm::WifiEvent;
use crate::store::medium::StorageMedium;
use crate::store::{ConfigStore, OpenMode};
use crate::system::SystemPort;
use crate::{device_id, mqtt};
use self::routes::ApiError;

/// Store namespace for device-level settings.
pub const SYSTEM_NAMESPACE: &str = "system";

/// Default broker keepalive when nothing else is configured.
pub const DEFAULT_KEEPALIVE_SECS: u16 = 120;

// ── Supervisor ────────────────────────────────────────────────

pub struct Supervisor<M, T, OT, B, S>
where
    M: StorageMedium,
    T: MqttTransport,
    OT: OtaTransport,
    B: BootSlotPort,
    S: SystemPort,
{
    store: ConfigStore<M>,
    mqtt: MqttClient<T>,
    updater: Updater<OT, B>,
    system: S,
    hostname: String,
}

impl<M, T, OT, B, S> Supervisor<M, T, OT, B, S>
where
    M: StorageMedium,
    T: MqttTransport,
    OT: OtaTransport,
    B: BootSlotPort,
    S: SystemPort,
{
    pub fn new(
        store: ConfigStore<M>,
        mqtt: MqttClient<T>,
        updater: Updater<OT, B>,
        system: S,
    ) -> Self {
        let hostname = Self::read_hostname(&store);
        Self {
            store,
            mqtt,
            updater,
            system,
            hostname,
        }
    }

    /// Hostname from `system:hostname`, falling back to the MAC-derived
    /// default.
    fn read_hostname(store: &ConfigStore<M>) -> String {
        let stored = store
            .open(SYSTEM_NAMESPACE, OpenMode::ReadOnly)
            .ok()
            .and_then(|h| h.get_string("hostname").ok());
        match stored {
            Some(name) if !name.is_empty() => name,
            _ => device_id::default_hostname(&device_id::read_mac()).to_string(),
        }
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn store(&self) -> &ConfigStore<M> {
        &self.store
    }

    pub fn updater_mut(&mut self) -> &mut Updater<OT, B> {
        &mut self.updater
    }

    // ── Boot-image gate ───────────────────────────────────────

    /// Decide the fate of a freshly flashed image, once, at boot. The
    /// health check is a pluggable predicate; a device that passes gets
    /// the image committed, one that fails rolls back into the previous
    /// known-good image before anything else runs.
    pub fn verify_boot_image(
        &mut self,
        healthy: impl FnOnce() -> bool,
    ) -> Result<BootVerdict, UpdateError> {
        if !self.updater.pending_verification() {
            return Ok(BootVerdict::NotPending);
        }
        if healthy() {
            log_info!("supervisor: new image passed diagnostics, committing");
            self.updater.commit()?;
            Ok(BootVerdict::Committed)
        } else {
            warn!("supervisor: new image failed diagnostics, rolling back");
            self.updater.rollback()?;
            // Only reachable on the host; hardware never returns here.
            Ok(BootVerdict::RolledBack)
        }
    }

    // ── Connectivity ──────────────────────────────────────────

    /// Load broker settings from the store, register the given
    /// subscriptions (topics are prefixed with the configured base), and
    /// start the session.
    pub fn start_connectivity(
        &mut self,
        subscriptions: &[(&str, Qos)],
        last_will: Option<LastWill>,
    ) -> Result<(), MqttError> {
        let config = mqtt::transport::BrokerConfig::from_store(
            &self.store,
            DEFAULT_KEEPALIVE_SECS,
            last_will,
        )?;
        self.mqtt.configure(config);
        for (topic, qos) in subscriptions {
            let full = self.mqtt.prefixed(topic);
            self.mqtt.add_subscription(&full, *qos);
        }
        self.mqtt.start()
    }

    /// Publish under the configured topic base.
    pub fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: Qos,
        retain: bool,
    ) -> Result<(), MqttError> {
        let full = self.mqtt.prefixed(topic);
        self.mqtt.publish(&full, payload, qos, retain)
    }

    /// Feed one broker-session event through the client.
    pub fn handle_session_event(&mut self, event: SessionEvent) -> Option<InboundMessage> {
        self.mqtt.handle_event(event)
    }

    pub fn is_broker_connected(&self) -> bool {
        self.mqtt.is_connected()
    }

    // ── External routes ───────────────────────────────────────

    pub fn handle_set_key(
        &self,
        namespace: &str,
        key: &str,
        body: &[u8],
    ) -> Result<String, ApiError> {
        routes::set_key(&self.store, namespace, key, body)
    }

    pub fn handle_get_key(&self, namespace: &str, key: &str) -> Result<String, ApiError> {
        routes::get_key(&self.store, namespace, key)
    }

    pub fn handle_get_all(&self) -> Result<String, ApiError> {
        routes::get_all(&self.store)
    }

    pub fn handle_delete_key(&self, namespace: &str, key: &str) -> Result<String, ApiError> {
        routes::delete_key(&self.store, namespace, key)
    }

    pub fn handle_delete_namespace(&self, namespace: &str) -> Result<String, ApiError> {
        routes::delete_namespace(&self.store, namespace)
    }

    /// `POST /firmware-upgrade`: parse `{url}` and run the update. On
    /// hardware a successful flash reboots before any response is sent;
    /// only failures come back as an `ApiError`.
    pub fn handle_update_request(&mut self, body: &[u8]) -> Result<(), ApiError> {
        let url = routes::parse_update_request(body)?;
        self.updater
            .update(&url, &mut self.system)
            .map_err(|e| ApiError::new(format!("firmware update failed: {e}")))
    }

    /// `POST /reset`: plain reboot, credentials untouched.
    pub fn handle_reset_request(&mut self) {
        log_info!("supervisor: reset requested over API");
        self.system.restart();
    }

    /// `GET /info`: read-only snapshot.
    pub fn handle_info(&self) -> String {
        let mac = device_id::mac_string(&device_id::read_mac());
        info::InfoSnapshot::capture(&self.system, &self.hostname, mac.as_str()).to_json()
    }
}

/// Outcome of the boot-image gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootVerdict {
    /// Running image was already trusted.
    NotPending,
    /// Fresh image accepted.
    Committed,
    /// Fresh image rejected; reboot into the previous image requested.
    RolledBack,
}

// ── Reprovision trigger watcher ───────────────────────────────

/// Polls a physical input; a sustained hold discards stored credentials
/// through the provisioning inbox and reboots the device.
pub struct ResetWatcher<S: SystemPort> {
    detector: HoldDetector,
    events: Sender<WifiEvent>,
    system: S,
}

impl<S: SystemPort> ResetWatcher<S> {
    pub fn new(events: Sender<WifiEvent>, system: S) -> Self {
        Self {
            detector: HoldDetector::new(),
            events,
            system,
        }
    }

    /// Feed one poll sample. On a completed hold the credential reset is
    /// queued before the restart so the provisioning loop observes it
    /// first.
    pub fn poll(&mut self, pressed: bool) -> Option<HoldEvent> {
        let now_ms = self.system.uptime_ms() as u32;
        let event = self.detector.sample(now_ms, pressed);
        if event == Some(HoldEvent::HoldCompleted) {
            log_info!("supervisor: reprovision hold complete, discarding credentials");
            if self.events.send(WifiEvent::ResetRequested).is_err() {
                warn!("supervisor: provisioning inbox gone, rebooting anyway");
            }
            self.system.restart();
        }
        event
    }

    /// Blocking poll loop for the watcher thread. `pressed` reads the
    /// input level; the cadence matches the original 500 ms scan.
    pub fn run(&mut self, mut pressed: impl FnMut() -> bool) {
        loop {
            self.poll(pressed());
            std::thread::sleep(std::time::Duration::from_millis(500));
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::UpdateError;
    use crate::mqtt::transport::BrokerConfig;
    use crate::ota::platform::{HttpHeader, ImageState};
    use crate::store::medium::MemoryMedium;
    use crate::store::value::Value;
    use crate::system::HostSystem;
    use std::sync::mpsc;

    // Minimal recording mocks, mirroring the integration-test style.

    #[derive(Default)]
    struct NullMqtt;
    impl MqttTransport for NullMqtt {
        fn start(&mut self, _c: &BrokerConfig) -> Result<(), MqttError> {
            Ok(())
        }
        fn subscribe(&mut self, _t: &str, _q: Qos) -> Result<(), MqttError> {
            Ok(())
        }
        fn publish(
            &mut self,
            _t: &str,
            _p: &[u8],
            _q: Qos,
            _r: bool,
        ) -> Result<(), MqttError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct NullOta {
        fail: bool,
    }
    impl OtaTransport for NullOta {
        fn fetch_and_flash(&mut self, _u: &str, _h: &[HttpHeader]) -> Result<(), UpdateError> {
            if self.fail {
                Err(UpdateError::Transport)
            } else {
                Ok(())
            }
        }
    }

    struct FixedSlot {
        state: ImageState,
    }
    impl FixedSlot {
        fn new(state: ImageState) -> Self {
            Self { state }
        }
    }
    impl BootSlotPort for FixedSlot {
        fn image_state(&self) -> Result<ImageState, UpdateError> {
            Ok(self.state)
        }
        fn mark_valid(&mut self) -> Result<(), UpdateError> {
            self.state = ImageState::Valid;
            Ok(())
        }
        fn mark_invalid_and_rollback(&mut self) -> Result<(), UpdateError> {
            Ok(())
        }
    }

    fn supervisor(
        slot_state: ImageState,
    ) -> Supervisor<MemoryMedium, NullMqtt, NullOta, FixedSlot, HostSystem> {
        let store = ConfigStore::new(MemoryMedium::new()).unwrap();
        Supervisor::new(
            store,
            MqttClient::new(NullMqtt),
            Updater::new(NullOta::default(), FixedSlot::new(slot_state)),
            HostSystem::new(),
        )
    }

    #[test]
    fn hostname_falls_back_to_mac_derived() {
        let sup = supervisor(ImageState::Valid);
        assert_eq!(sup.hostname(), "homelink-efcafe");
    }

    #[test]
    fn hostname_prefers_stored_value() {
        let store = ConfigStore::new(MemoryMedium::new()).unwrap();
        let mut h = store.open(SYSTEM_NAMESPACE, OpenMode::ReadWrite).unwrap();
        h.set("hostname", Value::Str("kitchen-node".into())).unwrap();
        h.commit().unwrap();

        let sup = Supervisor::new(
            store,
            MqttClient::new(NullMqtt),
            Updater::new(NullOta::default(), FixedSlot::new(ImageState::Valid)),
            HostSystem::new(),
        );
        assert_eq!(sup.hostname(), "kitchen-node");
    }

    #[test]
    fn boot_gate_commits_on_healthy() {
        let mut sup = supervisor(ImageState::PendingVerify);
        let verdict = sup.verify_boot_image(|| true).unwrap();
        assert_eq!(verdict, BootVerdict::Committed);
    }

    #[test]
    fn boot_gate_rolls_back_on_unhealthy() {
        let mut sup = supervisor(ImageState::PendingVerify);
        let verdict = sup.verify_boot_image(|| false).unwrap();
        assert_eq!(verdict, BootVerdict::RolledBack);
    }

    #[test]
    fn boot_gate_skips_trusted_image() {
        let mut sup = supervisor(ImageState::Valid);
        // The predicate must not even run for an already-trusted image.
        let verdict = sup
            .verify_boot_image(|| panic!("health check should not run"))
            .unwrap();
        assert_eq!(verdict, BootVerdict::NotPending);
    }

    #[test]
    fn connectivity_requires_broker_settings() {
        let mut sup = supervisor(ImageState::Valid);
        assert_eq!(
            sup.start_connectivity(&[], None),
            Err(MqttError::MissingConfig("broker"))
        );
    }

    #[test]
    fn connectivity_prefixes_subscriptions() {
        let store = ConfigStore::new(MemoryMedium::new()).unwrap();
        let mut h = store.open(mqtt::STORE_NAMESPACE, OpenMode::ReadWrite).unwrap();
        h.set("broker", Value::Str("mqtt://10.0.0.5".into())).unwrap();
        h.set("topic-base", Value::Str("home/node1/".into())).unwrap();
        h.commit().unwrap();

        let mut sup = Supervisor::new(
            store,
            MqttClient::new(NullMqtt),
            Updater::new(NullOta::default(), FixedSlot::new(ImageState::Valid)),
            HostSystem::new(),
        );
        sup.start_connectivity(&[("cmd", Qos::AtLeastOnce)], None)
            .unwrap();
        sup.handle_session_event(SessionEvent::Connected);
        assert!(sup.is_broker_connected());
        // Publish rides the same prefix.
        sup.publish("state", b"up", Qos::AtLeastOnce, false).unwrap();
    }

    #[test]
    fn update_route_reports_failures() {
        let store = ConfigStore::new(MemoryMedium::new()).unwrap();
        let mut sup = Supervisor::new(
            store,
            MqttClient::new(NullMqtt),
            Updater::new(NullOta { fail: true }, FixedSlot::new(ImageState::Valid)),
            HostSystem::new(),
        );
        let err = sup
            .handle_update_request(br#"{"url":"https://x/fw.bin"}"#)
            .unwrap_err();
        assert!(err.message.contains("firmware update failed"));
    }

    #[test]
    fn reset_watcher_discards_credentials_then_reboots() {
        let (tx, rx) = mpsc::channel();
        let mut watcher = ResetWatcher::new(tx, HostSystem::new());
        watcher.detector = detector_at_threshold();

        let fired = watcher.poll(true);
        assert_eq!(fired, Some(HoldEvent::HoldCompleted));
        // Credential reset is queued before the reboot request.
        assert_eq!(rx.try_recv(), Ok(WifiEvent::ResetRequested));
        assert_eq!(watcher.system.restarts_requested, 1);
    }

    #[test]
    fn reset_watcher_ignores_short_holds() {
        let (tx, rx) = mpsc::channel();
        let mut watcher = ResetWatcher::new(tx, HostSystem::new());
        assert_eq!(watcher.poll(true), None);
        assert_eq!(watcher.poll(false), None);
        assert!(rx.try_recv().is_err());
        assert_eq!(watcher.system.restarts_requested, 0);
    }

    /// A detector one sample away from firing at now_ms == 0 (wrapping
    /// arithmetic makes "long ago" representable from any small now).
    fn detector_at_threshold() -> HoldDetector {
        let mut d = HoldDetector::new();
        let start = 0u32.wrapping_sub(20_000);
        d.sample(start, true);
        d.sample(start.wrapping_add(60), true);
        d
    }
}
