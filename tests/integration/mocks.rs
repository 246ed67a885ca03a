//! Recording mock adapters shared by the integration tests.

use std::sync::{Arc, Mutex};

use homelink::error::{MqttError, ProvisionError, UpdateError};
use homelink::mqtt::transport::{BrokerConfig, MqttTransport, Qos};
use homelink::ota::platform::{BootSlotPort, HttpHeader, ImageState, OtaTransport};
use homelink::provision::fsm::WifiPort;

// ── WiFi driver mock ──────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WifiCall {
    ApplyCountry(String),
    StartOnboarding { service: String, pop: String },
    FinishOnboarding,
    ConnectStation,
    ClearCredentials,
}

/// Shareable: clones observe the same call log and credential flag, so a
/// test can keep a handle after moving the mock into a coordinator.
#[derive(Clone, Default)]
pub struct MockWifi {
    pub calls: Arc<Mutex<Vec<WifiCall>>>,
    pub stored_credentials: Arc<Mutex<bool>>,
}

impl MockWifi {
    pub fn provisioned() -> Self {
        let wifi = Self::default();
        *wifi.stored_credentials.lock().unwrap() = true;
        wifi
    }

    pub fn calls(&self) -> Vec<WifiCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn has_credentials(&self) -> bool {
        *self.stored_credentials.lock().unwrap()
    }

    fn record(&self, call: WifiCall) {
        self.calls.lock().unwrap().push(call);
    }
}

impl WifiPort for MockWifi {
    fn apply_country_code(&mut self, code: &str) -> Result<(), ProvisionError> {
        self.record(WifiCall::ApplyCountry(code.into()));
        Ok(())
    }

    fn has_stored_credentials(&self) -> bool {
        *self.stored_credentials.lock().unwrap()
    }

    fn start_onboarding(&mut self, service: &str, pop: &str) -> Result<(), ProvisionError> {
        self.record(WifiCall::StartOnboarding {
            service: service.into(),
            pop: pop.into(),
        });
        Ok(())
    }

    fn finish_onboarding(&mut self) {
        self.record(WifiCall::FinishOnboarding);
    }

    fn connect_station(&mut self) {
        self.record(WifiCall::ConnectStation);
    }

    fn clear_credentials(&mut self) {
        *self.stored_credentials.lock().unwrap() = false;
        self.record(WifiCall::ClearCredentials);
    }
}

// ── Broker transport mock ─────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireCall {
    Start(String),
    Subscribe(String, Qos),
    Publish {
        topic: String,
        payload: Vec<u8>,
        qos: Qos,
        retain: bool,
    },
}

/// Shareable so a test can keep inspecting the log after handing the
/// transport to a client.
#[derive(Clone, Default)]
pub struct RecordingTransport {
    pub calls: Arc<Mutex<Vec<WireCall>>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<WireCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn subscribes(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                WireCall::Subscribe(topic, _) => Some(topic),
                _ => None,
            })
            .collect()
    }

    pub fn publishes(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                WireCall::Publish { topic, .. } => Some(topic),
                _ => None,
            })
            .collect()
    }
}

impl MqttTransport for RecordingTransport {
    fn start(&mut self, config: &BrokerConfig) -> Result<(), MqttError> {
        self.calls
            .lock()
            .unwrap()
            .push(WireCall::Start(config.uri.clone()));
        Ok(())
    }

    fn subscribe(&mut self, topic: &str, qos: Qos) -> Result<(), MqttError> {
        self.calls
            .lock()
            .unwrap()
            .push(WireCall::Subscribe(topic.into(), qos));
        Ok(())
    }

    fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: Qos,
        retain: bool,
    ) -> Result<(), MqttError> {
        self.calls.lock().unwrap().push(WireCall::Publish {
            topic: topic.into(),
            payload: payload.to_vec(),
            qos,
            retain,
        });
        Ok(())
    }
}

// ── OTA mocks ─────────────────────────────────────────────────

#[derive(Default)]
pub struct MockOtaTransport {
    pub requests: Arc<Mutex<Vec<(String, Vec<HttpHeader>)>>>,
    pub fail_with: Option<UpdateError>,
}

impl OtaTransport for MockOtaTransport {
    fn fetch_and_flash(&mut self, url: &str, headers: &[HttpHeader]) -> Result<(), UpdateError> {
        self.requests
            .lock()
            .unwrap()
            .push((url.to_string(), headers.to_vec()));
        match self.fail_with {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[derive(Clone)]
pub struct SharedSlot {
    pub state: Arc<Mutex<ImageState>>,
    pub rolled_back: Arc<Mutex<bool>>,
}

impl SharedSlot {
    pub fn new(state: ImageState) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
            rolled_back: Arc::new(Mutex::new(false)),
        }
    }

    pub fn rolled_back(&self) -> bool {
        *self.rolled_back.lock().unwrap()
    }
}

impl BootSlotPort for SharedSlot {
    fn image_state(&self) -> Result<ImageState, UpdateError> {
        Ok(*self.state.lock().unwrap())
    }

    fn mark_valid(&mut self) -> Result<(), UpdateError> {
        *self.state.lock().unwrap() = ImageState::Valid;
        Ok(())
    }

    fn mark_invalid_and_rollback(&mut self) -> Result<(), UpdateError> {
        *self.rolled_back.lock().unwrap() = true;
        Ok(())
    }
}
