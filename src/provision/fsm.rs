//! Provisioning state machine.
//!
//! Pure transition logic over the onboarding/reconnection lifecycle. All
//! driver effects go through the [`WifiPort`] passed into each call, so the
//! machine is fully exercisable with a recording mock.
//!
//! ```text
//!          Provision()                 cred-received        got-ip
//!   Idle ──────────────▶ AwaitingCredentials ──▶ Connecting ──▶ Connected
//!     │ stored creds                ▲   │ cred-fail               │
//!     └────────────────▶ Connecting │   ▼                        │ disconnect
//!                            ▲      │ CredentialFailure ◀────────┘ (reconnect)
//!                            │      │   │ retries == max
//!                            │      └── Exhausted (discard stored creds)
//! ```

use log::{error, info, warn};

use crate::device_id::ServiceName;
use crate::drivers::status_led::{DeviceStatus, StatusSink};
use crate::error::{CredentialFailReason, ProvisionError};

/// Credential attempts tolerated before the stored credentials are
/// discarded and onboarding re-arms.
pub const MAX_CREDENTIAL_RETRIES: u8 = 5;

// ── States ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionState {
    Idle,
    AwaitingCredentials,
    Connecting,
    Connected,
    CredentialFailure,
    Exhausted,
}

// ── Inbound events ────────────────────────────────────────────

/// Events delivered from the WiFi/onboarding driver (and the reset
/// watcher) into the coordinator's inbox. Vendor callbacks never touch the
/// machine directly; they post here and the owning thread consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WifiEvent {
    /// Onboarding transport is up and advertising.
    OnboardingStarted,
    /// Credentials arrived over the secure channel.
    CredentialsReceived,
    /// The access point accepted the credentials.
    CredentialsAccepted,
    /// The credential attempt failed.
    CredentialsFailed(CredentialFailReason),
    /// Onboarding finished; driver resources can be released.
    OnboardingComplete,
    /// Station interface started.
    StationStarted,
    /// Station lost the access point.
    Disconnected,
    /// Station obtained an IP address — the connected signal.
    GotIp,
    /// Reprovision trigger: discard stored credentials.
    ResetRequested,
}

// ── Driver port ───────────────────────────────────────────────

/// Driven adapter over the platform WiFi + onboarding driver.
pub trait WifiPort {
    /// Apply the regulatory country code. Must happen before any connect
    /// or onboarding starts.
    fn apply_country_code(&mut self, code: &str) -> Result<(), ProvisionError>;

    /// Whether credentials from a previous onboarding are stored.
    fn has_stored_credentials(&self) -> bool;

    /// Start advertising the onboarding service (secure out-of-band
    /// exchange, protected by the proof-of-possession secret).
    fn start_onboarding(&mut self, service_name: &str, pop: &str) -> Result<(), ProvisionError>;

    /// Release onboarding resources once the exchange is over.
    fn finish_onboarding(&mut self);

    /// Start/again attempt the station-level connect with the stored
    /// credentials.
    fn connect_station(&mut self);

    /// Discard stored credentials.
    fn clear_credentials(&mut self);
}

// ── Machine ───────────────────────────────────────────────────

pub struct ProvisionFsm {
    state: ProvisionState,
    retry_count: u8,
    service_name: ServiceName,
}

impl ProvisionFsm {
    pub fn new(service_name: ServiceName) -> Self {
        Self {
            state: ProvisionState::Idle,
            retry_count: 0,
            service_name,
        }
    }

    pub fn state(&self) -> ProvisionState {
        self.state
    }

    pub fn retry_count(&self) -> u8 {
        self.retry_count
    }

    /// Service name advertised during onboarding (`PROV_XXYYZZ`).
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn is_connected(&self) -> bool {
        self.state == ProvisionState::Connected
    }

    /// Kick off the flow from `Idle`: skip straight to the station connect
    /// when credentials are already stored, otherwise start onboarding.
    pub fn begin(
        &mut self,
        pop: &str,
        wifi: &mut impl WifiPort,
        led: &mut impl StatusSink,
    ) -> Result<(), ProvisionError> {
        if wifi.has_stored_credentials() {
            info!("provision: already provisioned, starting station");
            wifi.finish_onboarding();
            self.state = ProvisionState::Connecting;
            wifi.connect_station();
        } else {
            info!(
                "provision: starting onboarding as '{}'",
                self.service_name
            );
            self.retry_count = 0;
            wifi.start_onboarding(self.service_name.as_str(), pop)?;
            self.state = ProvisionState::AwaitingCredentials;
            led.status(DeviceStatus::Onboarding);
        }
        Ok(())
    }

    /// Feed one driver event through the machine.
    pub fn handle_event(
        &mut self,
        event: WifiEvent,
        wifi: &mut impl WifiPort,
        led: &mut impl StatusSink,
    ) {
        match event {
            WifiEvent::OnboardingStarted => {
                info!("provision: onboarding transport ready");
            }

            WifiEvent::CredentialsReceived => {
                info!("provision: credentials received");
                if matches!(
                    self.state,
                    ProvisionState::AwaitingCredentials | ProvisionState::CredentialFailure
                ) {
                    self.state = ProvisionState::Connecting;
                }
            }

            WifiEvent::CredentialsAccepted => {
                info!("provision: credentials accepted");
                self.retry_count = 0;
            }

            WifiEvent::CredentialsFailed(reason) => {
                error!(
                    "provision: credential attempt failed ({})",
                    ProvisionError::Credential(reason)
                );
                self.retry_count += 1;
                self.state = ProvisionState::CredentialFailure;
                if self.retry_count >= MAX_CREDENTIAL_RETRIES {
                    warn!(
                        "provision: {}, discarding stored credentials",
                        ProvisionError::ExhaustedRetries
                    );
                    self.state = ProvisionState::Exhausted;
                    wifi.clear_credentials();
                    self.retry_count = 0;
                    self.state = ProvisionState::AwaitingCredentials;
                    led.status(DeviceStatus::Onboarding);
                }
            }

            WifiEvent::OnboardingComplete => {
                info!("provision: onboarding finished");
                wifi.finish_onboarding();
            }

            WifiEvent::StationStarted => {
                wifi.connect_station();
            }

            WifiEvent::Disconnected => {
                if matches!(
                    self.state,
                    ProvisionState::Connecting | ProvisionState::Connected
                ) {
                    info!("provision: disconnected, reconnecting");
                    led.status(DeviceStatus::NetworkLost);
                    self.state = ProvisionState::Connecting;
                    // No local backoff: the driver owns retry pacing.
                    wifi.connect_station();
                }
            }

            WifiEvent::GotIp => {
                info!("provision: station got IP");
                self.state = ProvisionState::Connected;
                led.status(DeviceStatus::NetworkUp);
            }

            WifiEvent::ResetRequested => {
                // Independent of current state; retry accounting untouched.
                info!("provision: stored credentials discarded on request");
                wifi.clear_credentials();
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────
