//! Status LED feedback port.
//!
//! Visual feedback is an observable side effect of lifecycle transitions,
//! not part of any state machine's correctness surface. The actual LED
//! hardware (RGB driver, patterns) lives behind [`StatusSink`]; the
//! firmware only announces what the device is doing.

use log::debug;

/// Lifecycle moments that drive the LED.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    /// Power-up, nothing initialised yet (solid red).
    Booting,
    /// Onboarding active, waiting for credentials (blinking blue).
    Onboarding,
    /// Station connected with an IP address (solid blue).
    NetworkUp,
    /// Station dropped; reconnect in flight (red flash).
    NetworkLost,
    /// Broker message received (blue flash).
    BrokerTraffic,
    /// Outbound publish acknowledged (white flash).
    BrokerPublish,
    /// Reprovision trigger held (orange).
    ResetArmed,
}

/// Driven adapter for the status LED.
pub trait StatusSink {
    fn status(&mut self, status: DeviceStatus);
}

/// Default sink: log-only. Used on the host and as a fallback when no LED
/// is fitted.
#[derive(Default)]
pub struct LogStatusSink {
    last: Option<DeviceStatus>,
}

impl LogStatusSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last(&self) -> Option<DeviceStatus> {
        self.last
    }
}

impl StatusSink for LogStatusSink {
    fn status(&mut self, status: DeviceStatus) {
        debug!("status: {:?}", status);
        self.last = Some(status);
    }
}
