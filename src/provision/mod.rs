//! WiFi onboarding and reconnection coordinator.
//!
//! Owns the provisioning state machine ([`fsm::ProvisionFsm`]) and the
//! platform WiFi driver behind [`fsm::WifiPort`]. Driver callbacks never
//! run machine logic themselves: the platform adapter posts
//! [`fsm::WifiEvent`]s into an mpsc inbox and the coordinator consumes
//! them from its own thread, keeping a single writer per state machine.
//!
//! [`Provisioner::provision`] is a blocking call with no timeout — a
//! device without connectivity simply waits. The caller is released by the
//! got-IP event, which also latches the [`ConnectedSignal`] other threads
//! can wait on.

pub mod fsm;

#[cfg(target_os = "espidf")]
pub mod esp;

use std::sync::mpsc::Receiver;
use std::sync::{Arc, Condvar, Mutex};

use log::{info, warn};

use crate::device_id::ServiceName;
use crate::drivers::status_led::StatusSink;
use crate::error::ProvisionError;
use self::fsm::{ProvisionFsm, ProvisionState, WifiEvent, WifiPort};

// ── Connected signal ──────────────────────────────────────────

/// Latched one-shot signal: set on the first got-IP event, never cleared.
/// Threads may wait on it without a timeout.
#[derive(Clone, Default)]
pub struct ConnectedSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl ConnectedSignal {
    pub fn new() -> Self {
        Self::default()
    }

    fn set(&self) {
        let (lock, cvar) = &*self.inner;
        if let Ok(mut connected) = lock.lock() {
            *connected = true;
            cvar.notify_all();
        }
    }

    /// Park the calling thread until the signal fires. Unbounded wait.
    pub fn wait(&self) {
        let (lock, cvar) = &*self.inner;
        let Ok(mut connected) = lock.lock() else {
            return;
        };
        while !*connected {
            match cvar.wait(connected) {
                Ok(guard) => connected = guard,
                Err(_) => return,
            }
        }
    }

    pub fn is_set(&self) -> bool {
        let (lock, _) = &*self.inner;
        lock.lock().map(|g| *g).unwrap_or(false)
    }
}

// ── Coordinator ───────────────────────────────────────────────

pub struct Provisioner<W: WifiPort, S: StatusSink> {
    fsm: ProvisionFsm,
    wifi: W,
    led: S,
    inbox: Receiver<WifiEvent>,
    connected: ConnectedSignal,
}

impl<W: WifiPort, S: StatusSink> Provisioner<W, S> {
    pub fn new(wifi: W, led: S, service_name: ServiceName, inbox: Receiver<WifiEvent>) -> Self {
        Self {
            fsm: ProvisionFsm::new(service_name),
            wifi,
            led,
            inbox,
            connected: ConnectedSignal::new(),
        }
    }

    /// Clone of the latched connected signal, for threads that need to
    /// block until the network is up.
    pub fn connected_signal(&self) -> ConnectedSignal {
        self.connected.clone()
    }

    pub fn state(&self) -> ProvisionState {
        self.fsm.state()
    }

    pub fn retry_count(&self) -> u8 {
        self.fsm.retry_count()
    }

    /// Onboard (or reconnect with stored credentials) and block until the
    /// station has an IP address. The country code is applied before
    /// anything else; a driver rejection is logged and skipped.
    pub fn provision(&mut self, country: &str, pop: &str) -> Result<(), ProvisionError> {
        if let Err(e) = self.wifi.apply_country_code(country) {
            warn!("provision: failed to set country code ({e})");
        }

        self.fsm.begin(pop, &mut self.wifi, &mut self.led)?;

        while !self.fsm.is_connected() {
            match self.inbox.recv() {
                Ok(event) => self.dispatch(event),
                // All senders gone: the driver died before connecting.
                Err(_) => return Err(ProvisionError::DriverInit),
            }
        }
        Ok(())
    }

    /// Steady-state event loop. Runs on the provisioning thread after
    /// `provision` returns, handling disconnect/reconnect and reset
    /// requests for the life of the process.
    pub fn run(&mut self) {
        while let Ok(event) = self.inbox.recv() {
            self.dispatch(event);
        }
        info!("provision: event channel closed, loop exiting");
    }

    /// Discard stored credentials, independent of current state. Retry
    /// accounting is untouched.
    pub fn reset_provisioning(&mut self) {
        self.wifi.clear_credentials();
    }

    fn dispatch(&mut self, event: WifiEvent) {
        self.fsm.handle_event(event, &mut self.wifi, &mut self.led);
        if self.fsm.is_connected() {
            self.connected.set();
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────
