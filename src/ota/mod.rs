//! Firmware update and rollback manager.
//!
//! `update()` drives download → flash → reboot. The reboot is the success
//! path's terminal side effect: on hardware the call never returns, so a
//! success response is never produced — the caller only ever sees
//! failures. After the reboot the new image runs exactly once in
//! pending-verification; the supervisor must decide `commit()` or
//! `rollback()` before anything else touches the network. Staying in
//! pending-verify is a bug, not a steady state.
//!
//! Updates cannot be aborted mid-flight; they run to completion or die
//! with the hardware.

pub mod platform;

use log::{error, info, warn};

use crate::error::UpdateError;
use crate::system::SystemPort;
use self::platform::{BootSlotPort, HttpHeader, ImageState, OtaTransport};

// ── Live update state ─────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateState {
    Idle,
    Downloading,
    /// Image flashed and slot switched; reboot requested.
    AwaitingReboot,
    /// Last attempt failed; running image untouched, retry allowed.
    Failed,
}

// ── Updater ───────────────────────────────────────────────────

pub struct Updater<T: OtaTransport, B: BootSlotPort> {
    transport: T,
    slot: B,
    headers: Vec<HttpHeader>,
    state: UpdateState,
}

impl<T: OtaTransport, B: BootSlotPort> Updater<T, B> {
    pub fn new(transport: T, slot: B) -> Self {
        Self {
            transport,
            slot,
            headers: Vec::new(),
            state: UpdateState::Idle,
        }
    }

    pub fn state(&self) -> UpdateState {
        self.state
    }

    /// Attach a header to every subsequent download request.
    pub fn add_header(&mut self, name: &str, value: &str) {
        self.headers.push(HttpHeader {
            name: name.to_string(),
            value: value.to_string(),
        });
    }

    /// Convenience for token-protected image servers.
    pub fn add_bearer_token(&mut self, token: &str) {
        self.add_header("Authorization", &format!("Bearer {token}"));
    }

    /// Fetch and flash the image at `url`, then request a reboot into it.
    ///
    /// On hardware a successful flash never returns control — the restart
    /// diverges. On the host the restart is recorded by the system port
    /// and this returns `Ok(())` with the state in `AwaitingReboot`.
    /// Failures return with the running image untouched and no reboot.
    pub fn update(
        &mut self,
        url: &str,
        system: &mut impl SystemPort,
    ) -> Result<(), UpdateError> {
        if matches!(self.state, UpdateState::Downloading | UpdateState::AwaitingReboot) {
            return Err(UpdateError::Busy);
        }

        info!("ota: updating from {url}");
        self.state = UpdateState::Downloading;

        match self.transport.fetch_and_flash(url, &self.headers) {
            Ok(()) => {
                self.state = UpdateState::AwaitingReboot;
                info!("ota: flash complete, rebooting into new image");
                system.restart();
                Ok(())
            }
            Err(e) => {
                error!("ota: update failed ({e}), running image untouched");
                self.state = UpdateState::Failed;
                Err(e)
            }
        }
    }

    /// Whether the running image is a fresh flash still awaiting its
    /// verification decision. Queried once at boot; a slot-state read
    /// failure is reported as "not pending" so a broken bootloader query
    /// can't wedge startup.
    pub fn pending_verification(&self) -> bool {
        match self.slot.image_state() {
            Ok(state) => state == ImageState::PendingVerify,
            Err(e) => {
                error!("ota: failed to read image state ({e})");
                false
            }
        }
    }

    /// Accept the running image: cancels the pending auto-rollback.
    pub fn commit(&mut self) -> Result<(), UpdateError> {
        info!("ota: marking running image valid");
        self.slot.mark_valid()
    }

    /// Reject the running image and reboot into the previous known-good
    /// one. Diverges on hardware.
    pub fn rollback(&mut self) -> Result<(), UpdateError> {
        warn!("ota: rolling back to previous image");
        self.slot.mark_invalid_and_rollback()
    }
}

// ── Tests ─────────────────────────────────────────────────────
