//! OTA platform ports: image transport and boot-slot control.

use crate::error::UpdateError;

/// One extra HTTP header attached to the image download request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpHeader {
    pub name: String,
    pub value: String,
}

/// Driven adapter: fetch the image and write it to the inactive slot.
///
/// Implementations MUST apply `headers` to the request before the
/// connection is established — bearer tokens have to ride on every
/// attempt, including driver-internal retries.
pub trait OtaTransport {
    fn fetch_and_flash(&mut self, url: &str, headers: &[HttpHeader]) -> Result<(), UpdateError>;
}

/// State of the currently running image, as the bootloader sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageState {
    /// Image is trusted; boots unconditionally.
    Valid,
    /// Newly flashed image on its probation boot: a verification decision
    /// is still outstanding.
    PendingVerify,
}

/// Driven adapter over the bootloader's rollback machinery.
pub trait BootSlotPort {
    fn image_state(&self) -> Result<ImageState, UpdateError>;

    /// Mark the running image permanently valid, cancelling any pending
    /// auto-rollback.
    fn mark_valid(&mut self) -> Result<(), UpdateError>;

    /// Mark the running image invalid and reboot into the previous
    /// known-good one. Diverges on hardware.
    fn mark_invalid_and_rollback(&mut self) -> Result<(), UpdateError>;
}

// ── ESP-IDF implementations ───────────────────────────────────

#[cfg(target_os = "espidf")]
pub use esp_impl::{EspBootSlot, HttpsOtaTransport};

#[cfg(target_os = "espidf")]
mod esp_impl {
    use embedded_svc::http::client::Client as HttpClient;
    use embedded_svc::http::{Method, Status};
    use embedded_svc::io::Read;
    use esp_idf_svc::http::client::{Configuration as HttpConfiguration, EspHttpConnection};
    use esp_idf_svc::sys::*;
    use log::{info, warn};

    use super::{BootSlotPort, HttpHeader, ImageState, OtaTransport, UpdateError};

    const OTA_CHUNK_SIZE: usize = 4096;

    /// HTTPS image transport: stream the body straight into the inactive
    /// OTA partition via the `esp-ota` crate.
    pub struct HttpsOtaTransport;

    impl HttpsOtaTransport {
        pub fn new() -> Self {
            Self
        }
    }

    impl OtaTransport for HttpsOtaTransport {
        fn fetch_and_flash(
            &mut self,
            url: &str,
            headers: &[HttpHeader],
        ) -> Result<(), UpdateError> {
            let connection = EspHttpConnection::new(&HttpConfiguration {
                buffer_size: Some(OTA_CHUNK_SIZE),
                crt_bundle_attach: Some(esp_crt_bundle_attach),
                ..Default::default()
            })
            .map_err(|e| {
                warn!("ota: http connection init failed: {e}");
                UpdateError::Transport
            })?;
            let mut client = HttpClient::wrap(connection);

            // Header slices borrow the owned strings; attached before the
            // request goes out, never after.
            let header_refs: Vec<(&str, &str)> = headers
                .iter()
                .map(|h| (h.name.as_str(), h.value.as_str()))
                .collect();

            let request = client
                .request(Method::Get, url, &header_refs)
                .map_err(|e| {
                    warn!("ota: request build failed: {e}");
                    UpdateError::Transport
                })?;
            let mut response = request.submit().map_err(|e| {
                warn!("ota: request failed: {e}");
                UpdateError::Transport
            })?;

            let status = response.status();
            if status != 200 {
                warn!("ota: server returned {status}");
                return Err(UpdateError::Transport);
            }

            let mut update = esp_ota::OtaUpdate::begin().map_err(|e| {
                warn!("ota: begin failed: {e:?}");
                UpdateError::Flash
            })?;

            let mut buf = [0u8; OTA_CHUNK_SIZE];
            let mut total = 0usize;
            loop {
                let read = response.read(&mut buf).map_err(|e| {
                    warn!("ota: read failed after {total} bytes: {e}");
                    UpdateError::Transport
                })?;
                if read == 0 {
                    break;
                }
                update.write(&buf[..read]).map_err(|e| {
                    warn!("ota: flash write failed at {total}: {e:?}");
                    UpdateError::Flash
                })?;
                total += read;
            }
            info!("ota: received {total} bytes");

            // Finalize validates the image header/signature before the
            // slot is ever made bootable.
            let mut completed = update.finalize().map_err(|e| {
                warn!("ota: image verification failed: {e:?}");
                UpdateError::Integrity
            })?;
            completed.set_as_boot_partition().map_err(|e| {
                warn!("ota: set boot partition failed: {e:?}");
                UpdateError::Flash
            })?;
            Ok(())
        }
    }

    /// Boot-slot control over the IDF OTA ops.
    pub struct EspBootSlot;

    impl EspBootSlot {
        pub fn new() -> Self {
            Self
        }
    }

    impl BootSlotPort for EspBootSlot {
        fn image_state(&self) -> Result<ImageState, UpdateError> {
            unsafe {
                let running = esp_ota_get_running_partition();
                let mut state: esp_ota_img_states_t = 0;
                if esp_ota_get_state_partition(running, &mut state) != ESP_OK {
                    return Err(UpdateError::SlotState);
                }
                if state == esp_ota_img_states_t_ESP_OTA_IMG_PENDING_VERIFY {
                    Ok(ImageState::PendingVerify)
                } else {
                    Ok(ImageState::Valid)
                }
            }
        }

        fn mark_valid(&mut self) -> Result<(), UpdateError> {
            esp_ota::mark_app_valid();
            Ok(())
        }

        fn mark_invalid_and_rollback(&mut self) -> Result<(), UpdateError> {
            // Does not return on success.
            let ret = unsafe { esp_ota_mark_app_invalid_rollback_and_reboot() };
            warn!("ota: rollback returned unexpectedly ({ret})");
            Err(UpdateError::SlotState)
        }
    }
}
