//! ESP-IDF WiFi/onboarding driver adapter.
//!
//! Wraps the IDF provisioning manager (BLE scheme, security 1 with proof
//! of possession) and the station-mode WiFi driver. Vendor callbacks run
//! on IDF event-loop threads; they are translated into [`WifiEvent`]s and
//! posted to the coordinator's inbox, never into the state machine
//! directly.

use std::sync::mpsc::Sender;

use esp_idf_svc::sys::*;
use log::{info, warn};

use super::fsm::{WifiEvent, WifiPort};
use crate::error::{CredentialFailReason, ProvisionError};

/// Service UUID advertised by the BLE onboarding transport (LSB→MSB).
const ONBOARDING_SERVICE_UUID: [u8; 16] = [
    0xb4, 0xdf, 0x5a, 0x1c, 0x3f, 0x6b, 0xf4, 0xbf, 0xea, 0x4a, 0x82, 0x03, 0x04, 0x90, 0x1a,
    0x02,
];

pub struct EspWifiDriver {
    // Kept alive for the registered event handlers; freed never (process
    // lifetime, like every IDF default-loop registration here).
    _events: &'static Sender<WifiEvent>,
}

impl EspWifiDriver {
    /// Initialise the provisioning manager and register event forwarding
    /// into `events`. Expects netif, the default event loop, and the WiFi
    /// driver to be initialised by the caller.
    pub fn new(events: Sender<WifiEvent>) -> Result<Self, ProvisionError> {
        let sender: &'static Sender<WifiEvent> = Box::leak(Box::new(events));

        unsafe {
            let config = wifi_prov_mgr_config_t {
                scheme: wifi_prov_scheme_ble,
                scheme_event_handler: wifi_prov_event_handler_t {
                    event_cb: Some(wifi_prov_scheme_ble_event_cb_free_btdm),
                    user_data: core::ptr::null_mut(),
                },
                app_event_handler: wifi_prov_event_handler_t {
                    event_cb: None,
                    user_data: core::ptr::null_mut(),
                },
            };
            if wifi_prov_mgr_init(config) != ESP_OK {
                return Err(ProvisionError::DriverInit);
            }

            let arg = sender as *const Sender<WifiEvent> as *mut core::ffi::c_void;
            for (base, id) in [
                (WIFI_PROV_EVENT, ESP_EVENT_ANY_ID),
                (WIFI_EVENT, ESP_EVENT_ANY_ID),
                (IP_EVENT, ip_event_t_IP_EVENT_STA_GOT_IP as i32),
            ] {
                if esp_event_handler_register(base, id, Some(forward_event), arg) != ESP_OK {
                    return Err(ProvisionError::DriverInit);
                }
            }
        }

        Ok(Self { _events: sender })
    }
}

impl WifiPort for EspWifiDriver {
    fn apply_country_code(&mut self, code: &str) -> Result<(), ProvisionError> {
        let mut cc = [0u8; 3];
        let bytes = code.as_bytes();
        let len = bytes.len().min(2);
        cc[..len].copy_from_slice(&bytes[..len]);
        let ret = unsafe { esp_wifi_set_country_code(cc.as_ptr() as *const _, true) };
        if ret == ESP_OK {
            Ok(())
        } else {
            Err(ProvisionError::CountryCode)
        }
    }

    fn has_stored_credentials(&self) -> bool {
        let mut provisioned = false;
        let ret = unsafe { wifi_prov_mgr_is_provisioned(&mut provisioned) };
        ret == ESP_OK && provisioned
    }

    fn start_onboarding(&mut self, service_name: &str, pop: &str) -> Result<(), ProvisionError> {
        let mut name = [0u8; 32];
        let sn = service_name.as_bytes();
        let len = sn.len().min(31);
        name[..len].copy_from_slice(&sn[..len]);

        let mut pop_z = pop.as_bytes().to_vec();
        pop_z.push(0);

        unsafe {
            if wifi_prov_scheme_ble_set_service_uuid(ONBOARDING_SERVICE_UUID.as_ptr() as *mut _)
                != ESP_OK
            {
                return Err(ProvisionError::DriverInit);
            }
            if wifi_prov_mgr_start_provisioning(
                wifi_prov_security_WIFI_PROV_SECURITY_1,
                pop_z.as_ptr() as *const _,
                name.as_ptr() as *const _,
                core::ptr::null(),
            ) != ESP_OK
            {
                return Err(ProvisionError::DriverInit);
            }
        }
        info!("provision(esp): onboarding advertised as '{service_name}'");
        Ok(())
    }

    fn finish_onboarding(&mut self) {
        unsafe {
            wifi_prov_mgr_deinit();
        }
    }

    fn connect_station(&mut self) {
        unsafe {
            if esp_wifi_set_mode(wifi_mode_t_WIFI_MODE_STA) != ESP_OK {
                warn!("provision(esp): failed to set STA mode");
            }
            if esp_wifi_start() != ESP_OK {
                warn!("provision(esp): esp_wifi_start failed");
            }
            esp_wifi_connect();
        }
    }

    fn clear_credentials(&mut self) {
        unsafe {
            wifi_prov_mgr_reset_provisioning();
        }
    }
}

/// Vendor-event → inbox translation. Runs on the IDF event task; does
/// nothing but classify and send.
extern "C" fn forward_event(
    arg: *mut core::ffi::c_void,
    event_base: esp_event_base_t,
    event_id: i32,
    event_data: *mut core::ffi::c_void,
) {
    // SAFETY: arg is the leaked Sender registered in EspWifiDriver::new.
    let sender = unsafe { &*(arg as *const Sender<WifiEvent>) };

    let event = if event_base == unsafe { WIFI_PROV_EVENT } {
        match event_id as u32 {
            x if x == wifi_prov_cb_event_t_WIFI_PROV_START => Some(WifiEvent::OnboardingStarted),
            x if x == wifi_prov_cb_event_t_WIFI_PROV_CRED_RECV => {
                Some(WifiEvent::CredentialsReceived)
            }
            x if x == wifi_prov_cb_event_t_WIFI_PROV_CRED_SUCCESS => {
                Some(WifiEvent::CredentialsAccepted)
            }
            x if x == wifi_prov_cb_event_t_WIFI_PROV_CRED_FAIL => {
                // SAFETY: CRED_FAIL carries a wifi_prov_sta_fail_reason_t.
                let reason = unsafe { *(event_data as *const wifi_prov_sta_fail_reason_t) };
                let reason = if reason == wifi_prov_sta_fail_reason_t_WIFI_PROV_STA_AUTH_ERROR {
                    CredentialFailReason::AuthError
                } else {
                    CredentialFailReason::ApNotFound
                };
                Some(WifiEvent::CredentialsFailed(reason))
            }
            x if x == wifi_prov_cb_event_t_WIFI_PROV_END => Some(WifiEvent::OnboardingComplete),
            _ => None,
        }
    } else if event_base == unsafe { WIFI_EVENT } {
        match event_id as u32 {
            x if x == wifi_event_t_WIFI_EVENT_STA_START => Some(WifiEvent::StationStarted),
            x if x == wifi_event_t_WIFI_EVENT_STA_DISCONNECTED => Some(WifiEvent::Disconnected),
            _ => None,
        }
    } else if event_base == unsafe { IP_EVENT }
        && event_id == ip_event_t_IP_EVENT_STA_GOT_IP as i32
    {
        Some(WifiEvent::GotIp)
    } else {
        None
    };

    if let Some(event) = event {
        // A full inbox means the coordinator thread died; nothing useful
        // to do from the event task.
        let _ = sender.send(event);
    }
}
