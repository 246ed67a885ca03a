//! Device identity derived from the ESP32 factory MAC address.
//!
//! Produces the stable names the rest of the firmware advertises:
//! - Provisioning service name `PROV_XXYYZZ` (last 3 MAC bytes, uppercase)
//! - Network hostname `homelink-xxyyzz` (lowercase)
//! - Colon-separated MAC string for the info snapshot
//!
//! All of these are deterministic across reboots (factory-burned eFuse MAC).

/// Full 6-byte MAC address.
pub type MacAddress = [u8; 6];

/// Bounded service-name string: "PROV_XXYYZZ" fits comfortably.
pub type ServiceName = heapless::String<16>;

/// Read the factory MAC address from eFuse.
#[cfg(target_os = "espidf")]
pub fn read_mac() -> MacAddress {
    let mut mac: MacAddress = [0u8; 6];
    unsafe {
        esp_idf_svc::sys::esp_efuse_mac_get_default(mac.as_mut_ptr());
    }
    mac
}

/// Simulation: returns a deterministic fake MAC.
#[cfg(not(target_os = "espidf"))]
pub fn read_mac() -> MacAddress {
    [0xDE, 0xAD, 0xBE, 0xEF, 0xCA, 0xFE]
}

/// Provisioning service name advertised during onboarding.
/// Format: `PROV_XXYYZZ` (e.g., `PROV_EFCAFE`).
pub fn service_name(mac: &MacAddress) -> ServiceName {
    let mut name = ServiceName::new();
    use core::fmt::Write;
    let _ = write!(name, "PROV_{:02X}{:02X}{:02X}", mac[3], mac[4], mac[5]);
    name
}

/// Default network hostname when none is stored in NVS.
/// Format: `homelink-xxyyzz` (lowercase).
pub fn default_hostname(mac: &MacAddress) -> heapless::String<24> {
    let mut name = heapless::String::<24>::new();
    use core::fmt::Write;
    let _ = write!(name, "homelink-{:02x}{:02x}{:02x}", mac[3], mac[4], mac[5]);
    name
}

/// Human-readable MAC: `AA:BB:CC:DD:EE:FF`.
pub fn mac_string(mac: &MacAddress) -> heapless::String<20> {
    let mut s = heapless::String::<20>::new();
    use core::fmt::Write;
    let _ = write!(
        s,
        "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
        mac[0], mac[1], mac[2], mac[3], mac[4], mac[5]
    );
    s
}
