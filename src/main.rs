//! HomeLink firmware — device entry point.
//!
//! Wiring order matters and mirrors the supervisor contract:
//!
//! 1. flash/NVS up, store opened, hostname applied
//! 2. provisioning coordinator started; main thread blocks on connected
//! 3. boot-image gate: commit or roll back a freshly flashed image
//! 4. broker session started (subscriptions registered beforehand)
//! 5. HTTP surface + steady-state publish loop
//!
//! One thread per long-running duty: provisioning events, broker-session
//! events, the reprovision trigger watcher, and the publish loop here.

use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use esp_idf_svc::hal::gpio::PinDriver;
use esp_idf_svc::hal::prelude::Peripherals;
use esp_idf_svc::http::server::{Configuration as HttpServerConfig, EspHttpServer};
use esp_idf_svc::io::{Read as _, Write as _};
use log::{info, warn};

use homelink::device_id;
use homelink::drivers::status_led::LogStatusSink;
use homelink::mqtt::transport::EspMqttTransport;
use homelink::mqtt::{DEFAULT_QOS, MqttClient};
use homelink::ota::Updater;
use homelink::ota::platform::{EspBootSlot, HttpsOtaTransport};
use homelink::provision::Provisioner;
use homelink::provision::esp::EspWifiDriver;
use homelink::store::medium::NvsMedium;
use homelink::store::{ConfigStore, OpenMode};
use homelink::supervisor::{SYSTEM_NAMESPACE, Supervisor};
use homelink::system::EspSystem;

/// Regulatory default; override via `system:country`.
const DEFAULT_COUNTRY: &str = "CH";
/// Onboarding proof-of-possession default; override via `system:pop`.
const DEFAULT_POP: &str = "abcd1234";
/// Seconds between steady-state status publishes.
const STATUS_INTERVAL_SECS: u64 = 30;

type DeviceSupervisor =
    Supervisor<NvsMedium, EspMqttTransport, HttpsOtaTransport, EspBootSlot, EspSystem>;

fn main() -> Result<()> {
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init().map_err(|e| anyhow!("logger init failed: {e:?}"))?;

    info!("HomeLink v{} starting", env!("CARGO_PKG_VERSION"));

    let peripherals = Peripherals::take().context("peripherals unavailable")?;
    let sysloop = esp_idf_svc::eventloop::EspSystemEventLoop::take()?;

    // ── Persistent store ──────────────────────────────────────
    let medium = NvsMedium::new().map_err(|e| anyhow!("NVS init failed: {e}"))?;
    let store = ConfigStore::new(medium).map_err(|e| anyhow!("store load failed: {e}"))?;

    // ── WiFi driver + netif (kept alive for the process) ──────
    let nvs_part = esp_idf_svc::nvs::EspDefaultNvsPartition::take()?;
    let wifi = esp_idf_svc::wifi::EspWifi::new(peripherals.modem, sysloop.clone(), Some(nvs_part))?;
    let mac = device_id::read_mac();

    // Hostname must be on the interface before the station comes up.
    let hostname = store
        .open(SYSTEM_NAMESPACE, OpenMode::ReadOnly)
        .ok()
        .and_then(|h| h.get_string("hostname").ok())
        .unwrap_or_else(|| device_id::default_hostname(&mac).to_string());
    unsafe {
        let mut name_z = hostname.clone().into_bytes();
        name_z.push(0);
        let netif = wifi.sta_netif().handle();
        if esp_idf_svc::sys::esp_netif_set_hostname(netif, name_z.as_ptr() as *const _)
            != esp_idf_svc::sys::ESP_OK
        {
            warn!("failed to set hostname '{hostname}'");
        }
    }
    core::mem::forget(wifi);

    // ── Provisioning coordinator ──────────────────────────────
    let (wifi_tx, wifi_rx) = mpsc::channel();
    let driver = EspWifiDriver::new(wifi_tx.clone()).map_err(|e| anyhow!("wifi driver: {e}"))?;
    let mut provisioner = Provisioner::new(
        driver,
        LogStatusSink::new(),
        device_id::service_name(&mac),
        wifi_rx,
    );

    // Reprovision trigger watcher (BOOT button, active low).
    let button = PinDriver::input(peripherals.pins.gpio0)?;
    let mut watcher =
        homelink::supervisor::ResetWatcher::new(wifi_tx.clone(), EspSystem::new());
    thread::Builder::new()
        .name("reset-watch".into())
        .stack_size(3072)
        .spawn(move || watcher.run(|| button.is_low()))?;

    let (country, pop) = onboarding_secrets(&store);
    provisioner
        .provision(&country, &pop)
        .map_err(|e| anyhow!("provisioning failed: {e}"))?;
    info!("network up as '{hostname}'");

    // Keep consuming WiFi events (reconnects, resets) for the process
    // lifetime.
    thread::Builder::new()
        .name("prov-events".into())
        .stack_size(4096)
        .spawn(move || provisioner.run())?;

    // ── Supervisor ────────────────────────────────────────────
    let (mqtt_tx, mqtt_rx) = mpsc::channel();
    let mut supervisor = Supervisor::new(
        store.clone(),
        MqttClient::new(EspMqttTransport::new(mqtt_tx)),
        Updater::new(HttpsOtaTransport::new(), EspBootSlot::new()),
        EspSystem::new(),
    );

    // Bearer token for the image server, if one is configured.
    if let Ok(handle) = store.open("ota", OpenMode::ReadOnly) {
        if let Ok(token) = handle.get_string("bearer-token") {
            supervisor.updater_mut().add_bearer_token(&token);
        }
    }

    // Boot-image gate: the device reaching this point with a working
    // store and network is the health check for a fresh image.
    supervisor
        .verify_boot_image(|| true)
        .map_err(|e| anyhow!("boot image gate failed: {e}"))?;

    supervisor
        .start_connectivity(&[("cmd", DEFAULT_QOS)], None)
        .map_err(|e| anyhow!("broker session failed to start: {e}"))?;

    let supervisor = Arc::new(Mutex::new(supervisor));

    // Broker-session event loop.
    {
        let supervisor = Arc::clone(&supervisor);
        thread::Builder::new()
            .name("mqtt-loop".into())
            .stack_size(4096)
            .spawn(move || {
                while let Ok(event) = mqtt_rx.recv() {
                    let inbound = supervisor.lock().unwrap().handle_session_event(event);
                    if let Some(msg) = inbound {
                        info!(
                            "command on {}: {}",
                            msg.topic,
                            String::from_utf8_lossy(&msg.payload)
                        );
                    }
                }
            })?;
    }

    // ── HTTP surface ──────────────────────────────────────────
    let mut server = EspHttpServer::new(&HttpServerConfig {
        uri_match_wildcard: true,
        ..Default::default()
    })?;
    register_routes(&mut server, Arc::clone(&supervisor))?;

    // ── Steady-state publish loop ─────────────────────────────
    loop {
        thread::sleep(Duration::from_secs(STATUS_INTERVAL_SECS));
        let mut sup = supervisor.lock().unwrap();
        if sup.is_broker_connected() {
            let payload = sup.handle_info();
            if let Err(e) = sup.publish("status", payload.as_bytes(), DEFAULT_QOS, false) {
                warn!("status publish failed: {e}");
            }
        }
    }
}

/// Country code and proof of possession, store-overridable.
fn onboarding_secrets(store: &ConfigStore<NvsMedium>) -> (String, String) {
    let handle = store.open(SYSTEM_NAMESPACE, OpenMode::ReadOnly).ok();
    let read = |key: &str, default: &str| {
        handle
            .as_ref()
            .and_then(|h| h.get_string(key).ok())
            .unwrap_or_else(|| default.to_string())
    };
    (
        read("country", DEFAULT_COUNTRY),
        read("pop", DEFAULT_POP),
    )
}

/// Tiny query-string accessor for the config routes.
fn query_param(uri: &str, name: &str) -> Option<String> {
    let query = uri.split_once('?')?.1;
    query.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        (k == name).then(|| v.to_string())
    })
}

fn register_routes(
    server: &mut EspHttpServer<'static>,
    supervisor: Arc<Mutex<DeviceSupervisor>>,
) -> Result<()> {
    use esp_idf_svc::http::Method;

    let reply = |req: esp_idf_svc::http::server::Request<
        &mut esp_idf_svc::http::server::EspHttpConnection,
    >,
                 result: core::result::Result<String, homelink::supervisor::routes::ApiError>|
     -> core::result::Result<(), esp_idf_svc::io::EspIOError> {
        match result {
            Ok(body) => req.into_ok_response()?.write_all(body.as_bytes()),
            Err(e) => req
                .into_status_response(500)?
                .write_all(e.message.as_bytes()),
        }
    };

    let sup = Arc::clone(&supervisor);
    server.fn_handler("/config/set-key", Method::Post, move |mut req| {
        let ns = query_param(req.uri(), "namespace");
        let key = query_param(req.uri(), "key");
        let mut body = vec![0u8; 4096];
        let len = req.read(&mut body).unwrap_or(0);
        let result = match (ns, key) {
            (Some(ns), Some(key)) => {
                sup.lock().unwrap().handle_set_key(&ns, &key, &body[..len])
            }
            _ => Err(homelink::supervisor::routes::ApiError::new(
                "missing namespace or key parameter",
            )),
        };
        reply(req, result)
    })?;

    let sup = Arc::clone(&supervisor);
    server.fn_handler("/config/get-key", Method::Get, move |req| {
        let result = match (
            query_param(req.uri(), "namespace"),
            query_param(req.uri(), "key"),
        ) {
            (Some(ns), Some(key)) => sup.lock().unwrap().handle_get_key(&ns, &key),
            _ => Err(homelink::supervisor::routes::ApiError::new(
                "missing namespace or key parameter",
            )),
        };
        reply(req, result)
    })?;

    let sup = Arc::clone(&supervisor);
    server.fn_handler("/config/get-all", Method::Get, move |req| {
        reply(req, sup.lock().unwrap().handle_get_all())
    })?;

    let sup = Arc::clone(&supervisor);
    server.fn_handler("/config/delete-key", Method::Delete, move |req| {
        let result = match (
            query_param(req.uri(), "namespace"),
            query_param(req.uri(), "key"),
        ) {
            (Some(ns), Some(key)) => sup.lock().unwrap().handle_delete_key(&ns, &key),
            _ => Err(homelink::supervisor::routes::ApiError::new(
                "missing namespace or key parameter",
            )),
        };
        reply(req, result)
    })?;

    let sup = Arc::clone(&supervisor);
    server.fn_handler("/config/delete-namespace", Method::Delete, move |req| {
        let result = match query_param(req.uri(), "namespace") {
            Some(ns) => sup.lock().unwrap().handle_delete_namespace(&ns),
            None => Err(homelink::supervisor::routes::ApiError::new(
                "missing namespace parameter",
            )),
        };
        reply(req, result)
    })?;

    let sup = Arc::clone(&supervisor);
    server.fn_handler("/firmware-upgrade", Method::Post, move |mut req| {
        let mut body = vec![0u8; 1024];
        let len = req.read(&mut body).unwrap_or(0);
        // A successful update reboots inside this call; only failures
        // produce a response.
        let result = sup
            .lock()
            .unwrap()
            .handle_update_request(&body[..len])
            .map(|()| "Firmware update started\n".to_string());
        reply(req, result)
    })?;

    let sup = Arc::clone(&supervisor);
    server.fn_handler("/reset", Method::Post, move |req| {
        req.into_ok_response()?.write_all(b"Resetting device\n")?;
        thread::sleep(Duration::from_secs(3));
        sup.lock().unwrap().handle_reset_request();
        Ok(())
    })?;

    let sup = Arc::clone(&supervisor);
    server.fn_handler("/info", Method::Get, move |req| {
        reply(req, Ok(sup.lock().unwrap().handle_info()))
    })?;

    Ok(())
}
