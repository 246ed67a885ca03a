//! HomeLink firmware library.
//!
//! Device lifecycle and state coordination for a connected single-board
//! device: typed NVS-backed configuration, WiFi onboarding with bounded
//! credential retry, a broker session that replays subscriptions on
//! reconnect, and fail-safe firmware updates gated behind a boot-time
//! verification decision.
//!
//! Every hardware boundary is a port trait; the ESP-IDF adapters are
//! guarded by `#[cfg(target_os = "espidf")]` so the whole crate builds
//! and tests on the host.

#![deny(unused_must_use)]

pub mod device_id;
pub mod drivers;
pub mod error;
pub mod mqtt;
pub mod ota;
pub mod provision;
pub mod store;
pub mod supervisor;
pub mod system;
