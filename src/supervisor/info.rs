//! Read-only device introspection snapshot.
//!
//! Pure reporting: nothing here mutates state. Served as JSON by the
//! external HTTP layer.

use serde::Serialize;

use crate::system::{HeapStats, SystemPort, TaskInfo};

#[derive(Debug, Clone, Serialize)]
pub struct AppDescriptor {
    #[serde(rename = "app-name")]
    pub name: &'static str,
    #[serde(rename = "app-version")]
    pub version: &'static str,
    #[serde(rename = "compile-date")]
    pub compile_date: &'static str,
    #[serde(rename = "compile-time")]
    pub compile_time: &'static str,
}

impl Default for AppDescriptor {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME"),
            version: env!("CARGO_PKG_VERSION"),
            compile_date: "unknown",
            compile_time: "unknown",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InfoSnapshot {
    pub app: AppDescriptor,
    #[serde(rename = "uptime-msec")]
    pub uptime_ms: u64,
    #[serde(rename = "reset-reason")]
    pub reset_reason: &'static str,
    pub hostname: String,
    #[serde(rename = "wifi-mac-address")]
    pub mac: String,
    pub heap: HeapStats,
    pub tasks: Vec<TaskInfo>,
}

impl InfoSnapshot {
    pub fn capture(system: &impl SystemPort, hostname: &str, mac: &str) -> Self {
        Self {
            app: AppDescriptor::default(),
            uptime_ms: system.uptime_ms(),
            reset_reason: system.reset_reason(),
            hostname: hostname.to_string(),
            mac: mac.to_string(),
            heap: system.heap_stats(),
            tasks: system.tasks(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}
