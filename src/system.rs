//! Platform/system services port.
//!
//! Restart is modelled as a port side effect rather than a direct
//! `esp_restart()` call so the update and reset flows can be exercised in
//! tests: on hardware the call diverges, in a mock it just records.

/// Heap pool statistics for the info snapshot.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct HeapStats {
    pub free_bytes: u32,
    pub min_free_bytes: u32,
    pub largest_free_block: u32,
}

/// One row of the task table.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TaskInfo {
    pub name: String,
    pub priority: u32,
    pub state: &'static str,
    pub core: &'static str,
}

/// Driven adapter over platform services.
pub trait SystemPort {
    /// Reboot the device. Diverges on hardware; mocks record the request
    /// and return.
    fn restart(&mut self);

    /// Milliseconds since boot.
    fn uptime_ms(&self) -> u64;

    /// Why the last reset happened.
    fn reset_reason(&self) -> &'static str;

    fn heap_stats(&self) -> HeapStats;

    fn tasks(&self) -> Vec<TaskInfo>;
}

// ── Host implementation ───────────────────────────────────────

#[cfg(not(target_os = "espidf"))]
pub use host::HostSystem;

#[cfg(not(target_os = "espidf"))]
mod host {
    use super::{HeapStats, SystemPort, TaskInfo};
    use std::time::Instant;

    /// Host-side stand-in: process uptime, placeholder stats, restart
    /// logged but not performed.
    pub struct HostSystem {
        started: Instant,
        pub restarts_requested: u32,
    }

    impl HostSystem {
        pub fn new() -> Self {
            Self {
                started: Instant::now(),
                restarts_requested: 0,
            }
        }
    }

    impl SystemPort for HostSystem {
        fn restart(&mut self) {
            log::warn!("system(host): restart requested (not performed)");
            self.restarts_requested += 1;
        }

        fn uptime_ms(&self) -> u64 {
            self.started.elapsed().as_millis() as u64
        }

        fn reset_reason(&self) -> &'static str {
            "PowerOn"
        }

        fn heap_stats(&self) -> HeapStats {
            HeapStats::default()
        }

        fn tasks(&self) -> Vec<TaskInfo> {
            Vec::new()
        }
    }
}

// ── ESP-IDF implementation ────────────────────────────────────

#[cfg(target_os = "espidf")]
pub use esp::EspSystem;

#[cfg(target_os = "espidf")]
mod esp {
    use super::{HeapStats, SystemPort, TaskInfo};
    use esp_idf_svc::sys::*;

    pub struct EspSystem;

    impl EspSystem {
        pub fn new() -> Self {
            Self
        }
    }

    impl SystemPort for EspSystem {
        fn restart(&mut self) {
            unsafe { esp_restart() }
        }

        fn uptime_ms(&self) -> u64 {
            (unsafe { esp_timer_get_time() } / 1000) as u64
        }

        fn reset_reason(&self) -> &'static str {
            match unsafe { esp_reset_reason() } {
                x if x == esp_reset_reason_t_ESP_RST_POWERON => "PowerOn",
                x if x == esp_reset_reason_t_ESP_RST_SW => "Software",
                x if x == esp_reset_reason_t_ESP_RST_PANIC => "Panic",
                x if x == esp_reset_reason_t_ESP_RST_INT_WDT => "InterruptWatchdog",
                x if x == esp_reset_reason_t_ESP_RST_TASK_WDT => "TaskWatchdog",
                x if x == esp_reset_reason_t_ESP_RST_WDT => "Watchdog",
                x if x == esp_reset_reason_t_ESP_RST_DEEPSLEEP => "DeepSleep",
                x if x == esp_reset_reason_t_ESP_RST_BROWNOUT => "Brownout",
                x if x == esp_reset_reason_t_ESP_RST_SDIO => "Sdio",
                _ => "Unknown",
            }
        }

        fn heap_stats(&self) -> HeapStats {
            unsafe {
                HeapStats {
                    free_bytes: esp_get_free_heap_size(),
                    min_free_bytes: esp_get_minimum_free_heap_size(),
                    largest_free_block: heap_caps_get_largest_free_block(MALLOC_CAP_DEFAULT)
                        as u32,
                }
            }
        }

        fn tasks(&self) -> Vec<TaskInfo> {
            let count = unsafe { uxTaskGetNumberOfTasks() } as usize;
            let mut raw: Vec<TaskStatus_t> = vec![Default::default(); count];
            let written = unsafe {
                uxTaskGetSystemState(raw.as_mut_ptr(), count as u32, core::ptr::null_mut())
            } as usize;

            raw[..written]
                .iter()
                .map(|t| {
                    let name = unsafe { core::ffi::CStr::from_ptr(t.pcTaskName) }
                        .to_string_lossy()
                        .into_owned();
                    let state = match t.eCurrentState {
                        x if x == eTaskState_eRunning => "Running",
                        x if x == eTaskState_eReady => "Ready",
                        x if x == eTaskState_eBlocked => "Blocked",
                        x if x == eTaskState_eSuspended => "Suspended",
                        x if x == eTaskState_eDeleted => "Deleted",
                        _ => "Unknown",
                    };
                    let core = match t.xCoreID as i32 {
                        0 => "0 (Pro)",
                        1 => "1 (App)",
                        _ => "NoAffinity",
                    };
                    TaskInfo {
                        name,
                        priority: t.uxCurrentPriority,
                        state,
                        core,
                    }
                })
                .collect()
        }
    }
}
