//! Host resource usage reported by `/health`.

use std::sync::Mutex;

use serde::Serialize;
use sysinfo::System;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStats {
    pub total: u64,
    pub used: u64,
    pub free: u64,
    pub available: u64,
    pub swap_total: u64,
    pub swap_used: u64,
    pub usage_percent: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CpuStats {
    pub cores: usize,
    /// Load since the previous sample; 0 on the first one.
    pub usage_percent: f32,
}

/// Keeps one `System` so CPU usage is measured between successive requests.
pub struct SystemStats {
    sys: Mutex<System>,
}

impl Default for SystemStats {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemStats {
    pub fn new() -> Self {
        let mut sys = System::new();
        sys.refresh_cpu_all();
        sys.refresh_memory();
        Self {
            sys: Mutex::new(sys),
        }
    }

    pub fn sample(&self) -> (MemoryStats, CpuStats) {
        let mut sys = self.sys.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        sys.refresh_cpu_all();
        sys.refresh_memory();

        let total = sys.total_memory();
        let used = sys.used_memory();
        let usage_percent = if total > 0 {
            used as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        let memory = MemoryStats {
            total,
            used,
            free: sys.free_memory(),
            available: sys.available_memory(),
            swap_total: sys.total_swap(),
            swap_used: sys.used_swap(),
            usage_percent,
        };
        let cpu = CpuStats {
            cores: sys.cpus().len(),
            usage_percent: sys.global_cpu_usage(),
        };
        tracing::debug!("Host usage: CPU {:.2}%, memory {:.2}% ({used}/{total})", cpu.usage_percent, usage_percent);
        (memory, cpu)
    }
}
