//! Process resource probes
//!
//! Samples this process's resident memory and CPU counters. Used by the
//! memory and CPU scenarios, and by the health/metrics endpoints.

use serde::Serialize;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

const MIB: f64 = 1024.0 * 1024.0;

/// Point-in-time resource counters for this process
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessSnapshot {
    pub rss_bytes: u64,
    pub virtual_bytes: u64,
    /// Accumulated CPU time across all threads
    pub cpu_time_ms: u64,
    /// Usage since the previous refresh, 100% per core
    pub cpu_usage_percent: f32,
    /// CPU time spent in user mode, all threads
    pub user_cpu_ms: u64,
    /// CPU time spent in the kernel on our behalf, all threads
    pub system_cpu_ms: u64,
}

impl ProcessSnapshot {
    pub fn rss_mib(&self) -> f64 {
        to_mib(self.rss_bytes)
    }
}

pub struct ProcessProbe {
    system: System,
    pid: Pid,
}

impl ProcessProbe {
    pub fn new() -> Self {
        let mut probe = Self {
            system: System::new(),
            pid: Pid::from_u32(std::process::id()),
        };
        // Prime the CPU counters so the first real sample has a baseline
        probe.snapshot();
        probe
    }

    pub fn snapshot(&mut self) -> ProcessSnapshot {
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[self.pid]),
            true,
            ProcessRefreshKind::nothing().with_memory().with_cpu(),
        );

        let (user_cpu_ms, system_cpu_ms) = cpu_split();
        match self.system.process(self.pid) {
            Some(process) => ProcessSnapshot {
                rss_bytes: process.memory(),
                virtual_bytes: process.virtual_memory(),
                cpu_time_ms: process.accumulated_cpu_time(),
                cpu_usage_percent: process.cpu_usage(),
                user_cpu_ms,
                system_cpu_ms,
            },
            None => {
                tracing::debug!("Process {} not visible to probe", self.pid);
                ProcessSnapshot {
                    user_cpu_ms,
                    system_cpu_ms,
                    ..ProcessSnapshot::default()
                }
            }
        }
    }
}

/// User and system CPU time of this process, from `getrusage(RUSAGE_SELF)`
#[cfg(unix)]
fn cpu_split() -> (u64, u64) {
    use nix::sys::resource::{getrusage, UsageWho};
    use nix::sys::time::TimeVal;

    fn as_millis(t: TimeVal) -> u64 {
        (t.tv_sec() as u64) * 1000 + (t.tv_usec() as u64) / 1000
    }

    match getrusage(UsageWho::RUSAGE_SELF) {
        Ok(usage) => (as_millis(usage.user_time()), as_millis(usage.system_time())),
        Err(e) => {
            tracing::debug!("getrusage failed: {}", e);
            (0, 0)
        }
    }
}

#[cfg(not(unix))]
fn cpu_split() -> (u64, u64) {
    (0, 0)
}

impl Default for ProcessProbe {
    fn default() -> Self {
        Self::new()
    }
}

pub fn to_mib(bytes: u64) -> f64 {
    bytes as f64 / MIB
}

/// `12.34MB` style rendering used in log records
pub fn format_mib(bytes: u64) -> String {
    format!("{:.2}MB", to_mib(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reports_resident_memory() {
        let mut probe = ProcessProbe::new();
        let snapshot = probe.snapshot();
        assert!(snapshot.rss_bytes > 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_user_cpu_time_grows_under_load() {
        let mut probe = ProcessProbe::new();
        let before = probe.snapshot();

        let started = std::time::Instant::now();
        let mut acc = 0.0f64;
        while started.elapsed() < std::time::Duration::from_millis(300) {
            acc += std::hint::black_box(acc.sqrt() + 1.0);
        }
        std::hint::black_box(acc);

        let after = probe.snapshot();
        assert!(after.user_cpu_ms > before.user_cpu_ms, "{:?} -> {:?}", before, after);
        assert!(after.system_cpu_ms >= before.system_cpu_ms);
    }

    #[test]
    fn test_format_mib() {
        assert_eq!(format_mib(0), "0.00MB");
        assert_eq!(format_mib(3 * 1024 * 1024 / 2), "1.50MB");
    }
}
