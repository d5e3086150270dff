//! [`ProcMetrics`] – host metrics for Linux machines.
//!
//! | Metric | Source |
//! |---|---|
//! | load average | `sysinfo::System::load_average`, one-minute value |
//! | free memory | `sysinfo::System::available_memory` |
//! | battery temperature | `sysinfo::Components`, first battery sensor |
//! | I/O latency | `/proc/diskstats`, time spent on I/O divided by completed I/Os |
//! | boot time | supplied by the caller, which measured its own start-up |
//!
//! Supply voltage has no host source and is reported as unavailable, as is
//! the battery temperature on machines without a battery sensor.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use sysinfo::{Components, MemoryRefreshKind, RefreshKind, System};
use tracing::debug;
use vigil_types::{KernelError, Metric};

use crate::metrics::{MetricsSource, unsupported};

/// Metrics source backed by `sysinfo` and `/proc/diskstats`.
pub struct ProcMetrics {
    root: PathBuf,
    boot_time_ms: Option<u64>,
    system: Mutex<System>,
    components: Mutex<Components>,
}

impl ProcMetrics {
    /// Read from the host.  `boot_time_ms` is the measured start-up duration,
    /// if the caller has one.
    pub fn new(boot_time_ms: Option<u64>) -> Self {
        Self::with_root("/proc", boot_time_ms)
    }

    /// Read `diskstats` from an alternative procfs mount.
    pub fn with_root(root: impl AsRef<Path>, boot_time_ms: Option<u64>) -> Self {
        let system = System::new_with_specifics(
            RefreshKind::nothing().with_memory(MemoryRefreshKind::nothing().with_ram()),
        );
        Self {
            root: root.as_ref().to_path_buf(),
            boot_time_ms,
            system: Mutex::new(system),
            components: Mutex::new(Components::new_with_refreshed_list()),
        }
    }

    fn read(&self, file: &str, metric: Metric) -> Result<String, KernelError> {
        let path = self.root.join(file);
        fs::read_to_string(&path).map_err(|e| KernelError::MetricUnavailable {
            metric,
            details: format!("{}: {e}", path.display()),
        })
    }

    fn system(&self) -> MutexGuard<'_, System> {
        self.system.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MetricsSource for ProcMetrics {
    fn boot_time_ms(&self) -> Result<u64, KernelError> {
        self.boot_time_ms.ok_or_else(|| unsupported(Metric::BootTime))
    }

    fn load_average(&self) -> Result<f64, KernelError> {
        let one = System::load_average().one;
        if one.is_finite() && one >= 0.0 {
            Ok(one)
        } else {
            Err(malformed(Metric::LoadAverage, "load average"))
        }
    }

    fn io_latency_ms(&self) -> Result<u64, KernelError> {
        let raw = self.read("diskstats", Metric::IoLatency)?;
        parse_diskstats_latency(&raw).ok_or_else(|| malformed(Metric::IoLatency, "diskstats"))
    }

    fn free_memory_kb(&self) -> Result<u64, KernelError> {
        let mut system = self.system();
        system.refresh_memory();
        if system.total_memory() == 0 {
            return Err(malformed(Metric::FreeMemory, "memory totals"));
        }
        Ok(system.available_memory() / 1024)
    }

    fn voltage_v(&self) -> Result<f64, KernelError> {
        Err(unsupported(Metric::Voltage))
    }

    fn battery_temperature_c(&self) -> Result<i32, KernelError> {
        let mut components = self.components.lock().unwrap_or_else(PoisonError::into_inner);
        components.refresh(true);
        let celsius = battery_celsius(components.iter().map(|c| (c.label(), c.temperature())));
        debug!(?celsius, sensors = components.iter().count(), "battery sensor scan");
        celsius.ok_or_else(|| unsupported(Metric::BatteryTemperature))
    }
}

fn malformed(metric: Metric, what: &str) -> KernelError {
    KernelError::MetricUnavailable {
        metric,
        details: format!("malformed {what}"),
    }
}

/// Reading of the first sensor labelled as a battery (`BAT0`, `battery`, …).
fn battery_celsius<'a>(sensors: impl Iterator<Item = (&'a str, Option<f32>)>) -> Option<i32> {
    sensors
        .filter(|(label, _)| {
            let label = label.to_ascii_lowercase();
            label.starts_with("bat") || label.contains("battery")
        })
        .find_map(|(_, temp)| temp.filter(|t| t.is_finite()))
        .map(|t| t.round() as i32)
}

fn parse_diskstats_latency(raw: &str) -> Option<u64> {
    let mut ops: u64 = 0;
    let mut busy_ms: u64 = 0;
    let mut seen = false;

    for line in raw.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 11 {
            continue;
        }
        // Virtual devices skew the average towards zero.
        if fields[2].starts_with("loop") || fields[2].starts_with("ram") {
            continue;
        }
        let num = |i: usize| fields[i].parse::<u64>().ok();
        let (reads, read_ms, writes, write_ms) = (num(3)?, num(6)?, num(7)?, num(10)?);
        ops = ops.saturating_add(reads).saturating_add(writes);
        busy_ms = busy_ms.saturating_add(read_ms).saturating_add(write_ms);
        seen = true;
    }

    if !seen {
        return None;
    }
    Some(if ops == 0 { 0 } else { busy_ms / ops })
}

#[cfg(test)]
mod tests {
    use super::*;

    const DISKSTATS: &str = "\
   7       0 loop0 500 0 1000 9000 0 0 0 0 0 10 10 0 0 0 0
 259       0 nvme0n1 1000 20 80000 1500 3000 40 90000 2500 0 3000 4000 0 0 0 0
   8       0 sda 1000 0 8000 2000 0 0 0 0 0 100 100 0 0 0 0
";

    #[test]
    fn diskstats_latency_skips_virtual_devices() {
        // nvme: 4000 ops, 4000 ms; sda: 1000 ops, 2000 ms → 6000 / 5000 = 1
        assert_eq!(parse_diskstats_latency(DISKSTATS), Some(1));
    }

    #[test]
    fn diskstats_without_completed_io_is_zero_latency() {
        let idle = "   8       0 sda 0 0 0 0 0 0 0 0 0 0 0\n";
        assert_eq!(parse_diskstats_latency(idle), Some(0));
        assert_eq!(parse_diskstats_latency(""), None);
    }

    #[test]
    fn battery_sensor_is_picked_by_label() {
        let sensors = [
            ("coretemp Package id 0", Some(55.0)),
            ("acpitz temp1", Some(40.0)),
            ("BAT0", Some(36.6)),
        ];
        assert_eq!(battery_celsius(sensors.into_iter()), Some(37));
    }

    #[test]
    fn battery_sensor_without_reading_is_skipped() {
        let sensors = [("BAT0", None), ("Battery Pack", Some(41.2))];
        assert_eq!(battery_celsius(sensors.into_iter()), Some(41));

        let no_battery = [("coretemp Core 0", Some(60.0))];
        assert_eq!(battery_celsius(no_battery.into_iter()), None);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn host_memory_and_load_are_readable() {
        let metrics = ProcMetrics::new(None);
        assert!(metrics.free_memory_kb().unwrap() > 0);
        assert!(metrics.load_average().unwrap() >= 0.0);
    }

    #[test]
    fn missing_proc_root_reports_metric_unavailable() {
        let metrics = ProcMetrics::with_root("/nonexistent-proc-root", Some(1200));
        assert!(matches!(
            metrics.io_latency_ms(),
            Err(KernelError::MetricUnavailable {
                metric: Metric::IoLatency,
                ..
            })
        ));
        assert_eq!(metrics.boot_time_ms().unwrap(), 1200);
    }

    #[test]
    fn voltage_and_boot_time_can_be_unsupported() {
        let metrics = ProcMetrics::new(None);
        assert!(metrics.voltage_v().is_err());
        assert!(metrics.boot_time_ms().is_err());
    }
}
