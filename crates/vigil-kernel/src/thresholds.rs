//! KPI limits and the pure functions that compare a reading against them.
//!
//! Nothing in this module touches a collaborator: every check is a function
//! of `(Thresholds, value)` so the health monitor, the boot preflight and the
//! tests all agree on what counts as a breach.

use std::fmt;

use serde::{Deserialize, Serialize};
use vigil_types::HealthSnapshot;

/// Health KPI limits.  Loaded once at process start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Mean I/O latency above this raises a warning.
    pub max_io_latency_ms: u64,
    /// Load average above this triggers a scheduler rebalance.
    pub max_load_average: f64,
    /// Lower bound of the safe supply range (inclusive).
    pub min_voltage_v: f64,
    /// Upper bound of the safe supply range (inclusive).
    pub max_voltage_v: f64,
    /// Free memory strictly below this starts an eviction.
    pub critical_free_memory_kb: u64,
    /// Boot sequences slower than this raise a warning.
    pub max_boot_time_ms: u64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            max_io_latency_ms: 1,
            max_load_average: 2.0,
            min_voltage_v: 15.0,
            max_voltage_v: 19.0,
            critical_free_memory_kb: 262_144,
            max_boot_time_ms: 15_000,
        }
    }
}

/// A KPI that was exceeded, with the values needed to explain it.
#[derive(Debug, Clone, PartialEq)]
pub enum Breach {
    IoLatency { observed_ms: u64, limit_ms: u64 },
    Load { observed: f64, limit: f64 },
    Voltage { observed_v: f64, min_v: f64, max_v: f64 },
    MemoryPressure { free_kb: u64, threshold_kb: u64 },
    BootTime { observed_ms: u64, limit_ms: u64 },
}

impl fmt::Display for Breach {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Breach::IoLatency {
                observed_ms,
                limit_ms,
            } => write!(f, "I/O latency {observed_ms}ms exceeds {limit_ms}ms"),
            Breach::Load { observed, limit } => {
                write!(f, "load average {observed:.2} exceeds {limit:.2}")
            }
            Breach::Voltage {
                observed_v,
                min_v,
                max_v,
            } => write!(
                f,
                "supply at {observed_v}V outside safe range [{min_v}V, {max_v}V]"
            ),
            Breach::MemoryPressure {
                free_kb,
                threshold_kb,
            } => write!(
                f,
                "{free_kb} KiB free, below critical threshold of {threshold_kb} KiB"
            ),
            Breach::BootTime {
                observed_ms,
                limit_ms,
            } => write!(f, "boot took {observed_ms}ms, KPI is {limit_ms}ms"),
        }
    }
}

impl Thresholds {
    pub fn check_io_latency(&self, latency_ms: u64) -> Option<Breach> {
        (latency_ms > self.max_io_latency_ms).then_some(Breach::IoLatency {
            observed_ms: latency_ms,
            limit_ms: self.max_io_latency_ms,
        })
    }

    pub fn check_load(&self, load_average: f64) -> Option<Breach> {
        (load_average > self.max_load_average).then_some(Breach::Load {
            observed: load_average,
            limit: self.max_load_average,
        })
    }

    /// NaN readings are treated as out of range.
    pub fn check_voltage(&self, voltage_v: f64) -> Option<Breach> {
        let in_range = (self.min_voltage_v..=self.max_voltage_v).contains(&voltage_v);
        (!in_range).then_some(Breach::Voltage {
            observed_v: voltage_v,
            min_v: self.min_voltage_v,
            max_v: self.max_voltage_v,
        })
    }

    pub fn check_memory(&self, free_kb: u64) -> Option<Breach> {
        (free_kb < self.critical_free_memory_kb).then_some(Breach::MemoryPressure {
            free_kb,
            threshold_kb: self.critical_free_memory_kb,
        })
    }

    pub fn check_boot_time(&self, boot_time_ms: u64) -> Option<Breach> {
        (boot_time_ms > self.max_boot_time_ms).then_some(Breach::BootTime {
            observed_ms: boot_time_ms,
            limit_ms: self.max_boot_time_ms,
        })
    }

    /// Every periodic breach in `snapshot`, in tick order: I/O latency, load,
    /// voltage, memory.  Boot time is a one-shot KPI and is not included.
    pub fn evaluate(&self, snapshot: &HealthSnapshot) -> Vec<Breach> {
        [
            snapshot.io_latency_ms.and_then(|v| self.check_io_latency(v)),
            snapshot.load_average.and_then(|v| self.check_load(v)),
            snapshot.voltage_v.and_then(|v| self.check_voltage(v)),
            snapshot.free_memory_kb.and_then(|v| self.check_memory(v)),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> HealthSnapshot {
        HealthSnapshot {
            boot_time_ms: Some(9_000),
            load_average: Some(0.5),
            io_latency_ms: Some(0),
            free_memory_kb: Some(1_048_576),
            voltage_v: Some(17.0),
            ..HealthSnapshot::empty()
        }
    }

    #[test]
    fn healthy_snapshot_has_no_breaches() {
        assert!(Thresholds::default().evaluate(&snapshot()).is_empty());
    }

    #[test]
    fn limits_are_exclusive_for_latency_and_load() {
        let t = Thresholds::default();
        assert!(t.check_io_latency(1).is_none());
        assert!(t.check_io_latency(2).is_some());
        assert!(t.check_load(2.0).is_none());
        assert!(t.check_load(2.01).is_some());
    }

    #[test]
    fn voltage_range_is_inclusive() {
        let t = Thresholds::default();
        assert!(t.check_voltage(15.0).is_none());
        assert!(t.check_voltage(19.0).is_none());
        assert!(t.check_voltage(14.9).is_some());
        assert!(t.check_voltage(19.1).is_some());
        assert!(t.check_voltage(f64::NAN).is_some());
    }

    #[test]
    fn voltage_breach_names_reading_and_range() {
        let breach = Thresholds::default().check_voltage(12.0).unwrap();
        let text = breach.to_string();
        assert!(text.contains("12V"), "{text}");
        assert!(text.contains("[15V, 19V]"), "{text}");
    }

    #[test]
    fn memory_fires_only_strictly_below_threshold() {
        let t = Thresholds::default();
        assert!(t.check_memory(262_144).is_none());
        assert_eq!(
            t.check_memory(262_143),
            Some(Breach::MemoryPressure {
                free_kb: 262_143,
                threshold_kb: 262_144
            })
        );
    }

    #[test]
    fn boot_time_kpi() {
        let t = Thresholds::default();
        assert!(t.check_boot_time(15_000).is_none());
        assert!(t.check_boot_time(15_001).is_some());
    }

    #[test]
    fn evaluate_skips_missing_metrics_and_keeps_tick_order() {
        let mut s = snapshot();
        s.io_latency_ms = Some(5);
        s.load_average = None;
        s.voltage_v = Some(12.0);
        s.free_memory_kb = Some(1);

        let breaches = Thresholds::default().evaluate(&s);
        assert_eq!(breaches.len(), 3);
        assert!(matches!(breaches[0], Breach::IoLatency { .. }));
        assert!(matches!(breaches[1], Breach::Voltage { .. }));
        assert!(matches!(breaches[2], Breach::MemoryPressure { .. }));
    }

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let t: Thresholds = toml::from_str("max_load_average = 3.5").unwrap();
        assert_eq!(t.max_load_average, 3.5);
        assert_eq!(t.critical_free_memory_kb, 262_144);
    }
}
