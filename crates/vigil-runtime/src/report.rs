//! Human-readable health summary.

use std::fmt;

use vigil_types::{FaultState, HealthSnapshot};

/// One sampled snapshot plus the kernel's own state, ready for display.
#[derive(Debug, Clone)]
pub struct HealthReport {
    pub snapshot: HealthSnapshot,
    pub active_tasks: usize,
    pub fault_state: FaultState,
}

impl HealthReport {
    /// Free memory in whole MiB.
    pub fn free_memory_mib(&self) -> Option<u64> {
        self.snapshot.free_memory_kb.map(|kb| kb / 1024)
    }
}

fn field<T: fmt::Display>(value: Option<T>, unit: &str) -> String {
    match value {
        Some(v) => format!("{v}{unit}"),
        None => "unavailable".to_string(),
    }
}

impl fmt::Display for HealthReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = &self.snapshot;
        writeln!(f, "Health report ({})", s.taken_at.format("%Y-%m-%d %H:%M:%S UTC"))?;
        writeln!(f, "  Boot time    : {}", field(s.boot_time_ms, " ms"))?;
        writeln!(
            f,
            "  Load average : {}",
            field(s.load_average.map(|l| format!("{l:.2}")), "")
        )?;
        writeln!(f, "  I/O latency  : {}", field(s.io_latency_ms, " ms"))?;
        writeln!(f, "  Free memory  : {}", field(self.free_memory_mib(), " MiB"))?;
        writeln!(
            f,
            "  Voltage      : {}",
            field(s.voltage_v.map(|v| format!("{v:.1}")), " V")
        )?;
        writeln!(f, "  Active tasks : {}", self.active_tasks)?;
        write!(f, "  Fault state  : {}", self.fault_state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_every_field() {
        let report = HealthReport {
            snapshot: HealthSnapshot {
                boot_time_ms: Some(9_000),
                load_average: Some(0.5),
                io_latency_ms: Some(0),
                free_memory_kb: Some(1_048_576),
                voltage_v: Some(17.0),
                ..HealthSnapshot::empty()
            },
            active_tasks: 3,
            fault_state: FaultState::Normal,
        };
        let text = report.to_string();
        assert!(text.contains("Boot time    : 9000 ms"), "{text}");
        assert!(text.contains("Load average : 0.50"), "{text}");
        assert!(text.contains("Free memory  : 1024 MiB"), "{text}");
        assert!(text.contains("Voltage      : 17.0 V"), "{text}");
        assert!(text.contains("Active tasks : 3"), "{text}");
        assert!(text.ends_with("Fault state  : normal"), "{text}");
    }

    #[test]
    fn missing_metrics_render_as_unavailable() {
        let report = HealthReport {
            snapshot: HealthSnapshot::empty(),
            active_tasks: 0,
            fault_state: FaultState::Halted,
        };
        let text = report.to_string();
        assert_eq!(text.matches("unavailable").count(), 5, "{text}");
        assert!(text.contains("halted"));
    }
}
