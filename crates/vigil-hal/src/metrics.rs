//! Generic `MetricsSource` trait for the battery / thermal / I-O driver.

use vigil_types::{FaultEvent, KernelError, Metric};

/// Raw system readings and fault notifications supplied by the driver.
///
/// Every read is synchronous and fallible.  A failure affects only the metric
/// being read; callers are expected to carry on with the others.
pub trait MetricsSource: Send + Sync {
    /// How long the last boot sequence took, in milliseconds.
    fn boot_time_ms(&self) -> Result<u64, KernelError>;

    /// One-minute load average.
    fn load_average(&self) -> Result<f64, KernelError>;

    /// Mean I/O completion latency in milliseconds.
    fn io_latency_ms(&self) -> Result<u64, KernelError>;

    /// Available memory in KiB.
    fn free_memory_kb(&self) -> Result<u64, KernelError>;

    /// Supply voltage in volts.
    fn voltage_v(&self) -> Result<f64, KernelError>;

    /// Battery cell temperature in °C.
    fn battery_temperature_c(&self) -> Result<i32, KernelError>;

    /// Take every fault event raised since the previous call.  Each event is
    /// returned exactly once.
    fn drain_faults(&self) -> Vec<FaultEvent> {
        Vec::new()
    }
}

/// Build the error returned by sources that cannot provide `metric`.
pub fn unsupported(metric: Metric) -> KernelError {
    KernelError::MetricUnavailable {
        metric,
        details: "not supported by this driver".to_string(),
    }
}
