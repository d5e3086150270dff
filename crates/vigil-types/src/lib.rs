use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Scheduling priority of a task.  Higher variants preempt lower ones.
///
/// The raw levels (1, 3, 5, 7, 9) are the values drivers and callers use on
/// the wire; see [`Priority::from_level`].
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Priority {
    /// Idle-time work.
    Idle,
    /// Garbage collection, housekeeping, memory checks.
    Background,
    /// Standard user applications.
    #[default]
    Normal,
    /// Network and disk threads.
    HighIo,
    /// Kernel I/O and critical UI paths.
    RealTime,
}

impl Priority {
    /// Raw level of this rank.
    pub fn level(self) -> i32 {
        match self {
            Priority::Idle => 1,
            Priority::Background => 3,
            Priority::Normal => 5,
            Priority::HighIo => 7,
            Priority::RealTime => 9,
        }
    }

    /// Map a raw level onto a rank.
    ///
    /// Levels between two ranks round down to the lower one.  Returns `None`
    /// when `level` lies outside `1..=9`.
    pub fn from_level(level: i32) -> Option<Self> {
        match level {
            1..=2 => Some(Priority::Idle),
            3..=4 => Some(Priority::Background),
            5..=6 => Some(Priority::Normal),
            7..=8 => Some(Priority::HighIo),
            9 => Some(Priority::RealTime),
            _ => None,
        }
    }

    /// The rank directly below this one (`Idle` stays `Idle`).
    pub fn demoted(self) -> Self {
        match self {
            Priority::Idle | Priority::Background => Priority::Idle,
            Priority::Normal => Priority::Background,
            Priority::HighIo => Priority::Normal,
            Priority::RealTime => Priority::HighIo,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Priority::Idle => "idle",
            Priority::Background => "background",
            Priority::Normal => "normal",
            Priority::HighIo => "high-io",
            Priority::RealTime => "real-time",
        };
        f.write_str(name)
    }
}

/// Opaque identity of an admitted task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a task: `Submitted → Running → (Completed | Evicted)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Submitted,
    Running,
    Completed,
    Evicted,
}

impl TaskState {
    /// `true` while the task counts towards the scheduler's active total.
    pub fn is_active(self) -> bool {
        matches!(self, TaskState::Submitted | TaskState::Running)
    }
}

/// What an executor needs to know about a task it is asked to run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    pub id: TaskId,
    pub name: String,
    pub priority: Priority,
    pub io_bound: bool,
}

/// A single system metric read from the driver collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Metric {
    BootTime,
    LoadAverage,
    IoLatency,
    FreeMemory,
    Voltage,
    BatteryTemperature,
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Metric::BootTime => "boot_time",
            Metric::LoadAverage => "load_average",
            Metric::IoLatency => "io_latency",
            Metric::FreeMemory => "free_memory",
            Metric::Voltage => "voltage",
            Metric::BatteryTemperature => "battery_temperature",
        };
        f.write_str(name)
    }
}

/// Point-in-time health reading.  A metric whose read failed is `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub taken_at: DateTime<Utc>,
    pub boot_time_ms: Option<u64>,
    pub load_average: Option<f64>,
    pub io_latency_ms: Option<u64>,
    pub free_memory_kb: Option<u64>,
    pub voltage_v: Option<f64>,
}

impl HealthSnapshot {
    /// A snapshot taken now with every metric missing.
    pub fn empty() -> Self {
        Self {
            taken_at: Utc::now(),
            boot_time_ms: None,
            load_average: None,
            io_latency_ms: None,
            free_memory_kb: None,
            voltage_v: None,
        }
    }
}

/// Raw driver code for a cell over-temperature condition.
pub const CODE_OVER_TEMPERATURE: u32 = 101;
/// Raw driver code for an extreme discharge condition.
pub const CODE_EXTREME_DISCHARGE: u32 = 102;
/// Raw driver code for a Battery Management System failure.
pub const CODE_BMS_FAILURE: u32 = 103;

/// Critical battery / thermal fault reported by the power driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FaultCode {
    OverTemperature,
    ExtremeDischarge,
    /// BMS readings can no longer be trusted.
    BmsFailure,
    /// A raw code this kernel does not model.
    Unknown(u32),
}

impl FaultCode {
    pub fn from_raw(code: u32) -> Self {
        match code {
            CODE_OVER_TEMPERATURE => FaultCode::OverTemperature,
            CODE_EXTREME_DISCHARGE => FaultCode::ExtremeDischarge,
            CODE_BMS_FAILURE => FaultCode::BmsFailure,
            other => FaultCode::Unknown(other),
        }
    }

    pub fn raw(self) -> u32 {
        match self {
            FaultCode::OverTemperature => CODE_OVER_TEMPERATURE,
            FaultCode::ExtremeDischarge => CODE_EXTREME_DISCHARGE,
            FaultCode::BmsFailure => CODE_BMS_FAILURE,
            FaultCode::Unknown(code) => code,
        }
    }
}

impl fmt::Display for FaultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaultCode::OverTemperature => write!(f, "over-temperature ({})", self.raw()),
            FaultCode::ExtremeDischarge => write!(f, "extreme-discharge ({})", self.raw()),
            FaultCode::BmsFailure => write!(f, "bms-failure ({})", self.raw()),
            FaultCode::Unknown(code) => write!(f, "unknown ({code})"),
        }
    }
}

/// A fault as delivered by the battery / thermal driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaultEvent {
    pub code: FaultCode,
    /// Free-form diagnostic text from the driver.
    pub detail: String,
    pub detected_at: DateTime<Utc>,
}

impl FaultEvent {
    /// Build an event stamped with the current time.
    pub fn new(code: FaultCode, detail: impl Into<String>) -> Self {
        Self {
            code,
            detail: detail.into(),
            detected_at: Utc::now(),
        }
    }
}

/// Phase of the critical-fault escalation machine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FaultState {
    #[default]
    Normal,
    Throttling,
    SavingState,
    ShutdownPending,
    /// Terminal.
    Halted,
}

impl FaultState {
    fn stage(self) -> u8 {
        match self {
            FaultState::Normal => 0,
            FaultState::Throttling | FaultState::SavingState => 1,
            FaultState::ShutdownPending => 2,
            FaultState::Halted => 3,
        }
    }

    /// Transitions only ever move forward through the escalation stages.
    pub fn can_transition_to(self, next: FaultState) -> bool {
        next.stage() > self.stage()
    }
}

impl fmt::Display for FaultState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FaultState::Normal => "normal",
            FaultState::Throttling => "throttling",
            FaultState::SavingState => "saving-state",
            FaultState::ShutdownPending => "shutdown-pending",
            FaultState::Halted => "halted",
        };
        f.write_str(name)
    }
}

/// Severity of a user-visible notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AlertLevel {
    Info,
    Warning,
    /// Imminent hardware damage or resource exhaustion.
    Critical,
}

/// A notification handed to the alert channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub level: AlertLevel,
    pub title: String,
    pub detail: String,
    pub raised_at: DateTime<Utc>,
}

impl Alert {
    pub fn new(level: AlertLevel, title: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            level,
            title: title.into(),
            detail: detail.into(),
            raised_at: Utc::now(),
        }
    }
}

/// Unified event wrapper for the kernel event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g., "vigil-runtime::health_monitor"
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Variants of data routed over the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    Telemetry(HealthSnapshot),
    Alert(Alert),
    FaultTransition {
        from: FaultState,
        to: FaultState,
    },
    TaskEvicted {
        task: TaskId,
        name: String,
        freed_kb: u64,
    },
}

/// Error type shared by the scheduler, the controllers and every driver.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum KernelError {
    #[error("Scheduling failed: {0}")]
    SchedulingFailed(String),

    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Metric {metric} unavailable: {details}")]
    MetricUnavailable { metric: Metric, details: String },

    #[error("Alert delivery failed: {0}")]
    AlertDelivery(String),

    #[error("Power control error: {0}")]
    PowerControl(String),

    #[error("Event bus error: {0}")]
    Channel(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_ranks_are_ordered() {
        assert!(Priority::Idle < Priority::Background);
        assert!(Priority::Background < Priority::Normal);
        assert!(Priority::Normal < Priority::HighIo);
        assert!(Priority::HighIo < Priority::RealTime);
    }

    #[test]
    fn priority_from_level_maps_exact_ranks() {
        for p in [
            Priority::Idle,
            Priority::Background,
            Priority::Normal,
            Priority::HighIo,
            Priority::RealTime,
        ] {
            assert_eq!(Priority::from_level(p.level()), Some(p));
        }
    }

    #[test]
    fn priority_from_level_rounds_down_between_ranks() {
        assert_eq!(Priority::from_level(2), Some(Priority::Idle));
        assert_eq!(Priority::from_level(6), Some(Priority::Normal));
        assert_eq!(Priority::from_level(8), Some(Priority::HighIo));
    }

    #[test]
    fn priority_from_level_rejects_out_of_range() {
        assert_eq!(Priority::from_level(0), None);
        assert_eq!(Priority::from_level(10), None);
        assert_eq!(Priority::from_level(-3), None);
        assert_eq!(Priority::from_level(i32::MAX), None);
    }

    #[test]
    fn demoted_walks_down_one_rank() {
        assert_eq!(Priority::Normal.demoted(), Priority::Background);
        assert_eq!(Priority::RealTime.demoted(), Priority::HighIo);
        assert_eq!(Priority::Idle.demoted(), Priority::Idle);
    }

    #[test]
    fn task_state_activity() {
        assert!(TaskState::Submitted.is_active());
        assert!(TaskState::Running.is_active());
        assert!(!TaskState::Completed.is_active());
        assert!(!TaskState::Evicted.is_active());
    }

    #[test]
    fn fault_code_maps_driver_codes() {
        assert_eq!(FaultCode::from_raw(101), FaultCode::OverTemperature);
        assert_eq!(FaultCode::from_raw(102), FaultCode::ExtremeDischarge);
        assert_eq!(FaultCode::from_raw(103), FaultCode::BmsFailure);
        assert_eq!(FaultCode::from_raw(999), FaultCode::Unknown(999));
        assert_eq!(FaultCode::Unknown(42).raw(), 42);
    }

    #[test]
    fn fault_state_only_moves_forward() {
        use FaultState::*;
        assert!(Normal.can_transition_to(Throttling));
        assert!(Normal.can_transition_to(ShutdownPending));
        assert!(Throttling.can_transition_to(ShutdownPending));
        assert!(SavingState.can_transition_to(ShutdownPending));
        assert!(ShutdownPending.can_transition_to(Halted));

        assert!(!Throttling.can_transition_to(SavingState));
        assert!(!ShutdownPending.can_transition_to(Normal));
        assert!(!ShutdownPending.can_transition_to(Throttling));
        assert!(!Halted.can_transition_to(ShutdownPending));
        assert!(!Halted.can_transition_to(Halted));
    }

    #[test]
    fn event_roundtrip() {
        let event = Event::new(
            "vigil-kernel::fault_controller",
            EventPayload::FaultTransition {
                from: FaultState::Normal,
                to: FaultState::ShutdownPending,
            },
        );
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(event.id, back.id);
        assert!(matches!(
            back.payload,
            EventPayload::FaultTransition {
                to: FaultState::ShutdownPending,
                ..
            }
        ));
    }

    #[test]
    fn kernel_error_display() {
        let err = KernelError::MetricUnavailable {
            metric: Metric::Voltage,
            details: "sensor offline".to_string(),
        };
        assert!(err.to_string().contains("voltage"));
        assert!(err.to_string().contains("sensor offline"));

        let err2 = KernelError::SchedulingFailed("executor saturated".to_string());
        assert!(err2.to_string().contains("Scheduling failed"));
    }
}
