//! In-process fakes for CI/CD testing without a device.
//!
//! Every fake can write into a shared [`Journal`], so a test can assert on
//! the exact interleaving of alerts, throttle commands, state saves and
//! shutdown requests produced by the kernel.
//!
//! # Example
//!
//! ```rust
//! use vigil_hal::sim::{JournalEntry, SimRig};
//! use vigil_hal::{MetricsSource, PowerControl};
//!
//! let rig = SimRig::new();
//! rig.metrics.set_voltage_v(12.0);
//! assert_eq!(rig.metrics.voltage_v().unwrap(), 12.0);
//!
//! rig.power.throttle(10).unwrap();
//! assert_eq!(rig.journal.entries(), vec![JournalEntry::Throttle(10)]);
//! ```

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use vigil_types::{
    Alert, AlertLevel, FaultEvent, KernelError, Metric, Priority, TaskDescriptor, TaskId,
};

use crate::alert::AlertChannel;
use crate::executor::{TaskExecutor, Work};
use crate::metrics::MetricsSource;
use crate::power::PowerControl;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ────────────────────────────────────────────────────────────────────────────
// Journal
// ────────────────────────────────────────────────────────────────────────────

/// One observable side effect recorded by a fake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalEntry {
    Alert { level: AlertLevel, title: String },
    Throttle(u8),
    SaveState,
    Shutdown(u32),
    Spawn { task: TaskId, priority: Priority },
    SetPriority { task: TaskId, priority: Priority },
    Terminate(TaskId),
}

/// Ordered, shareable record of side effects.  Clones share storage.
#[derive(Debug, Clone, Default)]
pub struct Journal {
    entries: Arc<Mutex<Vec<JournalEntry>>>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entry: JournalEntry) {
        lock(&self.entries).push(entry);
    }

    /// Snapshot of everything recorded so far, oldest first.
    pub fn entries(&self) -> Vec<JournalEntry> {
        lock(&self.entries).clone()
    }

    pub fn clear(&self) {
        lock(&self.entries).clear();
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Metrics
// ────────────────────────────────────────────────────────────────────────────

struct Readings {
    boot_time_ms: u64,
    load_average: f64,
    io_latency_ms: u64,
    free_memory_kb: u64,
    voltage_v: f64,
    battery_temperature_c: i32,
    failing: HashSet<Metric>,
    faults: VecDeque<FaultEvent>,
}

/// Scriptable metrics feed.  Starts from healthy values: boot 9 s, load 0.5,
/// 0 ms I/O latency, 1 GiB free, 17 V, 35 °C.
pub struct SimMetrics {
    readings: Mutex<Readings>,
}

impl Default for SimMetrics {
    fn default() -> Self {
        Self {
            readings: Mutex::new(Readings {
                boot_time_ms: 9_000,
                load_average: 0.5,
                io_latency_ms: 0,
                free_memory_kb: 1_048_576,
                voltage_v: 17.0,
                battery_temperature_c: 35,
                failing: HashSet::new(),
                faults: VecDeque::new(),
            }),
        }
    }
}

impl SimMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_boot_time_ms(&self, value: u64) {
        lock(&self.readings).boot_time_ms = value;
    }

    pub fn set_load_average(&self, value: f64) {
        lock(&self.readings).load_average = value;
    }

    pub fn set_io_latency_ms(&self, value: u64) {
        lock(&self.readings).io_latency_ms = value;
    }

    pub fn set_free_memory_kb(&self, value: u64) {
        lock(&self.readings).free_memory_kb = value;
    }

    pub fn set_voltage_v(&self, value: f64) {
        lock(&self.readings).voltage_v = value;
    }

    pub fn set_battery_temperature_c(&self, value: i32) {
        lock(&self.readings).battery_temperature_c = value;
    }

    /// Make every subsequent read of `metric` fail.
    pub fn fail(&self, metric: Metric) {
        lock(&self.readings).failing.insert(metric);
    }

    /// Undo [`fail`][Self::fail].
    pub fn restore(&self, metric: Metric) {
        lock(&self.readings).failing.remove(&metric);
    }

    /// Queue a fault for the next [`drain_faults`][MetricsSource::drain_faults].
    pub fn inject_fault(&self, event: FaultEvent) {
        lock(&self.readings).faults.push_back(event);
    }

    fn read<T>(&self, metric: Metric, get: impl FnOnce(&Readings) -> T) -> Result<T, KernelError> {
        let readings = lock(&self.readings);
        if readings.failing.contains(&metric) {
            return Err(KernelError::MetricUnavailable {
                metric,
                details: "simulated read failure".to_string(),
            });
        }
        Ok(get(&readings))
    }
}

impl MetricsSource for SimMetrics {
    fn boot_time_ms(&self) -> Result<u64, KernelError> {
        self.read(Metric::BootTime, |r| r.boot_time_ms)
    }

    fn load_average(&self) -> Result<f64, KernelError> {
        self.read(Metric::LoadAverage, |r| r.load_average)
    }

    fn io_latency_ms(&self) -> Result<u64, KernelError> {
        self.read(Metric::IoLatency, |r| r.io_latency_ms)
    }

    fn free_memory_kb(&self) -> Result<u64, KernelError> {
        self.read(Metric::FreeMemory, |r| r.free_memory_kb)
    }

    fn voltage_v(&self) -> Result<f64, KernelError> {
        self.read(Metric::Voltage, |r| r.voltage_v)
    }

    fn battery_temperature_c(&self) -> Result<i32, KernelError> {
        self.read(Metric::BatteryTemperature, |r| r.battery_temperature_c)
    }

    fn drain_faults(&self) -> Vec<FaultEvent> {
        lock(&self.readings).faults.drain(..).collect()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Power
// ────────────────────────────────────────────────────────────────────────────

/// Power control that only records what it was asked to do.
#[derive(Default)]
pub struct SimPower {
    journal: Journal,
    fail_throttle: AtomicBool,
    fail_save_state: AtomicBool,
}

impl SimPower {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_journal(journal: Journal) -> Self {
        Self {
            journal,
            ..Self::default()
        }
    }

    /// Make throttle commands fail from now on.
    pub fn set_fail_throttle(&self, fail: bool) {
        self.fail_throttle.store(fail, Ordering::SeqCst);
    }

    /// Make state saves fail from now on.
    pub fn set_fail_save_state(&self, fail: bool) {
        self.fail_save_state.store(fail, Ordering::SeqCst);
    }

    /// Every throttle percentage requested, in order.
    pub fn throttle_calls(&self) -> Vec<u8> {
        self.journal
            .entries()
            .into_iter()
            .filter_map(|e| match e {
                JournalEntry::Throttle(p) => Some(p),
                _ => None,
            })
            .collect()
    }

    /// Every shutdown delay requested, in order.
    pub fn shutdown_calls(&self) -> Vec<u32> {
        self.journal
            .entries()
            .into_iter()
            .filter_map(|e| match e {
                JournalEntry::Shutdown(d) => Some(d),
                _ => None,
            })
            .collect()
    }

    pub fn save_state_calls(&self) -> usize {
        self.journal
            .entries()
            .iter()
            .filter(|e| matches!(e, JournalEntry::SaveState))
            .count()
    }
}

impl PowerControl for SimPower {
    fn throttle(&self, percent: u8) -> Result<(), KernelError> {
        if self.fail_throttle.load(Ordering::SeqCst) {
            return Err(KernelError::PowerControl(
                "simulated governor fault".to_string(),
            ));
        }
        self.journal.record(JournalEntry::Throttle(percent));
        Ok(())
    }

    fn save_state(&self) -> Result<(), KernelError> {
        if self.fail_save_state.load(Ordering::SeqCst) {
            return Err(KernelError::PowerControl(
                "simulated flash write fault".to_string(),
            ));
        }
        self.journal.record(JournalEntry::SaveState);
        Ok(())
    }

    fn emergency_shutdown(&self, delay_secs: u32) {
        self.journal.record(JournalEntry::Shutdown(delay_secs));
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Executor
// ────────────────────────────────────────────────────────────────────────────

/// Executor that queues work instead of running it.
///
/// Tasks stay "running" until the test calls [`run_pending`][Self::run_pending],
/// which makes eviction and rebalancing scenarios deterministic.
#[derive(Default)]
pub struct SimExecutor {
    journal: Journal,
    pending: Mutex<Vec<(TaskId, Work)>>,
    priorities: Mutex<HashMap<TaskId, Priority>>,
    fail_spawn: AtomicBool,
    fail_terminate: AtomicBool,
}

impl SimExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_journal(journal: Journal) -> Self {
        Self {
            journal,
            ..Self::default()
        }
    }

    pub fn set_fail_spawn(&self, fail: bool) {
        self.fail_spawn.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_terminate(&self, fail: bool) {
        self.fail_terminate.store(fail, Ordering::SeqCst);
    }

    /// Priority the executor currently applies to `id`.
    pub fn priority_of(&self, id: TaskId) -> Option<Priority> {
        lock(&self.priorities).get(&id).copied()
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }

    /// Run every queued work item on the calling thread.  Returns how many
    /// items ran.
    pub fn run_pending(&self) -> usize {
        let batch: Vec<(TaskId, Work)> = lock(&self.pending).drain(..).collect();
        let count = batch.len();
        for (_, work) in batch {
            work();
        }
        count
    }
}

impl TaskExecutor for SimExecutor {
    fn spawn(&self, task: &TaskDescriptor, work: Work) -> Result<(), KernelError> {
        if self.fail_spawn.load(Ordering::SeqCst) {
            return Err(KernelError::SchedulingFailed(
                "simulated thread creation failure".to_string(),
            ));
        }
        lock(&self.priorities).insert(task.id, task.priority);
        lock(&self.pending).push((task.id, work));
        self.journal.record(JournalEntry::Spawn {
            task: task.id,
            priority: task.priority,
        });
        Ok(())
    }

    fn set_priority(&self, id: TaskId, priority: Priority) -> Result<(), KernelError> {
        match lock(&self.priorities).get_mut(&id) {
            Some(current) => *current = priority,
            None => return Err(KernelError::TaskNotFound(id)),
        }
        self.journal
            .record(JournalEntry::SetPriority { task: id, priority });
        Ok(())
    }

    fn terminate(&self, id: TaskId) -> Result<(), KernelError> {
        if self.fail_terminate.load(Ordering::SeqCst) {
            return Err(KernelError::SchedulingFailed(format!(
                "simulated kill failure for {id}"
            )));
        }
        if lock(&self.priorities).remove(&id).is_none() {
            return Err(KernelError::TaskNotFound(id));
        }
        lock(&self.pending).retain(|(task, _)| *task != id);
        self.journal.record(JournalEntry::Terminate(id));
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Alerts
// ────────────────────────────────────────────────────────────────────────────

/// Alert channel that keeps every alert it is given.
pub struct RecordingAlertChannel {
    journal: Journal,
    alerts: Mutex<Vec<Alert>>,
    ready: AtomicBool,
    failing: AtomicBool,
}

impl Default for RecordingAlertChannel {
    fn default() -> Self {
        Self::with_journal(Journal::new())
    }
}

impl RecordingAlertChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_journal(journal: Journal) -> Self {
        Self {
            journal,
            alerts: Mutex::new(Vec::new()),
            ready: AtomicBool::new(true),
            failing: AtomicBool::new(false),
        }
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn alerts(&self) -> Vec<Alert> {
        lock(&self.alerts).clone()
    }

    /// Alerts recorded at exactly `level`.
    pub fn at_level(&self, level: AlertLevel) -> Vec<Alert> {
        lock(&self.alerts)
            .iter()
            .filter(|a| a.level == level)
            .cloned()
            .collect()
    }
}

impl AlertChannel for RecordingAlertChannel {
    fn id(&self) -> &str {
        "recording"
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn display(&self, alert: &Alert) -> Result<(), KernelError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(KernelError::AlertDelivery(
                "simulated display fault".to_string(),
            ));
        }
        lock(&self.alerts).push(alert.clone());
        self.journal.record(JournalEntry::Alert {
            level: alert.level,
            title: alert.title.clone(),
        });
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SimRig
// ────────────────────────────────────────────────────────────────────────────

/// A complete set of fakes wired to one [`Journal`].
pub struct SimRig {
    pub journal: Journal,
    pub metrics: Arc<SimMetrics>,
    pub power: Arc<SimPower>,
    pub executor: Arc<SimExecutor>,
    pub alerts: Arc<RecordingAlertChannel>,
}

impl SimRig {
    pub fn new() -> Self {
        let journal = Journal::new();
        Self {
            metrics: Arc::new(SimMetrics::new()),
            power: Arc::new(SimPower::with_journal(journal.clone())),
            executor: Arc::new(SimExecutor::with_journal(journal.clone())),
            alerts: Arc::new(RecordingAlertChannel::with_journal(journal.clone())),
            journal,
        }
    }
}

impl Default for SimRig {
    fn default() -> Self {
        Self::new()
    }
}
