//! [`MemoryPressureController`] – selective task eviction when free memory
//! falls below the critical threshold.
//!
//! The victim is the lowest-priority active task below RealTime; among equal
//! priorities the one consuming the most memory goes first, and on a full
//! tie the earliest admitted.  One eviction runs at a time.

use std::sync::{Arc, Mutex, TryLockError};

use tracing::{error, info, warn};
use vigil_middleware::{EventBus, Topic};
use vigil_types::{Event, EventPayload, KernelError, Priority, TaskId};

use crate::alerting::AlertDispatcher;
use crate::scheduler::{EvictionCandidate, TaskScheduler};

const SOURCE: &str = "vigil-kernel::memory_pressure";

/// Why an eviction did not restore the system.
#[derive(Debug, Clone, PartialEq)]
pub enum EvictionFailure {
    /// Every active task is RealTime, or nothing is running.
    NoCandidate,
    /// The executor refused to terminate the victim.
    Executor(KernelError),
    /// The victim was evicted but released less than required.
    Insufficient { task: TaskId, freed_kb: u64 },
}

/// Result of one [`on_memory_pressure`][MemoryPressureController::on_memory_pressure] call.
#[derive(Debug, Clone, PartialEq)]
pub enum EvictionOutcome {
    /// Free memory is at or above the threshold.
    NotRequired,
    /// Another eviction is in flight; nothing was done.
    Busy,
    Evicted {
        task: TaskId,
        name: String,
        priority: Priority,
        freed_kb: u64,
        required_kb: u64,
    },
    /// A CRITICAL alert was raised.
    Failed {
        required_kb: u64,
        reason: EvictionFailure,
    },
}

pub struct MemoryPressureController {
    scheduler: Arc<TaskScheduler>,
    alerts: Arc<AlertDispatcher>,
    bus: Option<EventBus>,
    in_flight: Mutex<()>,
}

impl MemoryPressureController {
    pub fn new(scheduler: Arc<TaskScheduler>, alerts: Arc<AlertDispatcher>) -> Self {
        Self {
            scheduler,
            alerts,
            bus: None,
            in_flight: Mutex::new(()),
        }
    }

    /// Publish [`EventPayload::TaskEvicted`] on the `Scheduler` topic.
    pub fn with_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// React to `free_kb` of available memory against `threshold_kb`.
    pub fn on_memory_pressure(&self, free_kb: u64, threshold_kb: u64) -> EvictionOutcome {
        if free_kb >= threshold_kb {
            return EvictionOutcome::NotRequired;
        }

        let _guard = match self.in_flight.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                info!(free_kb, "eviction already in progress");
                return EvictionOutcome::Busy;
            }
        };

        let required_kb = threshold_kb - free_kb;
        warn!(free_kb, threshold_kb, required_kb, "memory pressure: selecting victim");

        let Some(victim) = select_victim(self.scheduler.eviction_candidates()) else {
            return self.fail(required_kb, EvictionFailure::NoCandidate);
        };
        let EvictionCandidate { task, .. } = victim;

        let freed_kb = match self.scheduler.evict(task.id) {
            Ok(freed) => freed,
            Err(e) => return self.fail(required_kb, EvictionFailure::Executor(e)),
        };

        if let Some(bus) = &self.bus {
            bus.emit(
                Topic::Scheduler,
                Event::new(
                    SOURCE,
                    EventPayload::TaskEvicted {
                        task: task.id,
                        name: task.name.clone(),
                        freed_kb,
                    },
                ),
            );
        }

        if freed_kb < required_kb {
            return self.fail(
                required_kb,
                EvictionFailure::Insufficient {
                    task: task.id,
                    freed_kb,
                },
            );
        }

        self.alerts.warning(
            "Memory pressure relieved",
            format!(
                "Stability restored: evicted '{}' ({}) freeing {freed_kb} KiB",
                task.name, task.id
            ),
        );
        EvictionOutcome::Evicted {
            task: task.id,
            name: task.name,
            priority: task.priority,
            freed_kb,
            required_kb,
        }
    }

    fn fail(&self, required_kb: u64, reason: EvictionFailure) -> EvictionOutcome {
        let detail = match &reason {
            EvictionFailure::NoCandidate => {
                format!("no evictable task; {required_kb} KiB still required")
            }
            EvictionFailure::Executor(e) => format!("eviction failed: {e}"),
            EvictionFailure::Insufficient { task, freed_kb } => format!(
                "evicted {task} but freed only {freed_kb} of {required_kb} KiB required"
            ),
        };
        error!(required_kb, %detail, "memory recovery failed");
        self.alerts.critical("Kernel panic imminent", detail);
        EvictionOutcome::Failed {
            required_kb,
            reason,
        }
    }
}

/// Lowest priority first; strictly larger memory wins a priority tie.
fn select_victim(candidates: Vec<EvictionCandidate>) -> Option<EvictionCandidate> {
    candidates.into_iter().reduce(|best, next| {
        let better = next.task.priority < best.task.priority
            || (next.task.priority == best.task.priority && next.memory_kb > best.memory_kb);
        if better { next } else { best }
    })
}
