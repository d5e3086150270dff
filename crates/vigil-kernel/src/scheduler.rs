//! [`TaskScheduler`] – priority admission and health-driven rebalancing.
//!
//! The scheduler owns the registry of admitted tasks.  Execution itself is
//! delegated to an injected [`TaskExecutor`]; the scheduler only decides the
//! priority a task runs at and keeps the lifecycle bookkeeping:
//!
//! ```text
//! Submitted ──► Running ──► Completed
//!                  │
//!                  └──────► Evicted
//! ```
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use vigil_hal::SimExecutor;
//! use vigil_kernel::scheduler::{TaskScheduler, TaskSpec};
//! use vigil_types::{Priority, TaskState};
//!
//! let executor = Arc::new(SimExecutor::new());
//! let scheduler = TaskScheduler::new(executor.clone(), 2.0);
//!
//! // Level 42 is out of range and lands at Normal.
//! let handle = scheduler.submit(TaskSpec::new("indexer", || {}).level(42)).unwrap();
//! assert_eq!(handle.priority(), Some(Priority::Normal));
//! assert_eq!(handle.status(), Some(TaskState::Running));
//!
//! executor.run_pending();
//! assert_eq!(handle.status(), Some(TaskState::Completed));
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::{debug, error, info, warn};
use vigil_hal::{TaskExecutor, Work};
use vigil_types::{KernelError, Priority, TaskDescriptor, TaskId, TaskState};

/// How many finished tasks stay queryable through their handles.
const FINISHED_HISTORY: usize = 1024;

// ────────────────────────────────────────────────────────────────────────────
// TaskSpec
// ────────────────────────────────────────────────────────────────────────────

/// Everything needed to admit one task.
pub struct TaskSpec {
    name: String,
    level: i32,
    io_bound: bool,
    memory_kb: u64,
    work: Work,
}

impl TaskSpec {
    /// A CPU-bound task at Normal priority with no memory estimate.
    pub fn new(name: impl Into<String>, work: impl FnOnce() + Send + 'static) -> Self {
        Self {
            name: name.into(),
            level: Priority::Normal.level(),
            io_bound: false,
            memory_kb: 0,
            work: Box::new(work),
        }
    }

    /// Raw priority level.  Values outside `1..=9` are admitted at Normal.
    pub fn level(mut self, level: i32) -> Self {
        self.level = level;
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.level = priority.level();
        self
    }

    pub fn io_bound(mut self, io_bound: bool) -> Self {
        self.io_bound = io_bound;
        self
    }

    /// Estimated resident memory in KiB.
    pub fn memory_kb(mut self, memory_kb: u64) -> Self {
        self.memory_kb = memory_kb;
        self
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Registry
// ────────────────────────────────────────────────────────────────────────────

struct TaskRecord {
    descriptor: TaskDescriptor,
    state: TaskState,
    memory_kb: u64,
    /// Admission order, used to break ties deterministically.
    seq: u64,
}

#[derive(Default)]
struct Registry {
    tasks: HashMap<TaskId, TaskRecord>,
    finished: VecDeque<TaskId>,
    next_seq: u64,
}

impl Registry {
    /// Move an active task into a terminal state.  Returns `false` if the task
    /// is unknown or already finished.
    fn finish(&mut self, id: TaskId, state: TaskState) -> bool {
        match self.tasks.get_mut(&id) {
            Some(record) if record.state.is_active() => record.state = state,
            _ => return false,
        }
        self.finished.push_back(id);
        while self.finished.len() > FINISHED_HISTORY {
            if let Some(oldest) = self.finished.pop_front() {
                self.tasks.remove(&oldest);
            }
        }
        true
    }

    fn active(&self) -> impl Iterator<Item = &TaskRecord> {
        self.tasks.values().filter(|r| r.state.is_active())
    }
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

// ────────────────────────────────────────────────────────────────────────────
// TaskHandle
// ────────────────────────────────────────────────────────────────────────────

/// Caller-side view of an admitted task.
///
/// Holds only a weak reference to the registry: a handle never keeps the
/// scheduler alive, and queries return `None` once the scheduler is gone or
/// the task has aged out of the finished history.
#[derive(Clone)]
pub struct TaskHandle {
    id: TaskId,
    registry: Weak<Mutex<Registry>>,
}

impl TaskHandle {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn status(&self) -> Option<TaskState> {
        let registry = self.registry.upgrade()?;
        let state = lock(&registry).tasks.get(&self.id).map(|r| r.state);
        state
    }

    pub fn priority(&self) -> Option<Priority> {
        let registry = self.registry.upgrade()?;
        let priority = lock(&registry)
            .tasks
            .get(&self.id)
            .map(|r| r.descriptor.priority);
        priority
    }
}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle").field("id", &self.id).finish()
    }
}

/// An active task that may be evicted under memory pressure.
#[derive(Debug, Clone, PartialEq)]
pub struct EvictionCandidate {
    pub task: TaskDescriptor,
    pub memory_kb: u64,
}

// ────────────────────────────────────────────────────────────────────────────
// TaskScheduler
// ────────────────────────────────────────────────────────────────────────────

pub struct TaskScheduler {
    registry: Arc<Mutex<Registry>>,
    executor: Arc<dyn TaskExecutor>,
    max_load_average: f64,
}

impl TaskScheduler {
    /// `max_load_average` is the load above which [`rebalance`][Self::rebalance]
    /// demotes CPU-bound work.
    pub fn new(executor: Arc<dyn TaskExecutor>, max_load_average: f64) -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry::default())),
            executor,
            max_load_average,
        }
    }

    /// Admit a task and hand it to the executor.
    ///
    /// Out-of-range priority levels are coerced to Normal and logged.
    /// I/O-bound tasks are never admitted below HighIo.
    ///
    /// # Errors
    ///
    /// [`KernelError::SchedulingFailed`] when the executor cannot start the
    /// work.  Nothing is registered in that case.
    pub fn submit(&self, spec: TaskSpec) -> Result<TaskHandle, KernelError> {
        let TaskSpec {
            name,
            level,
            io_bound,
            memory_kb,
            work,
        } = spec;

        let mut priority = Priority::from_level(level).unwrap_or_else(|| {
            warn!(task = %name, level, "priority level out of range; admitting at normal");
            Priority::Normal
        });
        if io_bound && priority < Priority::HighIo {
            debug!(task = %name, requested = %priority, "I/O-bound task lifted to high-io");
            priority = Priority::HighIo;
        }

        let descriptor = TaskDescriptor {
            id: TaskId::new(),
            name,
            priority,
            io_bound,
        };
        let id = descriptor.id;

        {
            let mut registry = lock(&self.registry);
            let seq = registry.next_seq;
            registry.next_seq += 1;
            registry.tasks.insert(
                id,
                TaskRecord {
                    descriptor: descriptor.clone(),
                    state: TaskState::Submitted,
                    memory_kb,
                    seq,
                },
            );
        }

        let weak = Arc::downgrade(&self.registry);
        let wrapped: Work = Box::new(move || {
            work();
            if let Some(registry) = weak.upgrade() {
                if lock(&registry).finish(id, TaskState::Completed) {
                    debug!(task = %id, "task completed");
                }
            }
        });

        if let Err(e) = self.executor.spawn(&descriptor, wrapped) {
            lock(&self.registry).tasks.remove(&id);
            error!(task = %id, name = %descriptor.name, error = %e, "task admission failed");
            return Err(match e {
                KernelError::SchedulingFailed(_) => e,
                other => KernelError::SchedulingFailed(other.to_string()),
            });
        }

        if let Some(record) = lock(&self.registry).tasks.get_mut(&id) {
            if record.state == TaskState::Submitted {
                record.state = TaskState::Running;
            }
        }
        info!(task = %id, name = %descriptor.name, %priority, io_bound, "task admitted");

        Ok(TaskHandle {
            id,
            registry: Arc::downgrade(&self.registry),
        })
    }

    /// Demote every running CPU-bound Normal task to Background when
    /// `current_load_average` exceeds the configured maximum.
    ///
    /// RealTime, HighIo and I/O-bound tasks are never touched, and a task is
    /// demoted at most once.  Returns the number of tasks demoted.
    pub fn rebalance(&self, current_load_average: f64) -> usize {
        if current_load_average.is_nan() || current_load_average <= self.max_load_average {
            return 0;
        }

        let mut registry = lock(&self.registry);
        let mut demoted = 0;
        for record in registry.tasks.values_mut() {
            let task = &mut record.descriptor;
            if record.state != TaskState::Running
                || task.io_bound
                || task.priority != Priority::Normal
            {
                continue;
            }
            match self.executor.set_priority(task.id, Priority::Background) {
                Ok(()) => {
                    task.priority = Priority::Background;
                    demoted += 1;
                }
                Err(e) => warn!(task = %task.id, error = %e, "demotion rejected by executor"),
            }
        }

        if demoted > 0 {
            info!(
                load = current_load_average,
                demoted, "rebalanced: CPU-bound tasks demoted to background"
            );
        }
        demoted
    }

    /// Tasks that are Submitted or Running.
    pub fn active_count(&self) -> usize {
        lock(&self.registry).active().count()
    }

    /// Mark a task Completed.  Completing a finished task is a no-op.
    pub fn complete(&self, id: TaskId) -> Result<(), KernelError> {
        let mut registry = lock(&self.registry);
        if !registry.tasks.contains_key(&id) {
            return Err(KernelError::TaskNotFound(id));
        }
        registry.finish(id, TaskState::Completed);
        Ok(())
    }

    /// Terminate an active task and return its reclaimed memory estimate.
    ///
    /// # Errors
    ///
    /// [`KernelError::TaskNotFound`] when the task is not active, or whatever
    /// the executor reports when termination fails (the task then stays
    /// active).
    pub fn evict(&self, id: TaskId) -> Result<u64, KernelError> {
        let mut registry = lock(&self.registry);
        let memory_kb = match registry.tasks.get(&id) {
            Some(record) if record.state.is_active() => record.memory_kb,
            _ => return Err(KernelError::TaskNotFound(id)),
        };
        self.executor.terminate(id)?;
        registry.finish(id, TaskState::Evicted);
        warn!(task = %id, freed_kb = memory_kb, "task evicted");
        Ok(memory_kb)
    }

    /// Update the memory estimate of a task.
    pub fn report_memory(&self, id: TaskId, memory_kb: u64) -> Result<(), KernelError> {
        match lock(&self.registry).tasks.get_mut(&id) {
            Some(record) => {
                record.memory_kb = memory_kb;
                Ok(())
            }
            None => Err(KernelError::TaskNotFound(id)),
        }
    }

    pub fn status(&self, id: TaskId) -> Option<TaskState> {
        lock(&self.registry).tasks.get(&id).map(|r| r.state)
    }

    pub fn priority_of(&self, id: TaskId) -> Option<Priority> {
        lock(&self.registry)
            .tasks
            .get(&id)
            .map(|r| r.descriptor.priority)
    }

    /// Active tasks below RealTime, in admission order.
    pub fn eviction_candidates(&self) -> Vec<EvictionCandidate> {
        let registry = lock(&self.registry);
        let mut candidates: Vec<&TaskRecord> = registry
            .active()
            .filter(|r| r.descriptor.priority < Priority::RealTime)
            .collect();
        candidates.sort_by_key(|r| r.seq);
        candidates
            .into_iter()
            .map(|r| EvictionCandidate {
                task: r.descriptor.clone(),
                memory_kb: r.memory_kb,
            })
            .collect()
    }
}
