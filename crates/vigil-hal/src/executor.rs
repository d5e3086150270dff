//! Generic `TaskExecutor` trait: the thread-creation side of the scheduler.
//!
//! The kernel's `TaskScheduler` decides *what* runs at *which* priority; an
//! executor turns that decision into an actual execution context.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use tracing::{debug, warn};
use vigil_types::{KernelError, Priority, TaskDescriptor, TaskId};

/// A unit of work handed to an executor.
pub type Work = Box<dyn FnOnce() + Send + 'static>;

/// Runs admitted work and applies scheduling decisions to it.
pub trait TaskExecutor: Send + Sync {
    /// Start `work` for `task`.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::SchedulingFailed`] when no execution context
    /// could be created.  The work is dropped in that case.
    fn spawn(&self, task: &TaskDescriptor, work: Work) -> Result<(), KernelError>;

    /// Apply a new priority to a running task.
    fn set_priority(&self, id: TaskId, priority: Priority) -> Result<(), KernelError>;

    /// Forcefully stop a task so its resources can be reclaimed.
    fn terminate(&self, id: TaskId) -> Result<(), KernelError>;
}

/// Executor that gives every task its own named OS thread.
///
/// Host threads have no portable priority knob and cannot be killed from the
/// outside, so [`set_priority`][TaskExecutor::set_priority] only records the
/// request and [`terminate`][TaskExecutor::terminate] detaches the thread.
#[derive(Default)]
pub struct ThreadExecutor {
    threads: Mutex<HashMap<TaskId, JoinHandle<()>>>,
}

impl ThreadExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of threads that have not finished yet.
    pub fn live_threads(&self) -> usize {
        self.threads()
            .values()
            .filter(|handle| !handle.is_finished())
            .count()
    }

    fn threads(&self) -> MutexGuard<'_, HashMap<TaskId, JoinHandle<()>>> {
        self.threads.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TaskExecutor for ThreadExecutor {
    fn spawn(&self, task: &TaskDescriptor, work: Work) -> Result<(), KernelError> {
        let handle = thread::Builder::new()
            .name(format!("vigil-{}", task.name))
            .spawn(work)
            .map_err(|e| {
                KernelError::SchedulingFailed(format!("thread for '{}': {e}", task.name))
            })?;

        let mut threads = self.threads();
        threads.retain(|_, h| !h.is_finished());
        threads.insert(task.id, handle);
        debug!(task = %task.id, priority = %task.priority, "thread spawned");
        Ok(())
    }

    fn set_priority(&self, id: TaskId, priority: Priority) -> Result<(), KernelError> {
        if !self.threads().contains_key(&id) {
            return Err(KernelError::TaskNotFound(id));
        }
        debug!(task = %id, %priority, "priority change recorded");
        Ok(())
    }

    fn terminate(&self, id: TaskId) -> Result<(), KernelError> {
        match self.threads().remove(&id) {
            Some(handle) => {
                if !handle.is_finished() {
                    warn!(task = %id, "thread detached; it stops at its next exit point");
                }
                Ok(())
            }
            None => Err(KernelError::TaskNotFound(id)),
        }
    }
}
