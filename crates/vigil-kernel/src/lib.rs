//! `vigil-kernel` – Scheduling & Safety Escalation
//!
//! Decides what runs, at which priority, and what gets sacrificed when the
//! machine is in trouble.  It never samples anything itself; the runtime's
//! health monitor feeds it readings and fault events.
//!
//! # Modules
//!
//! - [`thresholds`] – [`Thresholds`][thresholds::Thresholds] and the pure
//!   breach checks shared by the monitor and the boot preflight.
//! - [`alerting`] – [`AlertDispatcher`][alerting::AlertDispatcher]: primary
//!   channel with console fallback and a display latency budget.
//! - [`scheduler`] – [`TaskScheduler`][scheduler::TaskScheduler]: priority
//!   admission, load-driven rebalancing and eviction bookkeeping.
//! - [`memory_pressure`] – [`MemoryPressureController`][memory_pressure::MemoryPressureController]:
//!   evicts the cheapest-to-lose task when free memory runs out.
//! - [`fault_controller`] – [`CriticalFaultController`][fault_controller::CriticalFaultController]:
//!   the throttle → save-state → shutdown state machine for battery and
//!   thermal faults.

pub mod alerting;
pub mod fault_controller;
pub mod memory_pressure;
pub mod scheduler;
pub mod thresholds;

pub use alerting::AlertDispatcher;
pub use fault_controller::{CriticalFaultController, FaultOutcome, Transition};
pub use memory_pressure::{EvictionFailure, EvictionOutcome, MemoryPressureController};
pub use scheduler::{EvictionCandidate, TaskHandle, TaskScheduler, TaskSpec};
pub use thresholds::{Breach, Thresholds};
