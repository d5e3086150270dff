//! `vigil-hal` – Collaborator Abstraction Layer
//!
//! The kernel never talks to drivers, displays or power rails directly.  It
//! holds trait objects for the four collaborators it depends on, so a real
//! host implementation and a deterministic fake can be swapped without
//! touching scheduling or escalation logic.
//!
//! # Modules
//!
//! - [`alert`] – [`AlertChannel`]: human-visible notifications, plus the
//!   [`ConsoleAlertChannel`] best-effort fallback.
//! - [`metrics`] – [`MetricsSource`]: fallible reads of boot time, load,
//!   I/O latency, free memory, voltage and battery temperature, and the queue
//!   of pending fault events.
//! - [`power`] – [`PowerControl`]: compute throttling, state save and the
//!   emergency shutdown line, plus the logging-only [`DryRunPower`].
//! - [`executor`] – [`TaskExecutor`]: runs admitted work and applies
//!   priority changes and terminations.
//! - [`procfs`] – [`ProcMetrics`]: host metrics from `sysinfo` and `/proc/diskstats`.
//! - [`sim`] – in-process fakes sharing a [`Journal`][sim::Journal] for
//!   headless tests.

pub mod alert;
pub mod executor;
pub mod metrics;
pub mod power;
pub mod procfs;
pub mod sim;

pub use alert::{AlertChannel, ConsoleAlertChannel};
pub use executor::{TaskExecutor, ThreadExecutor, Work};
pub use metrics::MetricsSource;
pub use power::{DryRunPower, PowerControl};
pub use procfs::ProcMetrics;
pub use sim::{
    Journal, JournalEntry, RecordingAlertChannel, SimExecutor, SimMetrics, SimPower, SimRig,
};
