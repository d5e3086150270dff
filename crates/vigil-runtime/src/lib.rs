//! `vigil-runtime` – The Heartbeat
//!
//! Turns the kernel's passive components into a running system: a periodic
//! health loop, a single owner for every component, and process-wide
//! logging setup.
//!
//! # Modules
//!
//! - [`health_monitor`] – [`HealthMonitor`][health_monitor::HealthMonitor]:
//!   samples metrics on a fixed interval, evaluates them against the KPI
//!   thresholds and triggers alerts, rebalancing, eviction and fault
//!   escalation.
//! - [`context`] – [`KernelSafetyContext`][context::KernelSafetyContext]:
//!   builds and owns the scheduler, both escalation controllers, the alert
//!   dispatcher, the event bus and the monitor; runs the boot preflight and
//!   starts/stops the loop.
//! - [`report`] – [`HealthReport`][report::HealthReport]: the printable
//!   health summary.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]:
//!   initialises the global `tracing` subscriber with an optional OTLP span
//!   exporter.  Set `OTEL_EXPORTER_OTLP_ENDPOINT` to enable live trace export
//!   to Jaeger, Grafana Tempo, or any OTLP-compatible collector.

pub mod context;
pub mod health_monitor;
pub mod report;
pub mod telemetry;

pub use context::{Collaborators, KernelSafetyContext, SafetyConfig};
pub use health_monitor::{HealthMonitor, TickReport};
pub use report::HealthReport;
pub use telemetry::{TracerProviderGuard, init_tracing};
