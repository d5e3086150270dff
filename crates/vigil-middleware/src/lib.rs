//! `vigil-middleware` – The Nervous System
//!
//! Carries kernel output (snapshots, alerts, fault transitions, evictions) to
//! whoever wants to observe it, without the kernel depending on any observer.
//!
//! # Modules
//!
//! - [`bus`] – Headless, typed, topic-based publish/subscribe event bus built
//!   on Tokio broadcast channels.
//! - [`alert_channel`] – [`BusAlertChannel`], the alert sink that feeds the
//!   `SystemAlerts` topic.

pub mod alert_channel;
pub mod bus;

pub use alert_channel::BusAlertChannel;
pub use bus::{EventBus, Topic, TopicReceiver};
