//! [`AlertDispatcher`] – the kernel's single exit for user-visible alerts.
//!
//! Delivery is fire-and-continue: the dispatcher tries the primary channel,
//! degrades to the fallback (stderr by default) when the primary is not ready
//! or fails, and never reports an error back to the caller.  Every delivery
//! is timed against a latency budget and slow ones are logged.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, warn};
use vigil_hal::{AlertChannel, ConsoleAlertChannel};
use vigil_types::{Alert, AlertLevel, KernelError};

/// Default display latency budget.
pub const DEFAULT_LATENCY_BUDGET: Duration = Duration::from_millis(10);

pub struct AlertDispatcher {
    primary: Arc<dyn AlertChannel>,
    fallback: Arc<dyn AlertChannel>,
    latency_budget: Duration,
}

impl AlertDispatcher {
    /// Dispatch to `primary`, falling back to the console.
    pub fn new(primary: Arc<dyn AlertChannel>) -> Self {
        Self {
            primary,
            fallback: Arc::new(ConsoleAlertChannel::new()),
            latency_budget: DEFAULT_LATENCY_BUDGET,
        }
    }

    /// Console only.
    pub fn console() -> Self {
        Self::new(Arc::new(ConsoleAlertChannel::new()))
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn AlertChannel>) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn with_latency_budget(mut self, budget: Duration) -> Self {
        self.latency_budget = budget;
        self
    }

    pub fn latency_budget(&self) -> Duration {
        self.latency_budget
    }

    pub fn critical(&self, title: impl Into<String>, detail: impl Into<String>) {
        self.dispatch(Alert::new(AlertLevel::Critical, title, detail));
    }

    pub fn warning(&self, title: impl Into<String>, detail: impl Into<String>) {
        self.dispatch(Alert::new(AlertLevel::Warning, title, detail));
    }

    pub fn info(&self, title: impl Into<String>, detail: impl Into<String>) {
        self.dispatch(Alert::new(AlertLevel::Info, title, detail));
    }

    /// Deliver `alert` on the first channel that accepts it.  Returns the id
    /// of that channel, or `None` when every channel failed.
    pub fn dispatch(&self, alert: Alert) -> Option<String> {
        if self.primary.is_ready() {
            match self.deliver(self.primary.as_ref(), &alert) {
                Ok(()) => return Some(self.primary.id().to_string()),
                Err(e) => warn!(
                    channel = self.primary.id(),
                    error = %e,
                    "primary alert channel failed; falling back"
                ),
            }
        } else {
            warn!(
                channel = self.primary.id(),
                "primary alert channel not ready; falling back"
            );
        }

        match self.deliver(self.fallback.as_ref(), &alert) {
            Ok(()) => Some(self.fallback.id().to_string()),
            Err(e) => {
                error!(
                    channel = self.fallback.id(),
                    error = %e,
                    title = %alert.title,
                    "alert lost: fallback channel failed"
                );
                None
            }
        }
    }

    fn deliver(&self, channel: &dyn AlertChannel, alert: &Alert) -> Result<(), KernelError> {
        let started = Instant::now();
        let result = channel.display(alert);
        let elapsed = started.elapsed();
        if elapsed > self.latency_budget {
            warn!(
                channel = channel.id(),
                elapsed_ms = elapsed.as_millis() as u64,
                budget_ms = self.latency_budget.as_millis() as u64,
                "alert display exceeded latency budget"
            );
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_hal::RecordingAlertChannel;

    fn pair() -> (
        Arc<RecordingAlertChannel>,
        Arc<RecordingAlertChannel>,
        AlertDispatcher,
    ) {
        let primary = Arc::new(RecordingAlertChannel::new());
        let fallback = Arc::new(RecordingAlertChannel::new());
        let dispatcher = AlertDispatcher::new(primary.clone()).with_fallback(fallback.clone());
        (primary, fallback, dispatcher)
    }

    #[test]
    fn ready_primary_receives_alert() {
        let (primary, fallback, dispatcher) = pair();
        dispatcher.critical("Voltage failure", "12V");
        assert_eq!(primary.at_level(AlertLevel::Critical).len(), 1);
        assert!(fallback.alerts().is_empty());
    }

    #[test]
    fn unready_primary_degrades_to_fallback() {
        let (primary, fallback, dispatcher) = pair();
        primary.set_ready(false);
        let delivered = dispatcher.dispatch(Alert::new(AlertLevel::Warning, "I/O", "slow"));
        assert_eq!(delivered.as_deref(), Some("recording"));
        assert!(primary.alerts().is_empty());
        assert_eq!(fallback.alerts().len(), 1);
    }

    #[test]
    fn failing_primary_degrades_to_fallback() {
        let (primary, fallback, dispatcher) = pair();
        primary.set_failing(true);
        dispatcher.warning("I/O", "slow");
        assert_eq!(fallback.at_level(AlertLevel::Warning).len(), 1);
    }

    #[test]
    fn lost_alert_is_not_an_error_for_the_caller() {
        let (primary, fallback, dispatcher) = pair();
        primary.set_failing(true);
        fallback.set_failing(true);
        assert!(
            dispatcher
                .dispatch(Alert::new(AlertLevel::Info, "t", "d"))
                .is_none()
        );
    }

    #[test]
    fn console_dispatcher_defaults() {
        let dispatcher = AlertDispatcher::console();
        assert_eq!(dispatcher.latency_budget(), DEFAULT_LATENCY_BUDGET);
        assert_eq!(
            dispatcher
                .dispatch(Alert::new(AlertLevel::Info, "Boot", "ok"))
                .as_deref(),
            Some("console")
        );
    }
}
