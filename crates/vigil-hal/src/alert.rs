//! Generic `AlertChannel` trait for anything that can put a notification in
//! front of a human (overlay display, serial console, event bus, …).

use vigil_types::{Alert, AlertLevel, KernelError};

/// A sink for user-visible alerts.
///
/// Implementations must return quickly: the kernel measures every
/// [`display`][AlertChannel::display] call against its latency budget and
/// never waits for an acknowledgement.
pub trait AlertChannel: Send + Sync {
    /// Stable identifier for this channel, e.g. `"overlay"` or `"console"`.
    fn id(&self) -> &str;

    /// `false` when the channel cannot currently deliver (module not loaded,
    /// nobody listening).  The caller then degrades to a fallback channel.
    fn is_ready(&self) -> bool {
        true
    }

    /// Deliver `alert`.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::AlertDelivery`] if the alert could not be shown.
    fn display(&self, alert: &Alert) -> Result<(), KernelError>;
}

/// Last-resort channel that writes alerts to the process's stderr, the
/// equivalent of a serial console.  Always ready.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleAlertChannel;

impl ConsoleAlertChannel {
    pub fn new() -> Self {
        Self
    }

    fn format(alert: &Alert) -> String {
        let tag = match alert.level {
            AlertLevel::Critical => "FATAL",
            AlertLevel::Warning => "WARN",
            AlertLevel::Info => "INFO",
        };
        format!("[{tag}] {} - {}", alert.title, alert.detail)
    }
}

impl AlertChannel for ConsoleAlertChannel {
    fn id(&self) -> &str {
        "console"
    }

    fn display(&self, alert: &Alert) -> Result<(), KernelError> {
        eprintln!("{}", Self::format(alert));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn console_channel_is_always_ready() {
        let console = ConsoleAlertChannel::new();
        assert_eq!(console.id(), "console");
        assert!(console.is_ready());
        assert!(
            console
                .display(&Alert::new(AlertLevel::Info, "Boot", "complete"))
                .is_ok()
        );
    }

    #[test]
    fn console_format_tags_severity() {
        let line = ConsoleAlertChannel::format(&Alert::new(
            AlertLevel::Critical,
            "Voltage failure",
            "supply at 12V",
        ));
        assert_eq!(line, "[FATAL] Voltage failure - supply at 12V");
    }
}
