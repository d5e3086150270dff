//! [`BusAlertChannel`] – an [`AlertChannel`] that publishes every alert on
//! the [`Topic::SystemAlerts`] lane.
//!
//! Whatever renders alerts (an overlay, a remote console, a log shipper)
//! subscribes to that topic.  While nobody is subscribed the channel reports
//! itself as not ready, so the kernel's dispatcher falls back to the console.

use vigil_hal::AlertChannel;
use vigil_types::{Alert, Event, EventPayload, KernelError};

use crate::bus::{EventBus, Topic};

const SOURCE: &str = "vigil-middleware::alert_channel";

pub struct BusAlertChannel {
    bus: EventBus,
}

impl BusAlertChannel {
    pub fn new(bus: EventBus) -> Self {
        Self { bus }
    }
}

impl AlertChannel for BusAlertChannel {
    fn id(&self) -> &str {
        "event-bus"
    }

    fn is_ready(&self) -> bool {
        self.bus.subscriber_count(Topic::SystemAlerts) > 0
    }

    fn display(&self, alert: &Alert) -> Result<(), KernelError> {
        let event = Event::new(SOURCE, EventPayload::Alert(alert.clone()));
        self.bus
            .publish_to(Topic::SystemAlerts, event)
            .map(|_| ())
            .map_err(|e| KernelError::AlertDelivery(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_types::AlertLevel;

    #[test]
    fn not_ready_without_subscribers() {
        let channel = BusAlertChannel::new(EventBus::default());
        assert!(!channel.is_ready());
        assert!(matches!(
            channel.display(&Alert::new(AlertLevel::Info, "t", "d")),
            Err(KernelError::AlertDelivery(_))
        ));
    }

    #[tokio::test]
    async fn alerts_arrive_on_system_alerts_topic() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut rx = bus.subscribe_to(Topic::SystemAlerts);
        let channel = BusAlertChannel::new(bus.clone());
        assert!(channel.is_ready());

        channel.display(&Alert::new(AlertLevel::Critical, "Voltage failure", "12V"))?;

        let event = rx.recv().await?;
        assert_eq!(event.source, SOURCE);
        match event.payload {
            EventPayload::Alert(alert) => {
                assert_eq!(alert.level, AlertLevel::Critical);
                assert_eq!(alert.title, "Voltage failure");
            }
            other => panic!("unexpected payload: {other:?}"),
        }
        Ok(())
    }
}
