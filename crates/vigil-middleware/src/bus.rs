//! Headless, typed, topic-based publish/subscribe event bus.
//!
//! Uses [`tokio::sync::broadcast`] channels under the hood so that every
//! subscriber receives every message without any single subscriber blocking
//! the kernel.
//!
//! # Topics
//!
//! | Topic | Typical traffic |
//! |---|---|
//! | [`Topic::Telemetry`] | One [`HealthSnapshot`](vigil_types::HealthSnapshot) per monitor tick |
//! | [`Topic::SystemAlerts`] | Every alert the kernel raises |
//! | [`Topic::FaultState`] | Escalation state transitions |
//! | [`Topic::Scheduler`] | Task evictions |

use tokio::sync::broadcast;
use tracing::trace;
use vigil_types::{Event, KernelError};

/// Number of buffered events before old ones are dropped for slow
/// subscribers.
const DEFAULT_CAPACITY: usize = 256;

/// Routing lanes on the event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Periodic health snapshots.
    Telemetry,
    /// User-visible alerts at every level.
    SystemAlerts,
    /// Transitions of the critical-fault state machine.
    FaultState,
    /// Scheduler decisions such as evictions.
    Scheduler,
}

/// Shared event bus. Clone it cheaply – all clones share the same underlying
/// broadcast channels.
#[derive(Clone, Debug)]
pub struct EventBus {
    telemetry: broadcast::Sender<Event>,
    system_alerts: broadcast::Sender<Event>,
    fault_state: broadcast::Sender<Event>,
    scheduler: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new bus.  `capacity` is applied to every topic independently.
    pub fn new(capacity: usize) -> Self {
        let (telemetry, _) = broadcast::channel(capacity);
        let (system_alerts, _) = broadcast::channel(capacity);
        let (fault_state, _) = broadcast::channel(capacity);
        let (scheduler, _) = broadcast::channel(capacity);
        Self {
            telemetry,
            system_alerts,
            fault_state,
            scheduler,
        }
    }

    /// Publish `event` to `topic`.
    ///
    /// Returns the number of receivers that were handed the event, or
    /// [`KernelError::Channel`] when nobody is subscribed.
    pub fn publish_to(&self, topic: Topic, event: Event) -> Result<usize, KernelError> {
        self.topic_sender(topic)
            .send(event)
            .map_err(|_| KernelError::Channel(format!("No subscribers for topic {topic:?}")))
    }

    /// Publish without caring whether anyone listens.
    ///
    /// The kernel's safety actions never depend on observers, so a bus with
    /// no subscribers is a normal condition here.
    pub fn emit(&self, topic: Topic, event: Event) -> usize {
        match self.publish_to(topic, event) {
            Ok(n) => n,
            Err(_) => {
                trace!(?topic, "event dropped: no subscribers");
                0
            }
        }
    }

    /// Subscribe to a single topic.
    pub fn subscribe_to(&self, topic: Topic) -> TopicReceiver {
        TopicReceiver {
            topic,
            receiver: self.topic_sender(topic).subscribe(),
        }
    }

    /// Number of live receivers on `topic`.
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.topic_sender(topic).receiver_count()
    }

    fn topic_sender(&self, topic: Topic) -> &broadcast::Sender<Event> {
        match topic {
            Topic::Telemetry => &self.telemetry,
            Topic::SystemAlerts => &self.system_alerts,
            Topic::FaultState => &self.fault_state,
            Topic::Scheduler => &self.scheduler,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// An async receiver bound to a single [`Topic`] channel.
///
/// Obtained via [`EventBus::subscribe_to`].
pub struct TopicReceiver {
    topic: Topic,
    receiver: broadcast::Receiver<Event>,
}

impl TopicReceiver {
    /// Wait for the next event on this topic.
    ///
    /// `Err(RecvError::Lagged(n))` means this subscriber fell behind and `n`
    /// events were dropped; the caller decides whether to continue.
    pub async fn recv(&mut self) -> Result<Event, broadcast::error::RecvError> {
        self.receiver.recv().await
    }

    /// Non-blocking variant of [`recv`][Self::recv].
    pub fn try_recv(&mut self) -> Result<Event, broadcast::error::TryRecvError> {
        self.receiver.try_recv()
    }

    /// The [`Topic`] this receiver is bound to.
    pub fn topic(&self) -> Topic {
        self.topic
    }
}
