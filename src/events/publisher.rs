use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::constants::events;
use crate::constants::system::DEFAULT_EVENT_CHANNEL_CAPACITY;
use crate::models::ScheduleStatus;
use crate::state_machine::TaskStatus;

/// Lifecycle notifications raised inside one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ChaosEvent {
    SubstageChanged {
        task_id: String,
        substage: String,
    },
    TaskCompleted {
        task_id: String,
        status: TaskStatus,
    },
    ScheduleCreated {
        schedule_id: String,
    },
    ScheduleStatusChanged {
        schedule_id: String,
        status: ScheduleStatus,
    },
}

impl ChaosEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SubstageChanged { .. } => events::TASK_SUBSTAGE_CHANGED,
            Self::TaskCompleted { .. } => events::TASK_COMPLETED,
            Self::ScheduleCreated { .. } => events::SCHEDULE_CREATED,
            Self::ScheduleStatusChanged { .. } => events::SCHEDULE_STATUS_CHANGED,
        }
    }
}

/// Event that has been published
#[derive(Debug, Clone)]
pub struct PublishedEvent {
    pub event: ChaosEvent,
    pub published_at: DateTime<Utc>,
}

/// Fire-and-forget publisher for lifecycle events
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<PublishedEvent>,
}

impl EventPublisher {
    /// Create a new event publisher with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to every current subscriber
    pub fn publish(&self, event: ChaosEvent) {
        tracing::debug!(event = event.name(), "Publishing event");
        let published = PublishedEvent {
            event,
            published_at: Utc::now(),
        };

        // send() only fails when nobody is subscribed, which is fine for
        // fire-and-forget notifications
        let _ = self.sender.send(published);
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CHANNEL_CAPACITY)
    }
}
