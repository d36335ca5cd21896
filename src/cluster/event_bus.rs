//! Cluster-wide signalling between nodes.
//!
//! Every node observes every event (at-least-once); handlers must tolerate
//! duplicates and events about work owned by another node.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::constants::events;
use crate::constants::system::DEFAULT_EVENT_CHANNEL_CAPACITY;
use crate::error::{ChaosError, Result};
use crate::models::ScheduleStatus;
use crate::scheduler::ScheduleAction;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClusterEvent {
    /// A schedule needs a live timer on its owning node
    ScheduleCreated { schedule_id: String },
    /// Tear down the live timer of a schedule wherever it runs
    ScheduleCommand {
        schedule_id: String,
        action: ScheduleAction,
    },
    ScheduleStatusChanged {
        schedule_id: String,
        status: ScheduleStatus,
    },
    /// A task id was published into the work-announcement map
    WorkAnnounced { task_id: String },
    MemberAdded { node_id: String },
    MemberRemoved { node_id: String },
}

impl ClusterEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ScheduleCreated { .. } => events::SCHEDULE_CREATED,
            Self::ScheduleCommand { .. } => events::SCHEDULE_COMMAND,
            Self::ScheduleStatusChanged { .. } => events::SCHEDULE_STATUS_CHANGED,
            Self::WorkAnnounced { .. } => events::WORK_ANNOUNCED,
            Self::MemberAdded { .. } => events::MEMBER_ADDED,
            Self::MemberRemoved { .. } => events::MEMBER_REMOVED,
        }
    }
}

pub trait ClusterEventBus: Send + Sync {
    fn publish(&self, event: ClusterEvent) -> Result<()>;

    fn subscribe(&self) -> broadcast::Receiver<ClusterEvent>;
}

/// Bus shared by every node living in one process
#[derive(Debug, Clone)]
pub struct InMemoryEventBus {
    sender: broadcast::Sender<ClusterEvent>,
}

impl InMemoryEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CHANNEL_CAPACITY)
    }
}

impl ClusterEventBus for InMemoryEventBus {
    fn publish(&self, event: ClusterEvent) -> Result<()> {
        debug!(event = event.name(), "Publishing cluster event");
        if self.sender.receiver_count() == 0 {
            return Ok(());
        }
        self.sender
            .send(event)
            .map(|_| ())
            .map_err(|e| ChaosError::Event(format!("cluster bus closed: {e}")))
    }

    fn subscribe(&self) -> broadcast::Receiver<ClusterEvent> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_every_subscriber_sees_each_event() {
        let bus = InMemoryEventBus::new(8);
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        bus.publish(ClusterEvent::WorkAnnounced {
            task_id: "t1".into(),
        })
        .unwrap();

        assert_eq!(first.recv().await.unwrap().name(), events::WORK_ANNOUNCED);
        assert_eq!(
            second.recv().await.unwrap(),
            ClusterEvent::WorkAnnounced {
                task_id: "t1".into()
            }
        );
    }

    #[test]
    fn test_serialized_tag() {
        let json = serde_json::to_value(ClusterEvent::ScheduleCommand {
            schedule_id: "s1".into(),
            action: ScheduleAction::Pause,
        })
        .unwrap();
        assert_eq!(json["event"], "schedule_command");
        assert_eq!(json["action"], "PAUSE");
    }
}
