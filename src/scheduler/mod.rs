//! # Scheduler
//!
//! Maps persisted scheduler specs to live, cancellable timers. Bulk pause,
//! cancel, resume and delete requests are validated as a whole and then
//! broadcast; the node that owns the live timer applies them.

pub mod service;
pub mod trigger;

use serde::{Deserialize, Serialize};

use crate::models::ScheduleStatus;

pub use service::Scheduler;
pub use trigger::TriggerPolicy;

/// Local effect requested for a schedule's live timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScheduleAction {
    Pause,
    Cancel,
    Delete,
    /// Delete the schedule and its task
    DeleteWithTask,
}

impl ScheduleAction {
    /// Status recorded once the timer is gone, `None` when the spec is deleted
    pub fn resulting_status(&self) -> Option<ScheduleStatus> {
        match self {
            Self::Pause => Some(ScheduleStatus::Paused),
            Self::Cancel => Some(ScheduleStatus::Cancelled),
            Self::Delete | Self::DeleteWithTask => None,
        }
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, Self::Delete | Self::DeleteWithTask)
    }
}
