use serde::{Deserialize, Serialize};

use super::states::TaskStatus;
use crate::error::{ChaosError, Result};

/// Events that drive task status transitions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum TaskEvent {
    /// A runner picked up the task (or resumed an in-flight attempt)
    Start,
    /// A new attempt was pushed onto a finished task (cron re-fire, remediation re-run)
    Retrigger,
    /// Mark task as complete
    Complete,
    /// Mark task as failed with a reason
    Fail(String),
    /// The task was not run
    Skip(String),
}

impl TaskEvent {
    /// Get a string representation of the event type for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Retrigger => "retrigger",
            Self::Complete => "complete",
            Self::Fail(_) => "fail",
            Self::Skip(_) => "skip",
        }
    }

    /// Extract the reason if this event carries one
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Fail(reason) | Self::Skip(reason) => Some(reason),
            _ => None,
        }
    }

    pub fn fail_with_error(error: impl Into<String>) -> Self {
        Self::Fail(error.into())
    }
}

/// Determine the status a task moves to when `event` is applied in `current`.
///
/// Status only moves forward within one attempt; a finished task can only be
/// reopened through `Retrigger`, which always accompanies a new trigger.
pub fn determine_target_status(current: TaskStatus, event: &TaskEvent) -> Result<TaskStatus> {
    let target = match (current, event) {
        (TaskStatus::Initializing, TaskEvent::Start) => TaskStatus::InProgress,
        // Resuming an attempt that a departed node left behind
        (TaskStatus::InProgress, TaskEvent::Start) => TaskStatus::InProgress,

        (status, TaskEvent::Retrigger) if status.is_terminal() => TaskStatus::InProgress,
        (TaskStatus::Initializing, TaskEvent::Retrigger) => TaskStatus::InProgress,

        (TaskStatus::InProgress, TaskEvent::Complete) => TaskStatus::Completed,

        (TaskStatus::Initializing | TaskStatus::InProgress, TaskEvent::Fail(_)) => {
            TaskStatus::Failed
        }
        (TaskStatus::Initializing | TaskStatus::InProgress, TaskEvent::Skip(_)) => {
            TaskStatus::TaskSkipped
        }

        (from, event) => {
            return Err(ChaosError::InvalidTransition {
                from: from.to_string(),
                event: event.event_type().to_string(),
            })
        }
    };

    Ok(target)
}
