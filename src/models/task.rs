//! # Task Model
//!
//! A task is one unit of orchestrated work: a fault payload plus the history
//! of attempts made to run it. The most recent [`TaskTrigger`] is the current
//! attempt; new attempts push a new trigger and leave history untouched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Display;
use std::str::FromStr;
use uuid::Uuid;

use super::fan_out::FanOutSpec;
use super::fault_spec::FaultSpec;
use super::schedule::ScheduleInfo;
use crate::error::{ChaosError, Result};
use crate::state_machine::{determine_target_status, TaskEvent, TaskStatus, TaskType};

/// One execution attempt of a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskTrigger {
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub task_status: TaskStatus,
    /// Cluster node that ran or owns this attempt
    pub node: String,
    pub task_failure_reason: Option<String>,
}

impl TaskTrigger {
    pub fn new(node: impl Into<String>) -> Self {
        Self {
            start_time: Utc::now(),
            end_time: None,
            task_status: TaskStatus::Initializing,
            node: node.into(),
            task_failure_reason: None,
        }
    }

    pub fn started_at(node: impl Into<String>, start_time: DateTime<Utc>) -> Self {
        Self {
            start_time,
            ..Self::new(node)
        }
    }
}

/// Fault payload owned by a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "spec", rename_all = "snake_case")]
pub enum TaskPayload {
    /// One concrete target
    Single(FaultSpec),
    /// A set of targets expanded into child tasks
    FanOut(FanOutSpec),
}

impl TaskPayload {
    /// The fault definition, for fan-out payloads the per-child template
    pub fn fault(&self) -> &FaultSpec {
        match self {
            Self::Single(spec) => spec,
            Self::FanOut(fan_out) => &fan_out.fault,
        }
    }

    pub fn fault_mut(&mut self) -> &mut FaultSpec {
        match self {
            Self::Single(spec) => spec,
            Self::FanOut(fan_out) => &mut fan_out.fault,
        }
    }

    pub fn as_fan_out(&self) -> Option<&FanOutSpec> {
        match self {
            Self::FanOut(fan_out) => Some(fan_out),
            Self::Single(_) => None,
        }
    }

    pub fn as_fan_out_mut(&mut self) -> Option<&mut FanOutSpec> {
        match self {
            Self::FanOut(fan_out) => Some(fan_out),
            Self::Single(_) => None,
        }
    }

    pub fn schedule(&self) -> Option<&ScheduleInfo> {
        self.fault().schedule.as_ref()
    }
}

/// Values gathered while running commands, used by later commands and by
/// whoever diagnoses a failed task
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TroubleshootingInfo {
    pub additional_info: BTreeMap<String, String>,
    pub support_files: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub task_name: String,
    pub task_type: TaskType,
    pub task_data: TaskPayload,
    pub task_status: TaskStatus,
    pub triggers: Vec<TaskTrigger>,
    /// Free-form cursor for multi-step executors, empty before the first step
    #[serde(default)]
    pub task_substage: String,
    #[serde(default)]
    pub child_task_ids: Vec<String>,
    /// Target key to child task id
    #[serde(default)]
    pub child_task_map: BTreeMap<String, String>,
    #[serde(default)]
    pub scheduled_task: bool,
    /// Name of the helper that knows how to execute this task
    pub extension_name: String,
    pub task_description: Option<String>,
    /// Set on remediation tasks, the injection they reverse
    pub injection_task_id: Option<String>,
    #[serde(default)]
    pub remediated: bool,
    #[serde(default)]
    pub troubleshooting: TroubleshootingInfo,
    pub created_at: DateTime<Utc>,
}

impl Task {
    pub fn new(
        task_name: impl Into<String>,
        task_type: TaskType,
        task_data: TaskPayload,
        extension_name: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            task_name: task_name.into(),
            task_type,
            task_data,
            task_status: TaskStatus::Initializing,
            triggers: Vec::new(),
            task_substage: String::new(),
            child_task_ids: Vec::new(),
            child_task_map: BTreeMap::new(),
            scheduled_task: false,
            extension_name: extension_name.into(),
            task_description: None,
            injection_task_id: None,
            remediated: false,
            troubleshooting: TroubleshootingInfo::default(),
            created_at: Utc::now(),
        }
    }

    pub fn is_fan_out(&self) -> bool {
        matches!(self.task_data, TaskPayload::FanOut(_))
    }

    pub fn fault(&self) -> &FaultSpec {
        self.task_data.fault()
    }

    /// Whether any attempt was ever made to run the task
    pub fn has_run(&self) -> bool {
        !self.triggers.is_empty()
    }

    pub fn current_trigger(&self) -> Result<&TaskTrigger> {
        self.triggers
            .last()
            .ok_or_else(|| ChaosError::EmptyTriggerHistory {
                task_id: self.id.clone(),
            })
    }

    pub fn current_trigger_mut(&mut self) -> Result<&mut TaskTrigger> {
        let task_id = self.id.clone();
        self.triggers
            .last_mut()
            .ok_or(ChaosError::EmptyTriggerHistory { task_id })
    }

    /// Open a new attempt owned by `node`
    pub fn push_trigger(&mut self, node: impl Into<String>) {
        self.triggers.push(TaskTrigger::new(node));
    }

    /// Parse the substage cursor, `None` before the state machine started
    pub fn substage<S: FromStr>(&self) -> Result<Option<S>>
    where
        S::Err: Display,
    {
        if self.task_substage.is_empty() {
            return Ok(None);
        }
        self.task_substage
            .parse::<S>()
            .map(Some)
            .map_err(|e| ChaosError::Internal(format!("task {}: {e}", self.id)))
    }

    pub fn set_substage(&mut self, substage: impl Display) {
        self.task_substage = substage.to_string();
    }

    /// Apply a status event to the task and its current attempt.
    ///
    /// Terminal events close the current trigger and record the reason.
    pub fn transition(&mut self, event: TaskEvent) -> Result<TaskStatus> {
        let target = determine_target_status(self.task_status, &event)?;
        self.task_status = target;

        if let Some(trigger) = self.triggers.last_mut() {
            trigger.task_status = target;
            if target.is_terminal() {
                trigger.end_time = Some(Utc::now());
            }
            if let Some(reason) = event.reason() {
                trigger.task_failure_reason = Some(reason.to_string());
            }
        }

        Ok(target)
    }

    /// Record a failure regardless of the current attempt state.
    ///
    /// Used by recovery paths where the owning node is gone and the regular
    /// transition rules do not apply.
    pub fn force_status(&mut self, status: TaskStatus, reason: Option<String>) {
        self.task_status = status;
        if let Some(trigger) = self.triggers.last_mut() {
            trigger.task_status = status;
            if status.is_terminal() {
                trigger.end_time = Some(Utc::now());
            }
            if reason.is_some() {
                trigger.task_failure_reason = reason;
            }
        }
    }

    /// Forget the progress of a finished attempt so the next one starts over.
    /// Trigger history is kept.
    pub fn reset_for_rerun(&mut self) {
        if self.task_status.is_terminal() {
            self.task_substage.clear();
            self.child_task_ids.clear();
            self.child_task_map.clear();
            if let Some(fan_out) = self.task_data.as_fan_out_mut() {
                fan_out.ready_for_child_execution = false;
            }
        }
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.triggers
            .last()
            .and_then(|trigger| trigger.task_failure_reason.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fault_spec::FaultSpec;
    use crate::state_machine::CommandSubstage;

    fn sample_task() -> Task {
        Task::new(
            "cpu-fault-1",
            TaskType::Injection,
            TaskPayload::Single(FaultSpec::command("cpu", "endpoint-1")),
            "command-fault",
        )
    }

    #[test]
    fn test_current_trigger_requires_history() {
        let mut task = sample_task();
        assert!(!task.has_run());
        assert!(matches!(
            task.current_trigger(),
            Err(ChaosError::EmptyTriggerHistory { .. })
        ));

        task.push_trigger("node-a");
        task.push_trigger("node-b");
        assert_eq!(task.current_trigger().unwrap().node, "node-b");
        assert_eq!(task.triggers.len(), 2);
    }

    #[test]
    fn test_transition_closes_current_trigger() {
        let mut task = sample_task();
        task.push_trigger("node-a");
        task.transition(TaskEvent::Start).unwrap();
        task.transition(TaskEvent::Fail("unreachable".into())).unwrap();

        let trigger = task.current_trigger().unwrap();
        assert_eq!(task.task_status, TaskStatus::Failed);
        assert_eq!(trigger.task_status, TaskStatus::Failed);
        assert!(trigger.end_time.is_some());
        assert_eq!(task.failure_reason(), Some("unreachable"));
    }

    #[test]
    fn test_substage_cursor() {
        let mut task = sample_task();
        assert_eq!(task.substage::<CommandSubstage>().unwrap(), None);

        task.set_substage(CommandSubstage::PrerequisitesCheck);
        assert_eq!(task.task_substage, "PREREQUISITES_CHECK");
        assert_eq!(
            task.substage::<CommandSubstage>().unwrap(),
            Some(CommandSubstage::PrerequisitesCheck)
        );

        task.task_substage = "garbage".to_string();
        assert!(task.substage::<CommandSubstage>().is_err());
    }

    #[test]
    fn test_task_serde_round_trip_keeps_payload_kind() {
        let task = sample_task();
        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["task_data"]["kind"], "single");
        let parsed: Task = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, task);
    }
}
