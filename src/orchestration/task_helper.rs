//! # Task Helper Contract
//!
//! A task helper knows how to create and drive one kind of task. Single-target
//! executors and fan-out triggers both implement [`TaskHelper`], so the runner
//! and the scheduler treat them alike.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;

use crate::error::{ChaosError, Result};
use crate::events::{ChaosEvent, EventPublisher};
use crate::models::{Task, TaskPayload};
use crate::persistence::TaskRepository;
use crate::state_machine::TaskType;

/// Collaborators available to a helper while it executes a task
#[derive(Clone)]
pub struct ExecutionContext {
    pub node_id: String,
    tasks: Arc<dyn TaskRepository>,
    events: EventPublisher,
}

impl ExecutionContext {
    pub fn new(node_id: impl Into<String>, tasks: Arc<dyn TaskRepository>, events: EventPublisher) -> Self {
        Self {
            node_id: node_id.into(),
            tasks,
            events,
        }
    }

    /// Persist the task and announce its new substage
    pub async fn checkpoint(&self, task: &Task) -> Result<()> {
        self.tasks.save_task(task).await?;
        self.events.publish(ChaosEvent::SubstageChanged {
            task_id: task.id.clone(),
            substage: task.task_substage.clone(),
        });
        Ok(())
    }

    pub async fn save_task(&self, task: &Task) -> Result<()> {
        self.tasks.save_task(task).await
    }

    pub async fn load_task(&self, id: &str) -> Result<Option<Task>> {
        self.tasks.load_task(id).await
    }

    pub fn events(&self) -> &EventPublisher {
        &self.events
    }
}

/// What an execution produced besides the mutated task
#[derive(Debug, Default)]
pub struct ExecutionOutcome {
    /// Child tasks created by a fan-out, persisted but not yet started
    pub children: Vec<Task>,
}

impl ExecutionOutcome {
    pub fn with_children(children: Vec<Task>) -> Self {
        Self { children }
    }
}

#[async_trait]
pub trait TaskHelper: Send + Sync {
    /// Registry name, also stamped on tasks as their extension name
    fn name(&self) -> &str;

    /// Whether this helper expects a fan-out payload
    fn is_fan_out(&self) -> bool;

    fn describe(&self, task: &Task) -> String;

    /// Drive the task as far as it can go. Status bookkeeping belongs to the
    /// caller; the helper only advances the substage cursor and payload.
    async fn execute(&self, task: &mut Task, ctx: &ExecutionContext) -> Result<ExecutionOutcome>;

    /// Create a task for `payload`. A remediation task is created when the id
    /// of the injection it reverses is given.
    fn init(&self, payload: TaskPayload, injection_task_id: Option<String>) -> Result<Task> {
        if self.is_fan_out() != matches!(payload, TaskPayload::FanOut(_)) {
            return Err(ChaosError::validation(format!(
                "helper {} cannot run this payload kind",
                self.name()
            )));
        }

        let task_type = if injection_task_id.is_some() {
            TaskType::Remediation
        } else {
            TaskType::Injection
        };
        let task_name = format!("{}-{}", self.name(), Utc::now().timestamp_millis());

        let mut task = Task::new(task_name, task_type, payload, self.name());
        task.injection_task_id = injection_task_id;
        task.task_description = Some(self.describe(&task));
        Ok(task)
    }
}
