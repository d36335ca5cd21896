//! # Task Runner
//!
//! Runs tasks on a bounded worker pool. The runner owns status bookkeeping:
//! it opens or reuses the current trigger, moves the task through its status
//! transitions around the helper call and persists the result. Helpers only
//! advance the substage cursor.
//!
//! Scheduled injection tasks are handed to the scheduler instead of run.
//!
//! With a work map attached, a started task is recorded as running on this
//! node and withdrawn from the map once it reaches a terminal status.

use async_trait::async_trait;
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::{Arc, OnceLock, Weak};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

use super::registry::HelperRegistry;
use super::task_helper::{ExecutionContext, TaskHelper};
use crate::cluster::WorkAnnouncementMap;
use crate::config::ExecutionConfig;
use crate::error::{ChaosError, Result};
use crate::events::{ChaosEvent, EventPublisher};
use crate::logging::log_task_operation;
use crate::models::{NodeStatus, Task};
use crate::persistence::TaskRepository;
use crate::state_machine::{TaskEvent, TaskStatus, TaskType};

/// Receiver of tasks that must run on a timer rather than now
#[async_trait]
pub trait TaskScheduling: Send + Sync {
    async fn schedule_task(&self, task: Task) -> Result<Task>;
}

pub struct TaskRunner {
    node_id: String,
    registry: Arc<HelperRegistry>,
    tasks: Arc<dyn TaskRepository>,
    events: EventPublisher,
    permits: Arc<Semaphore>,
    running: Mutex<HashSet<String>>,
    children: Mutex<Vec<JoinHandle<()>>>,
    node_status: RwLock<NodeStatus>,
    scheduler: OnceLock<Weak<dyn TaskScheduling>>,
    work_map: Option<Arc<dyn WorkAnnouncementMap>>,
}

impl TaskRunner {
    pub fn new(
        node_id: impl Into<String>,
        registry: Arc<HelperRegistry>,
        tasks: Arc<dyn TaskRepository>,
        events: EventPublisher,
        config: &ExecutionConfig,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            registry,
            tasks,
            events,
            permits: Arc::new(Semaphore::new(config.worker_pool_size)),
            running: Mutex::new(HashSet::new()),
            children: Mutex::new(Vec::new()),
            node_status: RwLock::new(NodeStatus::Active),
            scheduler: OnceLock::new(),
            work_map: None,
        }
    }

    pub fn with_work_map(mut self, work_map: Arc<dyn WorkAnnouncementMap>) -> Self {
        self.work_map = Some(work_map);
        self
    }

    /// Wire the scheduler that receives scheduled tasks. Only the first call
    /// takes effect.
    pub fn attach_scheduler(&self, scheduler: Weak<dyn TaskScheduling>) {
        if self.scheduler.set(scheduler).is_err() {
            warn!(node = %self.node_id, "Scheduler already attached to task runner");
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn registry(&self) -> &Arc<HelperRegistry> {
        &self.registry
    }

    pub fn node_status(&self) -> NodeStatus {
        *self.node_status.read()
    }

    pub fn set_node_status(&self, status: NodeStatus) {
        info!(node = %self.node_id, status = ?status, "Node status changed");
        *self.node_status.write() = status;
    }

    /// Ids of tasks currently executing on this node
    pub fn running_tasks(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.running.lock().iter().cloned().collect();
        ids.sort();
        ids
    }

    /// Run `task` now, or hand it to the scheduler when it carries a schedule
    pub async fn submit(self: &Arc<Self>, task: Task) -> Result<Task> {
        let wants_timer = task.task_type == TaskType::Injection
            && task.task_data.schedule().is_some()
            && !task.scheduled_task;

        if wants_timer {
            let scheduler = self
                .scheduler
                .get()
                .and_then(Weak::upgrade)
                .ok_or_else(|| ChaosError::internal("no scheduler attached to task runner"))?;
            return scheduler.schedule_task(task).await;
        }

        self.execute(task).await
    }

    /// Execute one attempt of `task` and return it in its final state.
    ///
    /// Helper failures end as a FAILED task, not an error; only invariant
    /// violations are returned as errors, after the task was persisted.
    pub fn execute(self: &Arc<Self>, task: Task) -> BoxFuture<'static, Result<Task>> {
        let runner = Arc::clone(self);
        async move { runner.run_attempt(task).await }.boxed()
    }

    /// Child executions spawned and not yet finished
    pub fn pending_children(&self) -> usize {
        self.children
            .lock()
            .iter()
            .filter(|handle| !handle.is_finished())
            .count()
    }

    /// Wait for every child task spawned so far to finish
    pub async fn wait_for_children(&self) {
        loop {
            let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.children.lock());
            if handles.is_empty() {
                return;
            }
            for result in join_all(handles).await {
                if let Err(e) = result {
                    error!(error = %e, "Child task panicked or was aborted");
                }
            }
        }
    }

    fn open_attempt(&self, task: &mut Task) {
        match task.triggers.last_mut() {
            Some(trigger)
                if matches!(
                    trigger.task_status,
                    TaskStatus::InProgress | TaskStatus::Initializing
                ) =>
            {
                trigger.node = self.node_id.clone();
            }
            _ => task.push_trigger(self.node_id.clone()),
        }
    }

    async fn finish(&self, task: &Task) -> Result<()> {
        self.tasks.save_task(task).await?;
        // Scheduled tasks stay recorded while their timer lives
        if task.task_status.is_terminal() && !task.scheduled_task {
            if let Some(work_map) = &self.work_map {
                work_map.withdraw(&task.id);
            }
        }
        self.events.publish(ChaosEvent::TaskCompleted {
            task_id: task.id.clone(),
            status: task.task_status,
        });
        log_task_operation(
            "execute",
            Some(&task.id),
            Some(&task.task_name),
            task.task_status.as_str(),
            task.failure_reason(),
        );
        Ok(())
    }

    #[instrument(skip(self, task), fields(task_id = %task.id, node = %self.node_id))]
    async fn run_attempt(self: Arc<Self>, mut task: Task) -> Result<Task> {
        let helper = self.registry.get(&task.extension_name)?;
        self.open_attempt(&mut task);

        let node_status = self.node_status();
        if node_status != NodeStatus::Active {
            let reason = format!("Node {} is in {:?} mode, task skipped", self.node_id, node_status);
            if task.transition(TaskEvent::Skip(reason.clone())).is_err() {
                task.force_status(TaskStatus::TaskSkipped, Some(reason));
            }
            self.finish(&task).await?;
            return Ok(task);
        }

        let start = if task.task_status.is_terminal() {
            TaskEvent::Retrigger
        } else {
            TaskEvent::Start
        };
        task.transition(start)?;
        self.tasks.save_task(&task).await?;
        self.running.lock().insert(task.id.clone());
        if let Some(work_map) = &self.work_map {
            work_map.record_running(&self.node_id, &task.id);
        }

        let result = self.run_helper(helper.as_ref(), &mut task).await;
        self.running.lock().remove(&task.id);

        let (children, violation) = match result {
            Ok(children) => {
                task.transition(TaskEvent::Complete)?;
                (children, None)
            }
            Err(e) => {
                error!(task_id = %task.id, error = %e, "Task execution failed");
                let reason = e.to_string();
                if task.transition(TaskEvent::Fail(reason.clone())).is_err() {
                    task.force_status(TaskStatus::Failed, Some(reason));
                }
                let violation = e.is_invariant_violation().then_some(e);
                (Vec::new(), violation)
            }
        };

        task.task_description = Some(helper.describe(&task));
        self.finish(&task).await?;

        if let Some(violation) = violation {
            return Err(violation);
        }

        for child in children {
            let handle = tokio::spawn(self.execute(child).map(|result| {
                if let Err(e) = result {
                    error!(error = %e, "Child task failed to run");
                }
            }));
            let mut pending = self.children.lock();
            pending.retain(|handle| !handle.is_finished());
            pending.push(handle);
        }

        Ok(task)
    }

    async fn run_helper(&self, helper: &dyn TaskHelper, task: &mut Task) -> Result<Vec<Task>> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| ChaosError::internal(format!("worker pool closed: {e}")))?;
        let ctx = ExecutionContext::new(self.node_id.clone(), self.tasks.clone(), self.events.clone());
        let outcome = helper.execute(task, &ctx).await?;
        Ok(outcome.children)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{InMemoryEventBus, InMemoryWorkMap};
    use crate::execution::{CommandRunner, RetryPolicy};
    use crate::models::{CommandResult, EndpointSpec, FanOutSpec, TaskPayload};
    use crate::orchestration::capabilities::CommandFaultCapability;
    use crate::orchestration::fan_out::{EndpointGroupResolver, FanOutTrigger};
    use crate::orchestration::selection::TargetSelector;
    use crate::orchestration::single_task::SingleTaskExecutor;
    use crate::persistence::InMemoryStore;
    use crate::test_helpers::{command_fault, RecordingExecutor, RecordingExecutorFactory};
    use std::time::Duration;

    struct Fixture {
        runner: Arc<TaskRunner>,
        store: Arc<InMemoryStore>,
        work_map: Arc<InMemoryWorkMap>,
        executor: Arc<RecordingExecutor>,
        command: Arc<dyn TaskHelper>,
        trigger: Arc<dyn TaskHelper>,
    }

    fn fixture(executor: RecordingExecutor) -> Fixture {
        let executor = Arc::new(executor);
        let factory = Arc::new(RecordingExecutorFactory::with_executor(executor.clone()));
        let retry = RetryPolicy::new(1, Duration::from_millis(1));
        let command: Arc<dyn TaskHelper> = Arc::new(SingleTaskExecutor::new(
            "command-fault",
            Arc::new(CommandFaultCapability::new(factory)),
            CommandRunner::new(Duration::from_millis(1), retry),
            retry,
        ));
        let trigger: Arc<dyn TaskHelper> = Arc::new(FanOutTrigger::new(
            "endpoint-group-trigger",
            EndpointGroupResolver,
            Arc::new(TargetSelector::seeded(3)),
            command.clone(),
            command.clone(),
        ));

        let registry = Arc::new(HelperRegistry::new());
        registry.register(command.clone());
        registry.register(trigger.clone());

        let store = Arc::new(InMemoryStore::new());
        let work_map = Arc::new(InMemoryWorkMap::new(Arc::new(InMemoryEventBus::default())));
        let runner = Arc::new(
            TaskRunner::new(
                "node-a",
                registry,
                store.clone(),
                EventPublisher::default(),
                &ExecutionConfig::default(),
            )
            .with_work_map(work_map.clone()),
        );
        Fixture {
            runner,
            store,
            work_map,
            executor,
            command,
            trigger,
        }
    }

    #[tokio::test]
    async fn test_successful_task_completes_with_description() {
        let f = fixture(RecordingExecutor::new());
        let task = f
            .command
            .init(TaskPayload::Single(command_fault("cpu", "web-1", "10.0.0.1")), None)
            .unwrap();

        let task = f.runner.execute(task).await.unwrap();

        assert_eq!(task.task_status, TaskStatus::Completed);
        assert_eq!(task.triggers.len(), 1);
        let trigger = task.current_trigger().unwrap();
        assert_eq!(trigger.node, "node-a");
        assert_eq!(trigger.task_status, TaskStatus::Completed);
        assert!(trigger.end_time.is_some());
        assert!(task.task_description.unwrap().contains("web-1"));
        assert!(f.runner.running_tasks().is_empty());
    }

    #[tokio::test]
    async fn test_failed_command_records_reason() {
        let f = fixture(RecordingExecutor::new().respond("inject cpu", CommandResult::failure(1, "boom")));
        let task = f
            .command
            .init(TaskPayload::Single(command_fault("cpu", "web-1", "10.0.0.1")), None)
            .unwrap();

        let task = f.runner.execute(task).await.unwrap();

        assert_eq!(task.task_status, TaskStatus::Failed);
        assert!(task.failure_reason().unwrap().contains("boom"));
        let stored = f.store.load_task(&task.id).await.unwrap().unwrap();
        assert_eq!(stored.task_status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn test_retrigger_pushes_new_attempt() {
        let f = fixture(RecordingExecutor::new());
        let task = f
            .command
            .init(TaskPayload::Single(command_fault("cpu", "web-1", "10.0.0.1")), None)
            .unwrap();

        let mut task = f.runner.execute(task).await.unwrap();
        task.task_substage.clear();
        let task = f.runner.execute(task).await.unwrap();

        assert_eq!(task.triggers.len(), 2);
        assert_eq!(task.task_status, TaskStatus::Completed);
        assert_eq!(f.executor.commands().len(), 2);
    }

    #[tokio::test]
    async fn test_paused_node_skips_tasks() {
        let f = fixture(RecordingExecutor::new());
        f.runner.set_node_status(NodeStatus::MaintenanceMode);
        let task = f
            .command
            .init(TaskPayload::Single(command_fault("cpu", "web-1", "10.0.0.1")), None)
            .unwrap();

        let task = f.runner.execute(task).await.unwrap();

        assert_eq!(task.task_status, TaskStatus::TaskSkipped);
        assert!(task.failure_reason().unwrap().contains("MaintenanceMode"));
        assert!(f.executor.commands().is_empty());
    }

    #[tokio::test]
    async fn test_fan_out_spawns_children() {
        let f = fixture(RecordingExecutor::new());
        let endpoints = (1..=3)
            .map(|i| EndpointSpec::new(format!("web-{i}"), Some(format!("10.0.0.{i}"))))
            .collect();
        let parent = f
            .trigger
            .init(
                TaskPayload::FanOut(FanOutSpec::endpoint_group(
                    endpoints,
                    command_fault("cpu", "group", "0.0.0.0"),
                )),
                None,
            )
            .unwrap();

        let parent = f.runner.execute(parent).await.unwrap();
        f.runner.wait_for_children().await;

        assert_eq!(parent.task_status, TaskStatus::Completed);
        assert_eq!(parent.child_task_ids.len(), 3);
        for id in &parent.child_task_ids {
            let child = f.store.load_task(id).await.unwrap().unwrap();
            assert_eq!(child.task_status, TaskStatus::Completed);
        }
        assert_eq!(f.executor.commands().len(), 3);
    }

    fn group_parent(f: &Fixture, size: usize) -> Task {
        let endpoints = (1..=size)
            .map(|i| EndpointSpec::new(format!("web-{i}"), Some(format!("10.0.0.{i}"))))
            .collect();
        f.trigger
            .init(
                TaskPayload::FanOut(FanOutSpec::endpoint_group(
                    endpoints,
                    command_fault("cpu", "group", "0.0.0.0"),
                )),
                None,
            )
            .unwrap()
    }

    #[tokio::test]
    async fn test_finished_child_handles_are_pruned() {
        let f = fixture(RecordingExecutor::new());

        f.runner.execute(group_parent(&f, 3)).await.unwrap();
        while f.runner.pending_children() > 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        f.runner.execute(group_parent(&f, 2)).await.unwrap();

        assert!(f.runner.children.lock().len() <= 2);
        f.runner.wait_for_children().await;
        assert_eq!(f.runner.pending_children(), 0);
        assert_eq!(f.executor.commands().len(), 5);
    }

    #[tokio::test]
    async fn test_terminal_task_is_withdrawn_from_work_map() {
        let f = fixture(RecordingExecutor::new().respond("inject cpu", CommandResult::failure(1, "boom")));
        let completed = f
            .command
            .init(TaskPayload::Single(command_fault("mem", "web-1", "10.0.0.1")), None)
            .unwrap();
        let failed = f
            .command
            .init(TaskPayload::Single(command_fault("cpu", "web-1", "10.0.0.1")), None)
            .unwrap();
        f.work_map.announce(&completed.id).unwrap();
        f.work_map.announce(&failed.id).unwrap();

        let completed = f.runner.execute(completed).await.unwrap();
        let failed = f.runner.execute(failed).await.unwrap();

        assert_eq!(completed.task_status, TaskStatus::Completed);
        assert_eq!(failed.task_status, TaskStatus::Failed);
        assert!(!f.work_map.is_announced(&completed.id));
        assert!(!f.work_map.is_announced(&failed.id));
        assert!(f.work_map.tasks_of_node("node-a").is_empty());
    }

    #[tokio::test]
    async fn test_scheduled_run_stays_recorded() {
        let f = fixture(RecordingExecutor::new());
        let mut task = f
            .command
            .init(TaskPayload::Single(command_fault("cpu", "web-1", "10.0.0.1")), None)
            .unwrap();
        task.scheduled_task = true;

        let task = f.runner.execute(task).await.unwrap();

        assert_eq!(task.task_status, TaskStatus::Completed);
        assert_eq!(f.work_map.tasks_of_node("node-a"), vec![task.id.clone()]);
    }

    #[tokio::test]
    async fn test_empty_fan_out_fails_and_surfaces_violation() {
        let f = fixture(RecordingExecutor::new());
        let parent = f
            .trigger
            .init(
                TaskPayload::FanOut(FanOutSpec::endpoint_group(
                    Vec::new(),
                    command_fault("cpu", "group", "0.0.0.0"),
                )),
                None,
            )
            .unwrap();
        let id = parent.id.clone();

        let err = f.runner.execute(parent).await.unwrap_err();
        assert!(err.is_invariant_violation());

        let stored = f.store.load_task(&id).await.unwrap().unwrap();
        assert_eq!(stored.task_status, TaskStatus::Failed);
        assert!(stored.child_task_ids.is_empty());
    }

    #[tokio::test]
    async fn test_scheduled_task_without_scheduler_is_rejected() {
        let f = fixture(RecordingExecutor::new());
        let spec = command_fault("cpu", "web-1", "10.0.0.1")
            .with_schedule(crate::models::ScheduleInfo::cron("0 0 * * * *"));
        let task = f.command.init(TaskPayload::Single(spec), None).unwrap();

        assert!(f.runner.submit(task).await.is_err());
        assert!(f.executor.commands().is_empty());
    }
}
