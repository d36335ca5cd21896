//! Live-timer scheduler.
//!
//! A schedule spec is persisted as INITIALIZING before its timer is armed and
//! only becomes SCHEDULED once the timer exists. When arming fails both the
//! spec and its task are removed again.
//!
//! Arming and local schedule commands both hold the timers lock while they
//! read and write the spec status, so a paused or cancelled spec never ends
//! up with a live timer. A node holding a timer records the schedule in the
//! work map, which lets a surviving node re-arm it after a departure.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use super::trigger::TriggerPolicy;
use super::ScheduleAction;
use crate::cluster::{ClusterEvent, ClusterEventBus, WorkAnnouncementMap};
use crate::config::SchedulerConfig;
use crate::error::{ChaosError, Result};
use crate::events::{ChaosEvent, EventPublisher};
use crate::logging::log_schedule_operation;
use crate::models::{ScheduleInfo, ScheduleStatus, SchedulerSpec, Task};
use crate::orchestration::{TaskRunner, TaskScheduling};
use crate::persistence::{DeletionService, ScheduleRepository, TaskRepository};

type LiveTimers = Arc<Mutex<HashMap<String, JoinHandle<()>>>>;

/// Collaborators a running timer needs after the scheduler call returned
#[derive(Clone)]
struct TimerContext {
    tasks: Arc<dyn TaskRepository>,
    schedules: Arc<dyn ScheduleRepository>,
    runner: Arc<TaskRunner>,
    bus: Arc<dyn ClusterEventBus>,
    events: EventPublisher,
    timers: LiveTimers,
    firing: Arc<Semaphore>,
    work_map: Option<Arc<dyn WorkAnnouncementMap>>,
}

impl TimerContext {
    async fn run(self, schedule_id: String, policy: TriggerPolicy) {
        let mut next = policy.next_after(Utc::now());
        while let Some(due) = next {
            let wait = (due - Utc::now()).to_std().unwrap_or_default();
            tokio::time::sleep(wait).await;

            self.fire(&schedule_id).await;

            if policy.is_one_shot() {
                self.finish_one_shot(&schedule_id).await;
                break;
            }
            next = policy.next_after_run(due, Utc::now());
        }
    }

    async fn fire(&self, schedule_id: &str) {
        let _permit = match self.firing.acquire().await {
            Ok(permit) => permit,
            Err(e) => {
                error!(schedule_id = %schedule_id, error = %e, "Timer pool closed");
                return;
            }
        };

        let mut task = match self.tasks.load_task(schedule_id).await {
            Ok(Some(task)) => task,
            Ok(None) => {
                warn!(schedule_id = %schedule_id, "Scheduled task no longer exists");
                return;
            }
            Err(e) => {
                error!(schedule_id = %schedule_id, error = %e, "Failed to load scheduled task");
                return;
            }
        };

        info!(schedule_id = %schedule_id, "Schedule fired");
        task.reset_for_rerun();
        match self.runner.execute(task).await {
            Ok(task) => debug!(schedule_id = %schedule_id, status = %task.task_status, "Scheduled run finished"),
            Err(e) => error!(schedule_id = %schedule_id, error = %e, "Scheduled run failed"),
        }
    }

    async fn finish_one_shot(&self, schedule_id: &str) {
        self.timers.lock().await.remove(schedule_id);
        if let Some(work_map) = &self.work_map {
            work_map.withdraw(schedule_id);
        }
        match self.schedules.load_schedule(schedule_id).await {
            Ok(Some(mut spec)) => {
                spec.set_status(ScheduleStatus::Finished);
                if let Err(e) = self.schedules.save_schedule(&spec).await {
                    error!(schedule_id = %schedule_id, error = %e, "Failed to record finished schedule");
                    return;
                }
                announce_status(&self.events, self.bus.as_ref(), schedule_id, ScheduleStatus::Finished);
            }
            Ok(None) => {}
            Err(e) => error!(schedule_id = %schedule_id, error = %e, "Failed to load schedule"),
        }
    }
}

fn announce_status(
    events: &EventPublisher,
    bus: &dyn ClusterEventBus,
    schedule_id: &str,
    status: ScheduleStatus,
) {
    events.publish(ChaosEvent::ScheduleStatusChanged {
        schedule_id: schedule_id.to_string(),
        status,
    });
    if let Err(e) = bus.publish(ClusterEvent::ScheduleStatusChanged {
        schedule_id: schedule_id.to_string(),
        status,
    }) {
        warn!(schedule_id = %schedule_id, error = %e, "Failed to broadcast schedule status");
    }
}

pub struct Scheduler {
    node_id: String,
    tasks: Arc<dyn TaskRepository>,
    schedules: Arc<dyn ScheduleRepository>,
    deletion: Arc<dyn DeletionService>,
    runner: Arc<TaskRunner>,
    bus: Arc<dyn ClusterEventBus>,
    events: EventPublisher,
    timers: LiveTimers,
    firing: Arc<Semaphore>,
    work_map: Option<Arc<dyn WorkAnnouncementMap>>,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        node_id: impl Into<String>,
        tasks: Arc<dyn TaskRepository>,
        schedules: Arc<dyn ScheduleRepository>,
        deletion: Arc<dyn DeletionService>,
        runner: Arc<TaskRunner>,
        bus: Arc<dyn ClusterEventBus>,
        events: EventPublisher,
        config: &SchedulerConfig,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            tasks,
            schedules,
            deletion,
            runner,
            bus,
            events,
            timers: Arc::new(Mutex::new(HashMap::new())),
            firing: Arc::new(Semaphore::new(config.timer_pool_size)),
            work_map: None,
        }
    }

    pub fn with_work_map(mut self, work_map: Arc<dyn WorkAnnouncementMap>) -> Self {
        self.work_map = Some(work_map);
        self
    }

    fn timer_context(&self) -> TimerContext {
        TimerContext {
            tasks: self.tasks.clone(),
            schedules: self.schedules.clone(),
            runner: self.runner.clone(),
            bus: self.bus.clone(),
            events: self.events.clone(),
            timers: self.timers.clone(),
            firing: self.firing.clone(),
            work_map: self.work_map.clone(),
        }
    }

    fn withdraw_work(&self, id: &str) {
        if let Some(work_map) = &self.work_map {
            work_map.withdraw(id);
        }
    }

    /// Arm a live timer for the stored spec `id` and mark it SCHEDULED.
    ///
    /// Returns false without arming when the spec is gone, no longer
    /// SCHEDULED or INITIALIZING, or is a one-shot whose time passed; the
    /// latter is cancelled.
    async fn arm(&self, id: &str) -> Result<bool> {
        let mut timers = self.timers.lock().await;

        let Some(mut spec) = self.schedules.load_schedule(id).await? else {
            warn!(schedule_id = %id, "Schedule to arm does not exist");
            return Ok(false);
        };
        if !matches!(spec.status, ScheduleStatus::Scheduled | ScheduleStatus::Initializing) {
            debug!(schedule_id = %id, status = %spec.status, "Schedule not armable");
            return Ok(false);
        }
        if timers.get(id).is_some_and(|handle| !handle.is_finished()) {
            debug!(schedule_id = %id, "Timer already armed");
            return Ok(true);
        }

        let policy = TriggerPolicy::from_spec(&spec)?;
        if policy.has_elapsed(Utc::now()) {
            warn!(schedule_id = %id, "One-shot schedule elapsed before it was armed");
            spec.set_status(ScheduleStatus::Cancelled);
            self.schedules.save_schedule(&spec).await?;
            announce_status(&self.events, self.bus.as_ref(), id, ScheduleStatus::Cancelled);
            self.withdraw_work(id);
            return Ok(false);
        }

        let handle = tokio::spawn(self.timer_context().run(id.to_string(), policy));
        if spec.status != ScheduleStatus::Scheduled {
            spec.set_status(ScheduleStatus::Scheduled);
            if let Err(e) = self.schedules.save_schedule(&spec).await {
                handle.abort();
                return Err(e);
            }
            announce_status(&self.events, self.bus.as_ref(), id, ScheduleStatus::Scheduled);
        }
        timers.insert(id.to_string(), handle);
        if let Some(work_map) = &self.work_map {
            work_map.record_running(&self.node_id, id);
        }
        debug!(schedule_id = %id, node = %self.node_id, "Timer armed");
        Ok(true)
    }

    async fn rollback(&self, task_id: &str) {
        if let Err(e) = self.schedules.delete_schedule(task_id).await {
            error!(schedule_id = %task_id, error = %e, "Rollback failed to delete schedule");
        }
        if let Err(e) = self.tasks.delete_task(task_id).await {
            error!(task_id = %task_id, error = %e, "Rollback failed to delete task");
        }
    }

    /// Schedule `task` using the schedule attached to its fault spec
    #[instrument(skip(self, task), fields(task_id = %task.id, node = %self.node_id))]
    pub async fn schedule_task(&self, mut task: Task) -> Result<Task> {
        let info = task
            .task_data
            .schedule()
            .cloned()
            .ok_or_else(|| ChaosError::validation(format!("task {} has no schedule", task.id)))?;

        let mut spec = match (&info.cron_expression, info.time_in_millis) {
            (Some(expression), _) => SchedulerSpec::cron(&task.id, expression.clone()),
            (None, Some(millis)) => {
                if millis <= Utc::now().timestamp_millis() {
                    return Err(ChaosError::ScheduleFailure {
                        id: task.id.clone(),
                        reason: format!("scheduled time {millis} is in the past"),
                    });
                }
                SchedulerSpec::once(&task.id, millis)
            }
            (None, None) => {
                return Err(ChaosError::validation(format!(
                    "schedule of task {} has neither cron expression nor time",
                    task.id
                )))
            }
        }
        .with_description(info.description.clone());

        task.scheduled_task = true;
        self.tasks.save_task(&task).await?;
        self.schedules.save_schedule(&spec).await?;

        match self.arm(&spec.id).await {
            Ok(true) => {}
            Ok(false) => {
                self.rollback(&task.id).await;
                return Err(ChaosError::ScheduleFailure {
                    id: task.id.clone(),
                    reason: "schedule changed before its timer was armed".to_string(),
                });
            }
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "Arming timer failed, rolling back");
                self.rollback(&task.id).await;
                return Err(e);
            }
        }

        spec.set_status(ScheduleStatus::Scheduled);
        log_schedule_operation("schedule", &spec.id, spec.status.as_str(), spec.cron_expression.as_deref());
        Ok(task)
    }

    pub async fn schedule_cron(&self, mut task: Task, cron_expression: &str) -> Result<Task> {
        task.task_data.fault_mut().schedule = Some(ScheduleInfo::cron(cron_expression));
        self.schedule_task(task).await
    }

    pub async fn schedule_once(&self, mut task: Task, time_in_millis: i64) -> Result<Task> {
        task.task_data.fault_mut().schedule = Some(ScheduleInfo::once(time_in_millis));
        self.schedule_task(task).await
    }

    /// Every id must exist and be in an allowed status, or nothing happens
    async fn validate_batch(
        &self,
        ids: &[String],
        expected: &str,
        allowed: impl Fn(ScheduleStatus) -> bool,
    ) -> Result<Vec<SchedulerSpec>> {
        if ids.is_empty() {
            return Err(ChaosError::validation("no schedule ids given"));
        }
        let specs = self.schedules.load_schedules(ids).await?;

        let unknown: Vec<String> = ids
            .iter()
            .filter(|id| !specs.iter().any(|spec| &spec.id == *id))
            .cloned()
            .collect();
        if !unknown.is_empty() {
            return Err(ChaosError::UnknownSchedules { ids: unknown });
        }

        let offenders: Vec<(String, String)> = specs
            .iter()
            .filter(|spec| !allowed(spec.status))
            .map(|spec| (spec.id.clone(), spec.status.to_string()))
            .collect();
        if !offenders.is_empty() {
            return Err(ChaosError::ScheduleStateMismatch {
                expected: expected.to_string(),
                offenders,
            });
        }
        Ok(specs)
    }

    fn broadcast(&self, specs: &[SchedulerSpec], action: ScheduleAction) -> Result<()> {
        for spec in specs {
            self.bus.publish(ClusterEvent::ScheduleCommand {
                schedule_id: spec.id.clone(),
                action,
            })?;
        }
        info!(count = specs.len(), action = ?action, "Broadcast schedule command");
        Ok(())
    }

    pub async fn pause(&self, ids: &[String]) -> Result<()> {
        let specs = self
            .validate_batch(ids, "SCHEDULED", |status| status == ScheduleStatus::Scheduled)
            .await?;
        self.broadcast(&specs, ScheduleAction::Pause)
    }

    pub async fn cancel(&self, ids: &[String]) -> Result<()> {
        let specs = self
            .validate_batch(ids, "SCHEDULED", |status| status == ScheduleStatus::Scheduled)
            .await?;
        self.broadcast(&specs, ScheduleAction::Cancel)
    }

    /// Delete inactive schedules, and their tasks when asked
    pub async fn delete(&self, ids: &[String], also_delete_tasks: bool) -> Result<()> {
        let specs = self
            .validate_batch(ids, "any status except SCHEDULED", |status| {
                status != ScheduleStatus::Scheduled
            })
            .await?;
        let action = if also_delete_tasks {
            ScheduleAction::DeleteWithTask
        } else {
            ScheduleAction::Delete
        };
        self.broadcast(&specs, action)
    }

    /// Flip paused schedules back to INITIALIZING and announce them for arming
    pub async fn resume(&self, ids: &[String]) -> Result<()> {
        let specs = self
            .validate_batch(ids, "PAUSED", |status| status == ScheduleStatus::Paused)
            .await?;
        for mut spec in specs {
            spec.set_status(ScheduleStatus::Initializing);
            self.schedules.save_schedule(&spec).await?;
            self.events.publish(ChaosEvent::ScheduleCreated {
                schedule_id: spec.id.clone(),
            });
            self.bus.publish(ClusterEvent::ScheduleCreated {
                schedule_id: spec.id.clone(),
            })?;
            log_schedule_operation("resume", &spec.id, spec.status.as_str(), None);
        }
        Ok(())
    }

    /// Apply a schedule command locally: stop the live timer, record the new
    /// status and for deletes remove the documents.
    ///
    /// Pause and cancel need a live timer on this node. Deletes only target
    /// inactive schedules, so a missing timer is expected there.
    #[instrument(skip(self), fields(node = %self.node_id))]
    pub async fn remove_schedule_from_current_node(&self, id: &str, action: ScheduleAction) -> Result<()> {
        let mut timers = self.timers.lock().await;
        match timers.remove(id) {
            Some(handle) => handle.abort(),
            None if action.is_delete() => {}
            None => return Err(ChaosError::JobNotActive { id: id.to_string() }),
        }

        if let Some(status) = action.resulting_status() {
            if let Some(mut spec) = self.schedules.load_schedule(id).await? {
                spec.set_status(status);
                self.schedules.save_schedule(&spec).await?;
                announce_status(&self.events, self.bus.as_ref(), id, status);
            }
        }
        drop(timers);
        self.withdraw_work(id);

        if action.is_delete() {
            self.deletion
                .delete_schedule(id, action == ScheduleAction::DeleteWithTask)
                .await?;
        }

        log_schedule_operation("remove", id, &format!("{action:?}"), None);
        Ok(())
    }

    /// Arm the timer for a persisted spec announced as created.
    ///
    /// Specs that are no longer SCHEDULED or INITIALIZING are ignored. A
    /// one-shot whose time passed while it had no timer is cancelled.
    #[instrument(skip(self), fields(node = %self.node_id))]
    pub async fn arm_from_spec(&self, id: &str) -> Result<()> {
        let Some(mut task) = self.tasks.load_task(id).await? else {
            warn!(schedule_id = %id, "Task of announced schedule does not exist");
            return Ok(());
        };
        if !self.arm(id).await? {
            return Ok(());
        }

        if !task.scheduled_task {
            task.scheduled_task = true;
            self.tasks.save_task(&task).await?;
        }
        Ok(())
    }

    /// Drop the local timer without touching the spec, used when another node
    /// took ownership of the schedule
    pub async fn release_timer(&self, id: &str) -> bool {
        match self.timers.lock().await.remove(id) {
            Some(handle) => {
                handle.abort();
                if let Some(work_map) = &self.work_map {
                    work_map.forget_running(&self.node_id, id);
                }
                debug!(schedule_id = %id, node = %self.node_id, "Released live timer");
                true
            }
            None => false,
        }
    }

    /// Announce every SCHEDULED spec again so its owner re-arms it
    pub async fn reannounce_scheduled(&self) -> Result<usize> {
        let specs = self
            .schedules
            .load_schedules_by_status(ScheduleStatus::Scheduled)
            .await?;
        for spec in &specs {
            self.bus.publish(ClusterEvent::ScheduleCreated {
                schedule_id: spec.id.clone(),
            })?;
        }
        info!(count = specs.len(), "Re-announced possibly misfired schedules");
        Ok(specs.len())
    }

    pub async fn get_schedule(&self, id: &str) -> Result<SchedulerSpec> {
        self.schedules
            .load_schedule(id)
            .await?
            .ok_or_else(|| ChaosError::UnknownSchedules {
                ids: vec![id.to_string()],
            })
    }

    pub async fn list_schedules(&self, status: Option<ScheduleStatus>) -> Result<Vec<SchedulerSpec>> {
        let mut specs = match status {
            Some(status) => self.schedules.load_schedules_by_status(status).await?,
            None => self.schedules.list_schedules().await?,
        };
        specs.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(specs)
    }

    /// Ids of schedules that own or are about to own a timer
    pub async fn active_schedule_ids(&self) -> Result<Vec<String>> {
        Ok(self
            .list_schedules(None)
            .await?
            .into_iter()
            .filter(|spec| spec.status.is_active())
            .map(|spec| spec.id)
            .collect())
    }

    pub async fn has_live_timer(&self, id: &str) -> bool {
        self.timers
            .lock()
            .await
            .get(id)
            .is_some_and(|handle| !handle.is_finished())
    }

    pub async fn live_timer_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.timers.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Cancel every timer armed on this node
    pub async fn cancel_all(&self) -> Result<Vec<String>> {
        let ids = self.live_timer_ids().await;
        if ids.is_empty() {
            return Err(ChaosError::NoActiveJobs);
        }
        for id in &ids {
            self.remove_schedule_from_current_node(id, ScheduleAction::Cancel)
                .await?;
        }
        Ok(ids)
    }

    /// Stop every timer without changing persisted state. Work-map records
    /// stay so another node can take the schedules over.
    pub async fn shutdown(&self) {
        let mut timers = self.timers.lock().await;
        for (id, handle) in timers.drain() {
            debug!(schedule_id = %id, "Stopping timer");
            handle.abort();
        }
        info!(node = %self.node_id, "Scheduler shut down");
    }
}

#[async_trait]
impl TaskScheduling for Scheduler {
    async fn schedule_task(&self, task: Task) -> Result<Task> {
        Scheduler::schedule_task(self, task).await
    }
}
