//! # Cluster Coordinator
//!
//! Reacts to cluster events on behalf of one node. The oldest member drives
//! startup recovery and keeps the cluster-config document current; every
//! node arms the schedules and runs the announced work its partition owns.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use super::event_bus::{ClusterEvent, ClusterEventBus};
use super::membership::MembershipProvider;
use super::quorum::QuorumState;
use super::work_map::{partition_owner, WorkAnnouncementMap};
use crate::config::ClusterSettings;
use crate::error::Result;
use crate::logging::{log_cluster_operation, log_error};
use crate::models::{ClusterConfig, QuorumStatus, ScheduleStatus, Task};
use crate::orchestration::TaskRunner;
use crate::persistence::{ClusterConfigRepository, ScheduleRepository, TaskRepository};
use crate::scheduler::{ScheduleAction, Scheduler};
use crate::state_machine::TaskStatus;

/// Fate of a task found IN_PROGRESS during leader recovery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    Fail,
    /// Re-announce after the retrigger delay
    Queue,
    Skip,
}

/// Decide what recovery does with an IN_PROGRESS task.
///
/// Tasks without trigger history never started and fail. Scheduled tasks are
/// skipped since their schedule runs them again. Ad-hoc tasks whose current
/// attempt is younger than `window` are queued, older ones fail.
pub fn classify_in_progress(task: &Task, now: DateTime<Utc>, window: chrono::Duration) -> RecoveryAction {
    let Some(trigger) = task.triggers.last() else {
        return RecoveryAction::Fail;
    };
    if task.scheduled_task {
        return RecoveryAction::Skip;
    }
    if now - trigger.start_time < window {
        RecoveryAction::Queue
    } else {
        RecoveryAction::Fail
    }
}

/// Counts reported by one recovery pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub reannounced_schedules: usize,
    pub failed: Vec<String>,
    pub skipped: Vec<String>,
    pub queued: Vec<String>,
}

/// Shared collaborators of a coordinator
#[derive(Clone)]
pub struct CoordinatorServices {
    pub membership: Arc<dyn MembershipProvider>,
    pub quorum: Arc<QuorumState>,
    pub cluster_configs: Arc<dyn ClusterConfigRepository>,
    pub tasks: Arc<dyn TaskRepository>,
    pub schedules: Arc<dyn ScheduleRepository>,
    pub work_map: Arc<dyn WorkAnnouncementMap>,
    pub bus: Arc<dyn ClusterEventBus>,
}

pub struct ClusterCoordinator {
    node_id: String,
    services: CoordinatorServices,
    scheduler: Arc<Scheduler>,
    runner: Arc<TaskRunner>,
    settings: ClusterSettings,
    /// One writer of the cluster-config document per node
    config_lock: tokio::sync::Mutex<()>,
    retrigger_queue: parking_lot::Mutex<Vec<String>>,
    was_leader: AtomicBool,
}

impl ClusterCoordinator {
    pub fn new(
        services: CoordinatorServices,
        scheduler: Arc<Scheduler>,
        runner: Arc<TaskRunner>,
        settings: ClusterSettings,
    ) -> Self {
        Self {
            node_id: runner.node_id().to_string(),
            services,
            scheduler,
            runner,
            settings,
            config_lock: tokio::sync::Mutex::new(()),
            retrigger_queue: parking_lot::Mutex::new(Vec::new()),
            was_leader: AtomicBool::new(false),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn is_leader(&self) -> bool {
        self.services.membership.is_local_node_oldest_member()
    }

    pub fn quorum_status(&self) -> QuorumStatus {
        self.services.quorum.status()
    }

    fn owns(&self, key: &str) -> bool {
        partition_owner(key, &self.services.membership.members()).as_deref() == Some(self.node_id.as_str())
    }

    fn refresh_quorum(&self) -> QuorumStatus {
        self.services
            .quorum
            .update_members(self.services.membership.members().len())
    }

    /// Subscribe to the cluster bus, run recovery when this node leads and
    /// start the event loop
    pub async fn start(self: &Arc<Self>) -> Result<JoinHandle<()>> {
        let events = self.services.bus.subscribe();
        self.refresh_quorum();
        self.on_membership_changed().await?;

        let coordinator = Arc::clone(self);
        Ok(tokio::spawn(coordinator.run(events)))
    }

    async fn run(self: Arc<Self>, mut events: tokio::sync::broadcast::Receiver<ClusterEvent>) {
        loop {
            match events.recv().await {
                Ok(event) => {
                    debug!(node = %self.node_id, event = event.name(), "Cluster event received");
                    if let Err(e) = self.handle(event).await {
                        log_error("cluster_coordinator", "handle_event", &e.to_string(), Some(&self.node_id));
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(node = %self.node_id, skipped, "Cluster event receiver lagged");
                }
                Err(RecvError::Closed) => {
                    info!(node = %self.node_id, "Cluster event bus closed");
                    break;
                }
            }
        }
    }

    /// Apply one cluster event to the local node
    pub async fn handle(self: &Arc<Self>, event: ClusterEvent) -> Result<()> {
        match event {
            ClusterEvent::ScheduleCreated { schedule_id } => self.handle_schedule_created(&schedule_id).await,
            ClusterEvent::ScheduleCommand { schedule_id, action } => {
                self.handle_schedule_command(&schedule_id, action).await
            }
            ClusterEvent::ScheduleStatusChanged { .. } => Ok(()),
            ClusterEvent::WorkAnnounced { task_id } => self.handle_work_announced(&task_id).await,
            ClusterEvent::MemberAdded { node_id } => {
                log_cluster_operation("member_added", &node_id, self.refresh_quorum().to_string().as_str(), None);
                self.on_membership_changed().await
            }
            ClusterEvent::MemberRemoved { node_id } => self.handle_member_removed(&node_id).await,
        }
    }

    async fn on_membership_changed(self: &Arc<Self>) -> Result<()> {
        let leader = self.is_leader();
        let was_leader = self.was_leader.swap(leader, Ordering::SeqCst);
        let became_leader = leader && !was_leader;

        if leader {
            self.refresh_cluster_config().await?;
        }
        if became_leader {
            info!(node = %self.node_id, "Local node is now the oldest member");
            self.recover().await?;
            self.schedule_retrigger_flush();
        }
        Ok(())
    }

    /// The owner arms the timer; any other node still holding one lets go
    async fn handle_schedule_created(&self, schedule_id: &str) -> Result<()> {
        if self.owns(schedule_id) {
            if !self.scheduler.has_live_timer(schedule_id).await {
                self.scheduler.arm_from_spec(schedule_id).await?;
            }
        } else if self.scheduler.release_timer(schedule_id).await {
            debug!(schedule_id = %schedule_id, node = %self.node_id, "Schedule moved to another node");
        }
        Ok(())
    }

    /// Deletes target inactive schedules without a timer, so the partition
    /// owner applies them
    async fn handle_schedule_command(&self, schedule_id: &str, action: ScheduleAction) -> Result<()> {
        let applies = self.scheduler.has_live_timer(schedule_id).await
            || (action.is_delete() && self.owns(schedule_id));
        if applies {
            self.scheduler
                .remove_schedule_from_current_node(schedule_id, action)
                .await?;
        }
        Ok(())
    }

    /// Run or re-arm an announced task when the local node owns its partition
    #[instrument(skip(self), fields(node = %self.node_id))]
    pub async fn handle_work_announced(&self, task_id: &str) -> Result<()> {
        if !self.owns(task_id) {
            return Ok(());
        }
        let work_map = &self.services.work_map;

        let Some(task) = self.services.tasks.load_task(task_id).await? else {
            warn!(task_id = %task_id, "Announced task does not exist");
            work_map.withdraw(task_id);
            return Ok(());
        };

        if task.scheduled_task {
            let armable = self
                .services
                .schedules
                .load_schedule(task_id)
                .await?
                .is_some_and(|spec| {
                    matches!(spec.status, ScheduleStatus::Scheduled | ScheduleStatus::Initializing)
                });
            if !armable {
                debug!(task_id = %task_id, "Schedule of announced task is inactive");
                work_map.withdraw(task_id);
                return Ok(());
            }
            self.scheduler.arm_from_spec(task_id).await?;
        } else {
            if task.task_status.is_terminal() {
                debug!(task_id = %task_id, status = %task.task_status, "Announced task already finished");
                work_map.withdraw(task_id);
                return Ok(());
            }
            work_map.record_running(&self.node_id, task_id);
            let execution = self.runner.execute(task);
            let id = task_id.to_string();
            tokio::spawn(async move {
                if let Err(e) = execution.await {
                    error!(task_id = %id, error = %e, "Announced task failed to run");
                }
            });
        }

        log_cluster_operation("run_announced", &self.node_id, "ACCEPTED", Some(task_id));
        Ok(())
    }

    /// Leader-only recovery of possibly misfired schedules and in-progress
    /// tasks orphaned by a restart
    #[instrument(skip(self), fields(node = %self.node_id))]
    pub async fn recover(&self) -> Result<RecoveryReport> {
        let mut report = RecoveryReport::default();
        if !self.is_leader() {
            return Ok(report);
        }

        report.reannounced_schedules = self.scheduler.reannounce_scheduled().await?;

        let now = Utc::now();
        let window = self.settings.retrigger_window();
        for mut task in self.services.tasks.list_in_progress_tasks().await? {
            match classify_in_progress(&task, now, window) {
                RecoveryAction::Fail => {
                    let reason = if task.has_run() {
                        format!("Task was in progress for longer than {} minutes", window.num_minutes())
                    } else {
                        "Task never started".to_string()
                    };
                    task.force_status(TaskStatus::Failed, Some(reason));
                    self.services.tasks.save_task(&task).await?;
                    report.failed.push(task.id);
                }
                RecoveryAction::Skip => {
                    task.force_status(
                        TaskStatus::TaskSkipped,
                        Some("Scheduled task interrupted, its schedule will run it again".to_string()),
                    );
                    self.services.tasks.save_task(&task).await?;
                    report.skipped.push(task.id);
                }
                RecoveryAction::Queue => {
                    self.retrigger_queue.lock().push(task.id.clone());
                    report.queued.push(task.id);
                }
            }
        }

        info!(
            reannounced = report.reannounced_schedules,
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            queued = report.queued.len(),
            "Recovery pass finished"
        );
        Ok(report)
    }

    /// Announce every queued task so its partition owner runs it
    pub fn flush_retrigger_queue(&self) -> Result<usize> {
        let queued: Vec<String> = std::mem::take(&mut *self.retrigger_queue.lock());
        for task_id in &queued {
            self.services.work_map.announce(task_id)?;
        }
        if !queued.is_empty() {
            log_cluster_operation("retrigger", &self.node_id, "FLUSHED", Some(&queued.join(",")));
        }
        Ok(queued.len())
    }

    pub fn queued_retriggers(&self) -> Vec<String> {
        self.retrigger_queue.lock().clone()
    }

    fn schedule_retrigger_flush(self: &Arc<Self>) {
        let coordinator = Arc::clone(self);
        let delay = self.settings.retrigger_delay();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = coordinator.flush_retrigger_queue() {
                error!(node = %coordinator.node_id, error = %e, "Failed to flush retrigger queue");
            }
        });
    }

    /// Rewrite the cluster-config document from the live membership.
    ///
    /// With quorum the leader records the live members, itself as master and
    /// the larger of the persisted and configured quorum. Without quorum the
    /// leader withdraws the live members and gives up the master role.
    pub async fn refresh_cluster_config(&self) -> Result<()> {
        if !self.is_leader() {
            return Ok(());
        }
        let _guard = self.config_lock.lock().await;

        let members = self.services.membership.members();
        let mut config = self
            .services
            .cluster_configs
            .load_cluster_config()
            .await?
            .unwrap_or_else(|| ClusterConfig::new(self.settings.quorum, self.settings.deployment_mode));

        self.services.quorum.update_quorum(config.quorum.max(self.settings.quorum));
        let status = self.services.quorum.update_members(members.len());

        if status == QuorumStatus::Present {
            config.members = members.iter().map(|m| m.node_id.clone()).collect();
            config.master = Some(self.node_id.clone());
            config.quorum = config.quorum.max(self.settings.quorum);
            config.deployment_mode = self.settings.deployment_mode;
        } else {
            for member in &members {
                config.members.remove(&member.node_id);
            }
            if config.master.as_deref() == Some(self.node_id.as_str()) {
                config.master = None;
            }
        }

        self.services.cluster_configs.save_cluster_config(&config).await?;
        log_cluster_operation("refresh_config", &self.node_id, status.to_string().as_str(), None);
        Ok(())
    }

    /// Drop a departed node from the cluster config, take over leadership if
    /// it falls to this node and migrate the departed node's work
    #[instrument(skip(self), fields(node = %self.node_id))]
    pub async fn handle_member_removed(self: &Arc<Self>, departed: &str) -> Result<()> {
        let status = self.refresh_quorum();
        log_cluster_operation("member_removed", departed, status.to_string().as_str(), None);

        if self.is_leader() && status == QuorumStatus::Present {
            let _guard = self.config_lock.lock().await;
            if let Some(mut config) = self.services.cluster_configs.load_cluster_config().await? {
                config.members.remove(departed);
                if config.master.as_deref() == Some(departed) {
                    config.master = None;
                }
                self.services.cluster_configs.save_cluster_config(&config).await?;
            }
        }

        self.on_membership_changed().await?;

        if status == QuorumStatus::Present {
            self.migrate_work_of(departed).await?;
        }
        Ok(())
    }

    /// Take over announced tasks of `departed` whose partition now belongs to
    /// this node. Scheduled tasks are re-armed at once; ad-hoc tasks run again
    /// after the retrigger delay.
    async fn migrate_work_of(self: &Arc<Self>, departed: &str) -> Result<()> {
        let work_map = &self.services.work_map;
        for task_id in work_map.tasks_of_node(departed) {
            if !self.owns(&task_id) || !work_map.reassign(departed, &self.node_id, &task_id) {
                continue;
            }
            let Some(task) = self.services.tasks.load_task(&task_id).await? else {
                work_map.withdraw(&task_id);
                continue;
            };

            if task.scheduled_task {
                info!(task_id = %task_id, from = %departed, "Re-arming schedule of departed node");
                self.scheduler.arm_from_spec(&task_id).await?;
            } else if !task.task_status.is_terminal() {
                info!(task_id = %task_id, from = %departed, "Queueing task of departed node");
                let coordinator = Arc::clone(self);
                let delay = self.settings.retrigger_delay();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    if let Err(e) = coordinator.handle_work_announced(&task_id).await {
                        error!(task_id = %task_id, error = %e, "Failed to re-run migrated task");
                    }
                });
            } else {
                work_map.withdraw(&task_id);
            }
        }
        Ok(())
    }
}
