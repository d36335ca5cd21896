//! # Persistence Contracts
//!
//! The orchestration core only needs durable, keyed documents with
//! read-after-write on the local node. Task documents and scheduler specs are
//! keyed by the same id; the cluster config is a singleton.

pub mod memory;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::error::Result;
use crate::models::{ClusterConfig, ScheduleStatus, SchedulerSpec, Task};
use crate::state_machine::TaskStatus;

pub use memory::InMemoryStore;

#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn save_task(&self, task: &Task) -> Result<()>;

    async fn load_task(&self, id: &str) -> Result<Option<Task>>;

    async fn delete_task(&self, id: &str) -> Result<()>;

    async fn list_tasks_by_status(&self, status: TaskStatus) -> Result<Vec<Task>>;

    async fn list_in_progress_tasks(&self) -> Result<Vec<Task>> {
        self.list_tasks_by_status(TaskStatus::InProgress).await
    }
}

#[async_trait]
pub trait ScheduleRepository: Send + Sync {
    async fn save_schedule(&self, spec: &SchedulerSpec) -> Result<()>;

    async fn load_schedule(&self, id: &str) -> Result<Option<SchedulerSpec>>;

    async fn load_schedules_by_status(&self, status: ScheduleStatus) -> Result<Vec<SchedulerSpec>>;

    async fn list_schedules(&self) -> Result<Vec<SchedulerSpec>>;

    async fn delete_schedule(&self, id: &str) -> Result<()>;

    /// Load every known spec among `ids`, unknown ids are skipped
    async fn load_schedules(&self, ids: &[String]) -> Result<Vec<SchedulerSpec>> {
        let mut found = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(spec) = self.load_schedule(id).await? {
                found.push(spec);
            }
        }
        Ok(found)
    }
}

#[async_trait]
pub trait ClusterConfigRepository: Send + Sync {
    async fn load_cluster_config(&self) -> Result<Option<ClusterConfig>>;

    async fn save_cluster_config(&self, config: &ClusterConfig) -> Result<()>;
}

/// Removes scheduler specs and, optionally, their tasks.
///
/// Only invoked once the live timer for the schedule has been torn down.
#[async_trait]
pub trait DeletionService: Send + Sync {
    async fn delete_schedule(&self, id: &str, delete_task: bool) -> Result<()>;
}

/// Deletion service backed directly by the repositories
pub struct RepositoryDeletionService {
    tasks: Arc<dyn TaskRepository>,
    schedules: Arc<dyn ScheduleRepository>,
}

impl RepositoryDeletionService {
    pub fn new(tasks: Arc<dyn TaskRepository>, schedules: Arc<dyn ScheduleRepository>) -> Self {
        Self { tasks, schedules }
    }
}

#[async_trait]
impl DeletionService for RepositoryDeletionService {
    async fn delete_schedule(&self, id: &str, delete_task: bool) -> Result<()> {
        self.schedules.delete_schedule(id).await?;
        if delete_task {
            self.tasks.delete_task(id).await?;
        }
        debug!(schedule_id = %id, delete_task, "Deleted schedule");
        Ok(())
    }
}
