//! In-memory store implementation.
//!
//! [`InMemoryStore`] keeps every document in process memory. It has no
//! durability and no cross-process visibility, so it backs tests and
//! single-node development only.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;

use super::{ClusterConfigRepository, ScheduleRepository, TaskRepository};
use crate::error::Result;
use crate::models::{ClusterConfig, ScheduleStatus, SchedulerSpec, Task};
use crate::state_machine::TaskStatus;

#[derive(Debug, Default)]
pub struct InMemoryStore {
    tasks: DashMap<String, Task>,
    schedules: DashMap<String, SchedulerSpec>,
    cluster_config: RwLock<Option<ClusterConfig>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn schedule_count(&self) -> usize {
        self.schedules.len()
    }
}

#[async_trait]
impl TaskRepository for InMemoryStore {
    async fn save_task(&self, task: &Task) -> Result<()> {
        self.tasks.insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn load_task(&self, id: &str) -> Result<Option<Task>> {
        Ok(self.tasks.get(id).map(|entry| entry.value().clone()))
    }

    async fn delete_task(&self, id: &str) -> Result<()> {
        self.tasks.remove(id);
        Ok(())
    }

    async fn list_tasks_by_status(&self, status: TaskStatus) -> Result<Vec<Task>> {
        Ok(self
            .tasks
            .iter()
            .filter(|entry| entry.task_status == status)
            .map(|entry| entry.value().clone())
            .collect())
    }
}

#[async_trait]
impl ScheduleRepository for InMemoryStore {
    async fn save_schedule(&self, spec: &SchedulerSpec) -> Result<()> {
        self.schedules.insert(spec.id.clone(), spec.clone());
        Ok(())
    }

    async fn load_schedule(&self, id: &str) -> Result<Option<SchedulerSpec>> {
        Ok(self.schedules.get(id).map(|entry| entry.value().clone()))
    }

    async fn load_schedules_by_status(&self, status: ScheduleStatus) -> Result<Vec<SchedulerSpec>> {
        Ok(self
            .schedules
            .iter()
            .filter(|entry| entry.status == status)
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn list_schedules(&self) -> Result<Vec<SchedulerSpec>> {
        Ok(self
            .schedules
            .iter()
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn delete_schedule(&self, id: &str) -> Result<()> {
        self.schedules.remove(id);
        Ok(())
    }
}

#[async_trait]
impl ClusterConfigRepository for InMemoryStore {
    async fn load_cluster_config(&self) -> Result<Option<ClusterConfig>> {
        Ok(self.cluster_config.read().clone())
    }

    async fn save_cluster_config(&self, config: &ClusterConfig) -> Result<()> {
        *self.cluster_config.write() = Some(config.clone());
        Ok(())
    }
}
