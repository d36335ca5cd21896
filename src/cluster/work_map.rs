//! Cluster-visible work announcements.
//!
//! Publishing a task id here hands the task to whichever node owns its
//! partition. Nodes also record which tasks they are running so work can
//! migrate when a node leaves.

use dashmap::{DashMap, DashSet};
use std::sync::Arc;

use super::event_bus::{ClusterEvent, ClusterEventBus};
use crate::error::Result;
use crate::models::Member;

pub trait WorkAnnouncementMap: Send + Sync {
    /// Publish `task_id` for execution by its partition owner
    fn announce(&self, task_id: &str) -> Result<()>;

    fn withdraw(&self, task_id: &str);

    fn is_announced(&self, task_id: &str) -> bool;

    fn announced(&self) -> Vec<String>;

    fn record_running(&self, node_id: &str, task_id: &str);

    /// Drop `task_id` from the running record of `node_id` only, leaving the
    /// announcement in place
    fn forget_running(&self, node_id: &str, task_id: &str);

    fn tasks_of_node(&self, node_id: &str) -> Vec<String>;

    /// Move `task_id` from the running record of `from` to that of `to`.
    /// Returns false when `from` no longer held it, so only one node wins.
    fn reassign(&self, from: &str, to: &str, task_id: &str) -> bool;
}

/// Node owning the partition of `key` among `members`.
///
/// Uses FNV-1a so every node computes the same owner for the same member
/// set.
pub fn partition_owner(key: &str, members: &[Member]) -> Option<String> {
    if members.is_empty() {
        return None;
    }
    let mut nodes: Vec<&str> = members.iter().map(|m| m.node_id.as_str()).collect();
    nodes.sort_unstable();

    let hash = key.bytes().fold(0xcbf2_9ce4_8422_2325_u64, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(0x0100_0000_01b3)
    });
    let index = (hash % nodes.len() as u64) as usize;
    Some(nodes[index].to_string())
}

pub struct InMemoryWorkMap {
    announced: DashSet<String>,
    running: DashMap<String, Vec<String>>,
    bus: Arc<dyn ClusterEventBus>,
}

impl InMemoryWorkMap {
    pub fn new(bus: Arc<dyn ClusterEventBus>) -> Self {
        Self {
            announced: DashSet::new(),
            running: DashMap::new(),
            bus,
        }
    }
}

impl WorkAnnouncementMap for InMemoryWorkMap {
    fn announce(&self, task_id: &str) -> Result<()> {
        self.announced.insert(task_id.to_string());
        self.bus.publish(ClusterEvent::WorkAnnounced {
            task_id: task_id.to_string(),
        })
    }

    fn withdraw(&self, task_id: &str) {
        self.announced.remove(task_id);
        for mut entry in self.running.iter_mut() {
            entry.value_mut().retain(|id| id != task_id);
        }
    }

    fn is_announced(&self, task_id: &str) -> bool {
        self.announced.contains(task_id)
    }

    fn announced(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.announced.iter().map(|id| id.key().clone()).collect();
        ids.sort();
        ids
    }

    fn record_running(&self, node_id: &str, task_id: &str) {
        let mut tasks = self.running.entry(node_id.to_string()).or_default();
        if !tasks.iter().any(|id| id == task_id) {
            tasks.push(task_id.to_string());
        }
    }

    fn forget_running(&self, node_id: &str, task_id: &str) {
        if let Some(mut tasks) = self.running.get_mut(node_id) {
            tasks.retain(|id| id != task_id);
        }
        self.running.remove_if(node_id, |_, tasks| tasks.is_empty());
    }

    fn tasks_of_node(&self, node_id: &str) -> Vec<String> {
        self.running
            .get(node_id)
            .map(|tasks| tasks.value().clone())
            .unwrap_or_default()
    }

    fn reassign(&self, from: &str, to: &str, task_id: &str) -> bool {
        let removed = match self.running.get_mut(from) {
            Some(mut tasks) => {
                let before = tasks.len();
                tasks.retain(|id| id != task_id);
                tasks.len() != before
            }
            None => false,
        };
        self.running.remove_if(from, |_, tasks| tasks.is_empty());
        if removed {
            self.record_running(to, task_id);
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::event_bus::InMemoryEventBus;

    #[test]
    fn test_partition_owner_is_stable_and_order_independent() {
        let members = vec![Member::new("node-b", 2), Member::new("node-a", 1)];
        let reversed = vec![Member::new("node-a", 1), Member::new("node-b", 2)];

        for key in ["task-1", "task-2", "task-3"] {
            let owner = partition_owner(key, &members);
            assert!(owner.is_some());
            assert_eq!(owner, partition_owner(key, &reversed));
        }
        assert_eq!(partition_owner("task-1", &[]), None);
        assert_eq!(
            partition_owner("task-1", &[Member::new("solo", 1)]).as_deref(),
            Some("solo")
        );
    }

    #[test]
    fn test_running_records() {
        let map = InMemoryWorkMap::new(Arc::new(InMemoryEventBus::default()));
        map.announce("t1").unwrap();
        map.record_running("node-a", "t1");
        map.record_running("node-a", "t1");
        map.record_running("node-a", "t2");

        assert!(map.is_announced("t1"));
        assert_eq!(map.tasks_of_node("node-a"), vec!["t1", "t2"]);

        map.withdraw("t1");
        assert!(!map.is_announced("t1"));

        assert!(map.reassign("node-a", "node-b", "t2"));
        assert!(!map.reassign("node-a", "node-c", "t2"));
        assert!(map.tasks_of_node("node-a").is_empty());
        assert_eq!(map.tasks_of_node("node-b"), vec!["t2"]);
    }

    #[test]
    fn test_forget_running_is_per_node() {
        let map = InMemoryWorkMap::new(Arc::new(InMemoryEventBus::default()));
        map.announce("t1").unwrap();
        map.record_running("node-a", "t1");
        map.record_running("node-b", "t1");

        map.forget_running("node-a", "t1");
        map.forget_running("node-c", "t1");

        assert!(map.tasks_of_node("node-a").is_empty());
        assert_eq!(map.tasks_of_node("node-b"), vec!["t1"]);
        assert!(map.is_announced("t1"));
    }
}
