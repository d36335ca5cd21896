//! Cluster membership and the oldest-member leader rule.
//!
//! The leader is the live member with the lowest join sequence; ties fall
//! back to the node id so every node picks the same leader.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;

use super::event_bus::{ClusterEvent, ClusterEventBus};
use crate::error::Result;
use crate::models::Member;

pub trait MembershipProvider: Send + Sync {
    fn local_node(&self) -> &str;

    /// Live members, in no particular order
    fn members(&self) -> Vec<Member>;

    fn oldest_member(&self) -> Option<Member> {
        oldest_member(&self.members()).cloned()
    }

    fn is_local_node_oldest_member(&self) -> bool {
        self.oldest_member()
            .is_some_and(|member| member.node_id == self.local_node())
    }
}

pub fn oldest_member(members: &[Member]) -> Option<&Member> {
    members
        .iter()
        .min_by(|a, b| (a.join_seq, &a.node_id).cmp(&(b.join_seq, &b.node_id)))
}

/// Member list shared by nodes running in one process. Joins and departures
/// are announced on the cluster bus.
pub struct InMemoryMembership {
    members: RwLock<Vec<Member>>,
    next_seq: AtomicU64,
    bus: Arc<dyn ClusterEventBus>,
}

impl InMemoryMembership {
    pub fn new(bus: Arc<dyn ClusterEventBus>) -> Self {
        Self {
            members: RwLock::new(Vec::new()),
            next_seq: AtomicU64::new(1),
            bus,
        }
    }

    pub fn join(&self, node_id: impl Into<String>) -> Result<Member> {
        let member = Member::new(node_id, self.next_seq.fetch_add(1, Ordering::SeqCst));
        {
            let mut members = self.members.write();
            members.retain(|m| m.node_id != member.node_id);
            members.push(member.clone());
        }
        info!(node = %member.node_id, join_seq = member.join_seq, "Member joined");
        self.bus.publish(ClusterEvent::MemberAdded {
            node_id: member.node_id.clone(),
        })?;
        Ok(member)
    }

    pub fn leave(&self, node_id: &str) -> Result<()> {
        let removed = {
            let mut members = self.members.write();
            let before = members.len();
            members.retain(|m| m.node_id != node_id);
            before != members.len()
        };
        if removed {
            info!(node = %node_id, "Member left");
            self.bus.publish(ClusterEvent::MemberRemoved {
                node_id: node_id.to_string(),
            })?;
        }
        Ok(())
    }

    pub fn snapshot(&self) -> Vec<Member> {
        self.members.read().clone()
    }

    /// Membership as seen from `node_id`
    pub fn view(self: &Arc<Self>, node_id: impl Into<String>) -> NodeMembership {
        NodeMembership {
            node_id: node_id.into(),
            shared: Arc::clone(self),
        }
    }
}

pub struct NodeMembership {
    node_id: String,
    shared: Arc<InMemoryMembership>,
}

impl MembershipProvider for NodeMembership {
    fn local_node(&self) -> &str {
        &self.node_id
    }

    fn members(&self) -> Vec<Member> {
        self.shared.snapshot()
    }
}
