//! # Cluster
//!
//! Membership, quorum and the cross-node signalling that decides which node
//! arms a schedule or runs announced work.
//!
//! ## Leader rule
//!
//! The oldest surviving member leads. It re-announces schedules and recovers
//! in-progress tasks after a restart, and keeps the cluster-config document in
//! line with the live members. Nothing else depends on leadership: schedule
//! timers and announced tasks go to the node owning their partition.

pub mod coordinator;
pub mod event_bus;
pub mod membership;
pub mod quorum;
pub mod work_map;

pub use coordinator::{
    classify_in_progress, ClusterCoordinator, CoordinatorServices, RecoveryAction, RecoveryReport,
};
pub use event_bus::{ClusterEvent, ClusterEventBus, InMemoryEventBus};
pub use membership::{InMemoryMembership, MembershipProvider, NodeMembership};
pub use quorum::{QuorumGuard, QuorumState, RequestKind};
pub use work_map::{partition_owner, InMemoryWorkMap, WorkAnnouncementMap};
