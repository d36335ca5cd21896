use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::config::DeploymentMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuorumStatus {
    Present,
    NotPresent,
}

impl fmt::Display for QuorumStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Present => write!(f, "PRESENT"),
            Self::NotPresent => write!(f, "NOT_PRESENT"),
        }
    }
}

/// Operational status of the local node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeStatus {
    #[default]
    Active,
    Pause,
    MaintenanceMode,
}

/// A live cluster member as reported by the membership provider
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Member {
    pub node_id: String,
    /// Monotonic join counter, lower joined earlier
    pub join_seq: u64,
}

impl Member {
    pub fn new(node_id: impl Into<String>, join_seq: u64) -> Self {
        Self {
            node_id: node_id.into(),
            join_seq,
        }
    }
}

/// Singleton cluster-config document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub members: BTreeSet<String>,
    pub master: Option<String>,
    pub quorum: usize,
    pub deployment_mode: DeploymentMode,
}

impl ClusterConfig {
    pub fn new(quorum: usize, deployment_mode: DeploymentMode) -> Self {
        Self {
            members: BTreeSet::new(),
            master: None,
            quorum,
            deployment_mode,
        }
    }
}
