//! Quorum tracking and the request gate applied while quorum is lost.

use parking_lot::RwLock;
use std::sync::Arc;
use tracing::warn;

use crate::constants::QUORUM_EXEMPT_OPERATIONS;
use crate::error::{ChaosError, Result};
use crate::models::QuorumStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct QuorumSnapshot {
    quorum: usize,
    live_members: usize,
    status: QuorumStatus,
}

impl QuorumSnapshot {
    fn compute(quorum: usize, live_members: usize) -> Self {
        let status = if live_members >= quorum {
            QuorumStatus::Present
        } else {
            QuorumStatus::NotPresent
        };
        Self {
            quorum,
            live_members,
            status,
        }
    }
}

/// Live member count against the configured minimum. The status is always
/// recomputed together with either input.
#[derive(Debug)]
pub struct QuorumState {
    inner: RwLock<QuorumSnapshot>,
}

impl QuorumState {
    pub fn new(quorum: usize, live_members: usize) -> Self {
        Self {
            inner: RwLock::new(QuorumSnapshot::compute(quorum, live_members)),
        }
    }

    /// Returns the new status
    pub fn update_members(&self, live_members: usize) -> QuorumStatus {
        let mut inner = self.inner.write();
        *inner = QuorumSnapshot::compute(inner.quorum, live_members);
        inner.status
    }

    pub fn update_quorum(&self, quorum: usize) -> QuorumStatus {
        let mut inner = self.inner.write();
        *inner = QuorumSnapshot::compute(quorum, inner.live_members);
        inner.status
    }

    pub fn status(&self) -> QuorumStatus {
        self.inner.read().status
    }

    pub fn is_present(&self) -> bool {
        self.status() == QuorumStatus::Present
    }

    pub fn quorum(&self) -> usize {
        self.inner.read().quorum
    }

    pub fn live_members(&self) -> usize {
        self.inner.read().live_members
    }
}

/// Kind of inbound request checked by the [`QuorumGuard`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Read,
    Mutating,
}

/// Rejects mutating requests while quorum is lost, except allow-listed ones
pub struct QuorumGuard {
    node_id: String,
    quorum: Arc<QuorumState>,
}

impl QuorumGuard {
    pub fn new(node_id: impl Into<String>, quorum: Arc<QuorumState>) -> Self {
        Self {
            node_id: node_id.into(),
            quorum,
        }
    }

    pub fn authorize(&self, operation: &str, kind: RequestKind) -> Result<()> {
        if kind == RequestKind::Read
            || self.quorum.is_present()
            || QUORUM_EXEMPT_OPERATIONS.contains(&operation)
        {
            return Ok(());
        }
        warn!(
            node = %self.node_id,
            operation = %operation,
            live_members = self.quorum.live_members(),
            quorum = self.quorum.quorum(),
            "Rejecting request, cluster quorum not met"
        );
        Err(ChaosError::QuorumNotMet {
            node: self.node_id.clone(),
        })
    }
}
