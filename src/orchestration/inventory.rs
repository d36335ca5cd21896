use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::error::Result;
use crate::models::FaultSpec;

/// Inventory lookups issued while resolving fan-out targets
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetQuery {
    /// Pod names matching every label
    PodsWithLabels { labels: BTreeMap<String, String> },
    /// VM ids, optionally restricted to a name
    VirtualMachines {
        name: Option<String>,
        filters: BTreeMap<String, String>,
    },
    VmNics { vm_id: String },
    VmDisks { vm_id: String },
    /// Host names, optionally restricted to a name
    Hosts {
        name: Option<String>,
        filters: BTreeMap<String, String>,
    },
}

/// Lists concrete targets behind a platform endpoint (cluster API,
/// virtualization manager)
#[async_trait]
pub trait TargetInventory: Send + Sync {
    /// `spec` identifies the endpoint and credentials to query with
    async fn query(&self, spec: &FaultSpec, query: &TargetQuery) -> Result<Vec<String>>;
}
