use serde::{Deserialize, Serialize};

use super::fault_spec::{EndpointSpec, FaultSpec};

/// How the target set of a fan-out request is resolved
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "selection", rename_all = "snake_case")]
pub enum FanOutKind {
    /// Explicit list of endpoints
    EndpointGroup { endpoints: Vec<EndpointSpec> },
    /// Pods matching the fault's pod labels
    KubernetesPods,
    /// VMs, NICs, disks or hosts enumerated from the virtualization inventory
    VirtualInfrastructure,
}

impl FanOutKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::EndpointGroup { .. } => "endpoint_group",
            Self::KubernetesPods => "kubernetes_pods",
            Self::VirtualInfrastructure => "virtual_infrastructure",
        }
    }
}

/// Parent payload of a fan-out task: a per-child fault template plus the
/// target selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FanOutSpec {
    pub kind: FanOutKind,
    pub fault: FaultSpec,
    /// Pick one target uniformly at random instead of all of them
    #[serde(default)]
    pub random_injection: bool,
    #[serde(default)]
    pub ready_for_child_execution: bool,
}

impl FanOutSpec {
    pub fn new(kind: FanOutKind, fault: FaultSpec) -> Self {
        Self {
            kind,
            fault,
            random_injection: false,
            ready_for_child_execution: false,
        }
    }

    pub fn endpoint_group(endpoints: Vec<EndpointSpec>, fault: FaultSpec) -> Self {
        Self::new(FanOutKind::EndpointGroup { endpoints }, fault)
    }

    pub fn random(mut self, random_injection: bool) -> Self {
        self.random_injection = random_injection;
        self
    }
}
