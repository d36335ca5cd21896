//! Fault specifications.
//!
//! A [`FaultSpec`] carries the fields every fault shares plus a tagged
//! [`FaultTarget`] naming the target family. The tag drives
//! (de)serialization and capability lookup.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::command::{CommandInfo, SupportScript};
use super::schedule::ScheduleInfo;

/// A remote machine or platform endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointSpec {
    pub name: String,
    /// Address of the machine when the endpoint is a single host
    pub host: Option<String>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl EndpointSpec {
    pub fn new(name: impl Into<String>, host: Option<String>) -> Self {
        Self {
            name: name.into(),
            host,
            tags: BTreeMap::new(),
        }
    }
}

/// Properties identifying the process an agent attaches to
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentProperties {
    pub process_name: Option<String>,
    pub process_id: Option<String>,
    pub agent_port: Option<u16>,
    pub user: Option<String>,
}

impl AgentProperties {
    /// Enough information to attach to a process
    pub fn identifies_process(&self) -> bool {
        self.process_name.is_some() || self.process_id.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KubernetesArguments {
    #[serde(default)]
    pub pod_labels: BTreeMap<String, String>,
    pub container_name: Option<String>,
    #[serde(default)]
    pub enable_random_injection: bool,
    /// Set on child specs, the pod this child acts on
    pub pod_in_action: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VmFaultKind {
    /// Power state changes (power off, suspend, reset)
    State,
    Nic,
    Disk,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmArguments {
    pub kind: VmFaultKind,
    /// Optional name filter applied to the inventory query
    pub vm_name: Option<String>,
    /// Set on child specs
    pub vm_id: Option<String>,
    pub nic_id: Option<String>,
    pub disk_id: Option<String>,
    #[serde(default)]
    pub filters: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostArguments {
    /// Optional name filter applied to the inventory query
    pub host_name: Option<String>,
    #[serde(default)]
    pub filters: BTreeMap<String, String>,
}

/// Target family of a fault
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "target_type", rename_all = "snake_case")]
pub enum FaultTarget {
    /// Plain command run on the endpoint machine
    Command,
    /// Fault delivered through an agent attached to a process
    ProcessAgent { agent: AgentProperties },
    Container { container_name: String },
    KubernetesPod(KubernetesArguments),
    VirtualMachine(VmArguments),
    Host(HostArguments),
    CloudInstance { instance_ids: Vec<String> },
    ManagedDatabase { db_identifiers: Vec<String> },
    /// Block traffic between the endpoint machine and `hosts`
    NetworkPartition { hosts: Vec<String> },
}

impl FaultTarget {
    pub fn family(&self) -> &'static str {
        match self {
            Self::Command => "command",
            Self::ProcessAgent { .. } => "process_agent",
            Self::Container { .. } => "container",
            Self::KubernetesPod(_) => "kubernetes_pod",
            Self::VirtualMachine(_) => "virtual_machine",
            Self::Host(_) => "host",
            Self::CloudInstance { .. } => "cloud_instance",
            Self::ManagedDatabase { .. } => "managed_database",
            Self::NetworkPartition { .. } => "network_partition",
        }
    }

    /// Agent properties, when the fault is delivered through a process agent
    pub fn agent(&self) -> Option<&AgentProperties> {
        match self {
            Self::ProcessAgent { agent } if agent.identifies_process() => Some(agent),
            _ => None,
        }
    }
}

/// Declarative description of what to break and where
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaultSpec {
    pub fault_name: String,
    pub endpoint_name: String,
    pub endpoint: Option<EndpointSpec>,
    /// Name of the credential set used to reach the endpoint
    pub credentials: Option<String>,
    #[serde(default)]
    pub args: BTreeMap<String, String>,
    pub timeout_in_milliseconds: Option<u64>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub notifier_names: Vec<String>,
    pub injection_home_dir: Option<String>,
    pub schedule: Option<ScheduleInfo>,
    #[serde(default)]
    pub injection_commands: Vec<CommandInfo>,
    #[serde(default)]
    pub remediation_commands: Vec<CommandInfo>,
    /// Run after remediation to remove staged artifacts
    #[serde(default)]
    pub cleanup_commands: Vec<CommandInfo>,
    #[serde(default)]
    pub support_scripts: Vec<SupportScript>,
    pub target: FaultTarget,
}

impl FaultSpec {
    pub fn new(
        fault_name: impl Into<String>,
        endpoint_name: impl Into<String>,
        target: FaultTarget,
    ) -> Self {
        Self {
            fault_name: fault_name.into(),
            endpoint_name: endpoint_name.into(),
            endpoint: None,
            credentials: None,
            args: BTreeMap::new(),
            timeout_in_milliseconds: None,
            tags: BTreeMap::new(),
            notifier_names: Vec::new(),
            injection_home_dir: None,
            schedule: None,
            injection_commands: Vec::new(),
            remediation_commands: Vec::new(),
            cleanup_commands: Vec::new(),
            support_scripts: Vec::new(),
            target,
        }
    }

    /// Plain command fault against a single endpoint
    pub fn command(fault_name: impl Into<String>, endpoint_name: impl Into<String>) -> Self {
        Self::new(fault_name, endpoint_name, FaultTarget::Command)
    }

    pub fn with_endpoint(mut self, endpoint: EndpointSpec) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }

    pub fn with_schedule(mut self, schedule: ScheduleInfo) -> Self {
        self.schedule = Some(schedule);
        self
    }

    pub fn endpoint_host(&self) -> Option<&str> {
        self.endpoint.as_ref().and_then(|e| e.host.as_deref())
    }

    pub fn is_network_partition(&self) -> bool {
        matches!(self.target, FaultTarget::NetworkPartition { .. })
    }

    /// Identifier of the concrete target, used in task descriptions
    pub fn target_identifier(&self) -> String {
        match &self.target {
            FaultTarget::KubernetesPod(args) => args
                .pod_in_action
                .clone()
                .unwrap_or_else(|| self.endpoint_name.clone()),
            FaultTarget::VirtualMachine(args) => args
                .vm_id
                .clone()
                .or_else(|| args.vm_name.clone())
                .unwrap_or_else(|| self.endpoint_name.clone()),
            FaultTarget::Host(args) => args
                .host_name
                .clone()
                .unwrap_or_else(|| self.endpoint_name.clone()),
            FaultTarget::Container { container_name } => {
                format!("{}/{container_name}", self.endpoint_name)
            }
            _ => self
                .endpoint
                .as_ref()
                .map(|e| e.name.clone())
                .unwrap_or_else(|| self.endpoint_name.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_tag_serialization() {
        let spec = FaultSpec::new(
            "NETWORKPARTITIONFAULT",
            "group",
            FaultTarget::NetworkPartition {
                hosts: vec!["10.0.0.1".into(), "10.0.0.2".into()],
            },
        );
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["target"]["target_type"], "network_partition");
        assert!(spec.is_network_partition());

        let parsed: FaultSpec = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, spec);
    }

    #[test]
    fn test_agent_requires_process_identity() {
        let target = FaultTarget::ProcessAgent {
            agent: AgentProperties::default(),
        };
        assert!(target.agent().is_none());

        let target = FaultTarget::ProcessAgent {
            agent: AgentProperties {
                process_name: Some("java".into()),
                ..Default::default()
            },
        };
        assert!(target.agent().is_some());
        assert!(FaultTarget::Command.agent().is_none());
    }

    #[test]
    fn test_target_identifier_prefers_concrete_target() {
        let spec = FaultSpec::command("cpu", "group")
            .with_endpoint(EndpointSpec::new("web-1", Some("10.0.0.5".into())));
        assert_eq!(spec.target_identifier(), "web-1");
        assert_eq!(spec.endpoint_host(), Some("10.0.0.5"));

        let pod = FaultSpec::new(
            "cpu",
            "k8s",
            FaultTarget::KubernetesPod(KubernetesArguments {
                pod_in_action: Some("web-7f9".into()),
                ..Default::default()
            }),
        );
        assert_eq!(pod.target_identifier(), "web-7f9");
    }
}
