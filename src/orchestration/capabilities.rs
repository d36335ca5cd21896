//! Capabilities shipped with the core: plain commands run on the endpoint and
//! faults delivered through a process agent. Other target families plug in
//! through [`TargetCapability`].

use async_trait::async_trait;
use std::sync::Arc;

use super::capability::TargetCapability;
use crate::constants::args;
use crate::error::{ChaosError, Result};
use crate::execution::{CommandExecutor, ExecutorFactory};
use crate::models::{CommandInfo, FaultSpec, FaultTarget};

pub const AGENT_BINARY: &str = "chaos-agent";
/// Troubleshooting key holding the fault id the agent reported
pub const AGENT_FAULT_ID_PROPERTY: &str = "agentFaultId";

const EMPTY_HOST_LIST: &str =
    "Hostlist is empty or does not have hosts other than the endpoint machine";

/// Faults whose command lists come with the request
pub struct CommandFaultCapability {
    executors: Arc<dyn ExecutorFactory>,
}

impl CommandFaultCapability {
    pub fn new(executors: Arc<dyn ExecutorFactory>) -> Self {
        Self { executors }
    }
}

#[async_trait]
impl TargetCapability for CommandFaultCapability {
    fn family(&self) -> &'static str {
        "endpoint"
    }

    async fn resolve_executor(&self, spec: &FaultSpec) -> Result<Arc<dyn CommandExecutor>> {
        self.executors.executor_for(spec).await
    }

    fn build_injection_commands(&self, spec: &FaultSpec) -> Result<Vec<CommandInfo>> {
        if spec.injection_commands.is_empty() {
            return Err(ChaosError::validation(format!(
                "fault {} has no injection commands",
                spec.fault_name
            )));
        }
        Ok(spec.injection_commands.clone())
    }

    fn build_remediation_commands(&self, spec: &FaultSpec) -> Result<Vec<CommandInfo>> {
        Ok(spec.remediation_commands.clone())
    }

    async fn check_injection_prerequisites(
        &self,
        _executor: &dyn CommandExecutor,
        spec: &FaultSpec,
    ) -> Result<()> {
        if let FaultTarget::NetworkPartition { hosts } = &spec.target {
            let own_host = spec.endpoint_host();
            if hosts.iter().all(|host| Some(host.as_str()) == own_host) {
                return Err(ChaosError::Prerequisite {
                    reason: EMPTY_HOST_LIST.to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Faults injected by an agent attached to a running process
pub struct AgentFaultCapability {
    executors: Arc<dyn ExecutorFactory>,
}

impl AgentFaultCapability {
    pub fn new(executors: Arc<dyn ExecutorFactory>) -> Self {
        Self { executors }
    }

    fn process_selector(spec: &FaultSpec) -> Result<String> {
        let missing = || ChaosError::Prerequisite {
            reason: "agent properties must identify a process".to_string(),
        };
        let agent = spec.target.agent().ok_or_else(missing)?;

        if let Some(pid) = &agent.process_id {
            return Ok(format!("--pid {pid}"));
        }
        agent
            .process_name
            .as_ref()
            .map(|name| format!("--process {name}"))
            .ok_or_else(missing)
    }
}

#[async_trait]
impl TargetCapability for AgentFaultCapability {
    fn family(&self) -> &'static str {
        "process agent"
    }

    async fn resolve_executor(&self, spec: &FaultSpec) -> Result<Arc<dyn CommandExecutor>> {
        self.executors.executor_for(spec).await
    }

    fn build_injection_commands(&self, spec: &FaultSpec) -> Result<Vec<CommandInfo>> {
        let mut command = format!(
            "{AGENT_BINARY} submit --operation inject --faultname {} {} --taskId $FI_ARG_{}",
            spec.fault_name,
            Self::process_selector(spec)?,
            args::TASK_ID
        );
        if let Some(timeout) = spec.timeout_in_milliseconds {
            command.push_str(&format!(" --timeout {timeout}"));
        }
        for (key, value) in spec.args.iter().filter(|(key, _)| key.starts_with("--")) {
            command.push_str(&format!(" {key} {value}"));
        }

        Ok(vec![CommandInfo::new(command)
            .known_failure("process not found", "The target process is not running on the endpoint")
            .extract(r"faultId=(\S+)", AGENT_FAULT_ID_PROPERTY)])
    }

    fn build_remediation_commands(&self, _spec: &FaultSpec) -> Result<Vec<CommandInfo>> {
        Ok(vec![CommandInfo::new(format!(
            "{AGENT_BINARY} submit --operation remediate --faultId $FI_ADD_INFO_{AGENT_FAULT_ID_PROPERTY}"
        ))
        .known_failure("already remediated", "The fault was already remediated")])
    }

    async fn check_injection_prerequisites(
        &self,
        executor: &dyn CommandExecutor,
        spec: &FaultSpec,
    ) -> Result<()> {
        Self::process_selector(spec)?;
        let status = executor.run(&format!("{AGENT_BINARY} status")).await?;
        if status.exit_code != 0 {
            return Err(ChaosError::Prerequisite {
                reason: format!("agent is not reachable on {}: {}", spec.target_identifier(), status.output),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AgentProperties, EndpointSpec};
    use crate::test_helpers::{RecordingExecutor, RecordingExecutorFactory};

    fn agent_spec() -> FaultSpec {
        FaultSpec::new(
            "cpu",
            "web",
            FaultTarget::ProcessAgent {
                agent: AgentProperties {
                    process_name: Some("java".into()),
                    ..Default::default()
                },
            },
        )
        .with_arg("--load", "80")
    }

    #[test]
    fn test_agent_commands_reference_task_id_and_fault_id() {
        let capability = AgentFaultCapability::new(Arc::new(RecordingExecutorFactory::default()));
        let mut spec = agent_spec();
        spec.timeout_in_milliseconds = Some(60_000);

        let injection = capability.build_injection_commands(&spec).unwrap();
        assert_eq!(injection.len(), 1);
        assert_eq!(
            injection[0].command,
            "chaos-agent submit --operation inject --faultname cpu --process java --taskId $FI_ARG_id --timeout 60000 --load 80"
        );
        assert_eq!(
            injection[0].command_output_processing_info[0].property_name,
            AGENT_FAULT_ID_PROPERTY
        );

        let remediation = capability.build_remediation_commands(&spec).unwrap();
        assert!(remediation[0].command.ends_with("$FI_ADD_INFO_agentFaultId"));
    }

    #[tokio::test]
    async fn test_agent_prerequisites() {
        let capability = AgentFaultCapability::new(Arc::new(RecordingExecutorFactory::default()));
        let executor = RecordingExecutor::new()
            .respond("chaos-agent status", crate::models::CommandResult::failure(1, "down"));

        let err = capability
            .check_injection_prerequisites(&executor, &agent_spec())
            .await
            .unwrap_err();
        assert!(matches!(err, ChaosError::Prerequisite { .. }));

        let no_process = FaultSpec::new(
            "cpu",
            "web",
            FaultTarget::ProcessAgent {
                agent: AgentProperties::default(),
            },
        );
        assert!(capability.build_injection_commands(&no_process).is_err());
    }

    #[tokio::test]
    async fn test_network_partition_requires_other_hosts() {
        let capability = CommandFaultCapability::new(Arc::new(RecordingExecutorFactory::default()));
        let executor = RecordingExecutor::new();
        let spec = FaultSpec::new(
            "NETWORKPARTITIONFAULT",
            "web",
            FaultTarget::NetworkPartition {
                hosts: vec!["10.0.0.1".into()],
            },
        )
        .with_endpoint(EndpointSpec::new("web", Some("10.0.0.1".into())));

        let err = capability
            .check_injection_prerequisites(&executor, &spec)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ChaosError::Prerequisite {
                reason: EMPTY_HOST_LIST.to_string()
            }
        );
    }
}
