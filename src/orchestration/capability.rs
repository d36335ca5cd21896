//! Target capabilities.
//!
//! Every target family implements [`TargetCapability`] once; the single-task
//! executor drives the injection and remediation lifecycle through it.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::error::Result;
use crate::execution::CommandExecutor;
use crate::models::{CommandInfo, FaultSpec, SupportScript, Task};
use crate::state_machine::TaskType;

#[async_trait]
pub trait TargetCapability: Send + Sync {
    fn family(&self) -> &'static str;

    async fn resolve_executor(&self, spec: &FaultSpec) -> Result<Arc<dyn CommandExecutor>>;

    fn build_injection_commands(&self, spec: &FaultSpec) -> Result<Vec<CommandInfo>>;

    fn build_remediation_commands(&self, spec: &FaultSpec) -> Result<Vec<CommandInfo>>;

    async fn check_injection_prerequisites(
        &self,
        _executor: &dyn CommandExecutor,
        _spec: &FaultSpec,
    ) -> Result<()> {
        Ok(())
    }

    async fn check_remediation_prerequisites(
        &self,
        _executor: &dyn CommandExecutor,
        _spec: &FaultSpec,
    ) -> Result<()> {
        Ok(())
    }

    async fn check_task_specific_prerequisites(&self, _task: &Task) -> Result<()> {
        Ok(())
    }

    fn list_support_scripts(&self, spec: &FaultSpec) -> Vec<SupportScript> {
        spec.support_scripts.clone()
    }

    /// Stage support scripts on the target, skipping the ones already present
    async fn prepare_endpoint(
        &self,
        executor: &dyn CommandExecutor,
        scripts: &[SupportScript],
    ) -> Result<()> {
        for script in scripts {
            let path = script.target_path();
            if executor.file_exists(&path).await? {
                debug!(path = %path, "Support script already staged");
                continue;
            }
            executor.copy_file(&script.name, &path).await?;
            if script.executable {
                executor.run(&format!("chmod u+x {path}")).await?;
            }
        }
        Ok(())
    }

    fn describe(&self, task: &Task) -> String {
        let fault = task.fault();
        let verb = match task.task_type {
            TaskType::Injection => "Executing Fault",
            TaskType::Remediation => "Remediating Fault",
        };
        format!(
            "{verb}: {} on {}: {}",
            fault.fault_name,
            self.family(),
            fault.target_identifier()
        )
    }
}
