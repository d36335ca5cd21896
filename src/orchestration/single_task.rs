//! # Single-Task Executor
//!
//! Drives one task through injection or remediation against one concrete
//! target. Progress is checkpointed in the task's substage so a resumed task
//! skips the steps it already completed. The cursor names the last step that
//! finished.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use super::capability::TargetCapability;
use super::task_helper::{ExecutionContext, ExecutionOutcome, TaskHelper};
use crate::constants::args;
use crate::error::{ChaosError, Result};
use crate::execution::{CommandExecutor, CommandRunner, RetryPolicy};
use crate::models::{FaultSpec, Task, TaskPayload};
use crate::state_machine::{CommandSubstage, TaskType};

pub struct SingleTaskExecutor {
    name: String,
    capability: Arc<dyn TargetCapability>,
    runner: CommandRunner,
    retry: RetryPolicy,
}

impl SingleTaskExecutor {
    pub fn new(
        name: impl Into<String>,
        capability: Arc<dyn TargetCapability>,
        runner: CommandRunner,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            name: name.into(),
            capability,
            runner,
            retry,
        }
    }

    fn spec_mut(task: &mut Task) -> Result<&mut FaultSpec> {
        match &mut task.task_data {
            TaskPayload::Single(spec) => Ok(spec),
            TaskPayload::FanOut(_) => Err(ChaosError::validation(format!(
                "task {} carries a fan-out payload",
                task.id
            ))),
        }
    }

    async fn resolve_executor(&self, spec: &FaultSpec) -> Result<Arc<dyn CommandExecutor>> {
        let capability = self.capability.as_ref();
        self.retry
            .run("resolve_executor", move || capability.resolve_executor(spec))
            .await
    }

    async fn advance(
        task: &mut Task,
        ctx: &ExecutionContext,
        substage: CommandSubstage,
    ) -> Result<()> {
        task.set_substage(substage);
        ctx.checkpoint(task).await
    }

    async fn run_injection(&self, task: &mut Task, ctx: &ExecutionContext) -> Result<()> {
        let mut executor: Option<Arc<dyn CommandExecutor>> = None;

        loop {
            match task.substage::<CommandSubstage>()? {
                None => {
                    let task_id = task.id.clone();
                    let spec = Self::spec_mut(task)?;
                    if spec.injection_commands.is_empty() {
                        spec.injection_commands = self.capability.build_injection_commands(spec)?;
                    }
                    if spec.remediation_commands.is_empty() {
                        spec.remediation_commands =
                            self.capability.build_remediation_commands(spec)?;
                    }
                    spec.args.insert(args::TASK_ID.to_string(), task_id);
                    Self::advance(task, ctx, CommandSubstage::Initialised).await?;
                }
                Some(CommandSubstage::Initialised) => {
                    self.capability.check_task_specific_prerequisites(task).await?;
                    let resolved = self.resolve_executor(task.fault()).await?;
                    self.capability
                        .check_injection_prerequisites(resolved.as_ref(), task.fault())
                        .await?;
                    executor = Some(resolved);
                    Self::advance(task, ctx, CommandSubstage::PrerequisitesCheck).await?;
                }
                Some(CommandSubstage::PrerequisitesCheck) => {
                    let resolved = self.executor_or_resolve(&mut executor, task.fault()).await?;
                    let scripts = self.capability.list_support_scripts(task.fault());
                    if let Err(e) = self
                        .capability
                        .prepare_endpoint(resolved.as_ref(), &scripts)
                        .await
                    {
                        warn!(task_id = %task.id, error = %e, "Staging support scripts failed");
                    }
                    Self::advance(task, ctx, CommandSubstage::PrepareTargetMachine).await?;
                }
                Some(CommandSubstage::PrepareTargetMachine) => {
                    let resolved = self.executor_or_resolve(&mut executor, task.fault()).await?;
                    let spec = task.task_data.fault().clone();
                    self.runner
                        .run_commands(
                            resolved.as_ref(),
                            &spec.injection_commands,
                            &mut task.troubleshooting,
                            &spec.args,
                        )
                        .await?;
                    Self::advance(task, ctx, CommandSubstage::TriggerInjection).await?;
                }
                Some(CommandSubstage::TriggerInjection) => {
                    Self::advance(task, ctx, CommandSubstage::Completed).await?;
                }
                Some(CommandSubstage::Completed) => return Ok(()),
                Some(other) => {
                    return Err(ChaosError::Internal(format!(
                        "injection task {} is in remediation substage {other}",
                        task.id
                    )))
                }
            }
        }
    }

    async fn run_remediation(&self, task: &mut Task, ctx: &ExecutionContext) -> Result<()> {
        let mut executor: Option<Arc<dyn CommandExecutor>> = None;

        loop {
            match task.substage::<CommandSubstage>()? {
                None => {
                    let spec = Self::spec_mut(task)?;
                    if spec.remediation_commands.is_empty() {
                        spec.remediation_commands =
                            self.capability.build_remediation_commands(spec)?;
                    }
                    Self::advance(task, ctx, CommandSubstage::Initialised).await?;
                }
                Some(CommandSubstage::Initialised) => {
                    let resolved = self.resolve_executor(task.fault()).await?;
                    self.capability
                        .check_remediation_prerequisites(resolved.as_ref(), task.fault())
                        .await?;
                    executor = Some(resolved);
                    Self::advance(task, ctx, CommandSubstage::RemediationPrerequisitesCheck)
                        .await?;
                }
                Some(CommandSubstage::RemediationPrerequisitesCheck) => {
                    let resolved = self.executor_or_resolve(&mut executor, task.fault()).await?;
                    let spec = task.task_data.fault().clone();
                    self.run_best_effort(resolved.as_ref(), &spec, &spec.remediation_commands, task)
                        .await;
                    Self::advance(task, ctx, CommandSubstage::TriggerRemediation).await?;
                }
                Some(CommandSubstage::TriggerRemediation) => {
                    let resolved = self.executor_or_resolve(&mut executor, task.fault()).await?;
                    let spec = task.task_data.fault().clone();
                    self.run_best_effort(resolved.as_ref(), &spec, &spec.cleanup_commands, task)
                        .await;
                    Self::advance(task, ctx, CommandSubstage::CleanupExecutionInfo).await?;
                }
                Some(CommandSubstage::CleanupExecutionInfo) => {
                    task.remediated = true;
                    Self::advance(task, ctx, CommandSubstage::Completed).await?;
                }
                Some(CommandSubstage::Completed) => return Ok(()),
                Some(other) => {
                    return Err(ChaosError::Internal(format!(
                        "remediation task {} is in injection substage {other}",
                        task.id
                    )))
                }
            }
        }
    }

    async fn executor_or_resolve(
        &self,
        cached: &mut Option<Arc<dyn CommandExecutor>>,
        spec: &FaultSpec,
    ) -> Result<Arc<dyn CommandExecutor>> {
        if let Some(executor) = cached {
            return Ok(executor.clone());
        }
        let executor = self.resolve_executor(spec).await?;
        *cached = Some(executor.clone());
        Ok(executor)
    }

    /// Run every command even when earlier ones fail, recording failures
    async fn run_best_effort(
        &self,
        executor: &dyn CommandExecutor,
        spec: &FaultSpec,
        commands: &[crate::models::CommandInfo],
        task: &mut Task,
    ) {
        let mut failures = Vec::new();
        for command in commands {
            if let Err(e) = self
                .runner
                .run_commands(
                    executor,
                    std::slice::from_ref(command),
                    &mut task.troubleshooting,
                    &spec.args,
                )
                .await
            {
                warn!(task_id = %task.id, command = %command.command, error = %e, "Remediation command failed");
                failures.push(e.to_string());
            }
        }

        if !failures.is_empty() {
            let entry = task
                .troubleshooting
                .additional_info
                .entry(args::REMEDIATION_FAILURES.to_string())
                .or_default();
            if !entry.is_empty() {
                entry.push_str("; ");
            }
            entry.push_str(&failures.join("; "));
        }
    }
}

#[async_trait]
impl TaskHelper for SingleTaskExecutor {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_fan_out(&self) -> bool {
        false
    }

    fn describe(&self, task: &Task) -> String {
        self.capability.describe(task)
    }

    #[instrument(skip(self, task, ctx), fields(task_id = %task.id, task_type = %task.task_type))]
    async fn execute(&self, task: &mut Task, ctx: &ExecutionContext) -> Result<ExecutionOutcome> {
        match task.task_type {
            TaskType::Injection => self.run_injection(task, ctx).await?,
            TaskType::Remediation => self.run_remediation(task, ctx).await?,
        }
        info!(task_id = %task.id, "Task execution finished");
        Ok(ExecutionOutcome::default())
    }
}
