//! # Fan-Out Trigger
//!
//! Turns one parent task naming a set of targets into one child task per
//! target. The state machine is shared by every flavor; a [`TargetResolver`]
//! supplies target resolution and per-target child derivation.
//!
//! Parent substages: empty → `INITIALISED` → `TRIGGER_CHILD_TASKS`. Children
//! are stored before the parent records `TRIGGER_CHILD_TASKS` and are handed
//! back to the caller in the [`ExecutionOutcome`]; the trigger does not watch
//! them run. Resuming a parent at `TRIGGER_CHILD_TASKS` hands back the stored
//! children that never started.

pub mod endpoint_group;
pub mod kubernetes;
pub mod virtual_infra;

pub use endpoint_group::EndpointGroupResolver;
pub use kubernetes::KubernetesPodResolver;
pub use virtual_infra::VirtualInfraResolver;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use super::selection::TargetSelector;
use super::task_helper::{ExecutionContext, ExecutionOutcome, TaskHelper};
use crate::constants::args;
use crate::error::{ChaosError, Result};
use crate::models::{FanOutSpec, FaultSpec, FaultTarget, Task, TaskPayload};
use crate::state_machine::{TaskStatus, TaskType, TriggerSubstage};

/// Resolution and derivation steps of one fan-out flavor
#[async_trait]
pub trait TargetResolver: Send + Sync {
    type Target: Send + Sync;

    /// Flavor name used in logs and descriptions
    fn flavor(&self) -> &'static str;

    async fn resolve_targets(&self, spec: &FanOutSpec) -> Result<Vec<Self::Target>>;

    /// Key under which the child id is recorded in the parent's child map
    fn target_key(&self, target: &Self::Target) -> String;

    /// Overwrite the target-identifying fields of a child spec
    fn derive_child_spec(&self, template: FaultSpec, target: &Self::Target) -> FaultSpec;
}

/// Copy of the parent's fault definition a child spec starts from.
///
/// Children run immediately when the parent fires, so they never carry the
/// parent's schedule.
pub fn child_template(parent: &FaultSpec) -> FaultSpec {
    let mut template = parent.clone();
    template.schedule = None;
    template
}

/// Drop the child's own address from a network-partition host list
pub fn exclude_own_host(spec: &mut FaultSpec) {
    let own_host = spec.endpoint_host().map(str::to_string);
    if let FaultTarget::NetworkPartition { hosts } = &mut spec.target {
        if let Some(own_host) = own_host {
            hosts.retain(|host| host != &own_host);
        }
        let joined = hosts.join(";");
        spec.args.insert(args::HOSTS.to_string(), joined);
    }
}

pub struct FanOutTrigger<R: TargetResolver> {
    name: String,
    resolver: R,
    selector: Arc<TargetSelector>,
    command_helper: Arc<dyn TaskHelper>,
    agent_helper: Arc<dyn TaskHelper>,
}

impl<R: TargetResolver> FanOutTrigger<R> {
    pub fn new(
        name: impl Into<String>,
        resolver: R,
        selector: Arc<TargetSelector>,
        command_helper: Arc<dyn TaskHelper>,
        agent_helper: Arc<dyn TaskHelper>,
    ) -> Self {
        Self {
            name: name.into(),
            resolver,
            selector,
            command_helper,
            agent_helper,
        }
    }

    pub fn resolver(&self) -> &R {
        &self.resolver
    }

    fn helper_for(&self, spec: &FaultSpec) -> &Arc<dyn TaskHelper> {
        if spec.target.agent().is_some() {
            &self.agent_helper
        } else {
            &self.command_helper
        }
    }

    async fn trigger_child_tasks(&self, task: &mut Task) -> Result<Vec<Task>> {
        let fan_out = task
            .task_data
            .as_fan_out()
            .cloned()
            .ok_or_else(|| ChaosError::validation(format!("task {} is not a fan-out task", task.id)))?;

        let targets = self.resolver.resolve_targets(&fan_out).await?;
        let resolved = targets.len();
        let targets = self.selector.select(targets, fan_out.random_injection);
        info!(
            task_id = %task.id,
            flavor = self.resolver.flavor(),
            resolved,
            selected = targets.len(),
            "Resolved fan-out targets"
        );

        let mut children = Vec::with_capacity(targets.len());
        for (index, target) in targets.iter().enumerate() {
            let key = self.resolver.target_key(target);
            let mut spec = self
                .resolver
                .derive_child_spec(child_template(&fan_out.fault), target);
            exclude_own_host(&mut spec);

            let mut child = self.helper_for(&spec).init(TaskPayload::Single(spec), None)?;
            child.task_name = format!("{}-{}", task.task_name, index + 1);

            task.child_task_ids.push(child.id.clone());
            task.child_task_map.insert(key, child.id.clone());
            children.push(child);
        }

        if let Some(spec) = task.task_data.as_fan_out_mut() {
            spec.ready_for_child_execution = true;
        }
        Ok(children)
    }

    /// Stored children of `task` that were never started, for an execution
    /// resumed after the children were persisted
    async fn unstarted_children(&self, task: &Task, ctx: &ExecutionContext) -> Result<Vec<Task>> {
        let mut children = Vec::new();
        for id in &task.child_task_ids {
            match ctx.load_task(id).await? {
                Some(child) if child.triggers.is_empty() && child.task_status == TaskStatus::Initializing => {
                    children.push(child)
                }
                Some(_) => {}
                None => warn!(task_id = %task.id, child_id = %id, "Child task is missing from the store"),
            }
        }
        Ok(children)
    }
}

#[async_trait]
impl<R: TargetResolver> TaskHelper for FanOutTrigger<R> {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_fan_out(&self) -> bool {
        true
    }

    fn describe(&self, task: &Task) -> String {
        let verb = match task.task_type {
            TaskType::Injection => "Triggering",
            TaskType::Remediation => "Remediating",
        };
        format!(
            "{verb} Fault: {} on {} targets",
            task.fault().fault_name,
            self.resolver.flavor()
        )
    }

    #[instrument(skip(self, task, ctx), fields(task_id = %task.id, flavor = self.resolver.flavor()))]
    async fn execute(&self, task: &mut Task, ctx: &ExecutionContext) -> Result<ExecutionOutcome> {
        let mut children = Vec::new();

        loop {
            match task.substage::<TriggerSubstage>()? {
                None => {
                    task.set_substage(TriggerSubstage::Initialised);
                    ctx.checkpoint(task).await?;
                }
                Some(TriggerSubstage::Initialised) => {
                    match task.task_type {
                        TaskType::Injection => {
                            children = self.trigger_child_tasks(task).await?;
                            for child in &children {
                                ctx.save_task(child).await?;
                            }
                        }
                        TaskType::Remediation => {
                            task.child_task_map.clear();
                            task.remediated = true;
                        }
                    }
                    task.set_substage(TriggerSubstage::TriggerChildTasks);
                    ctx.checkpoint(task).await?;
                }
                Some(TriggerSubstage::TriggerChildTasks) => {
                    if children.is_empty() && task.task_type == TaskType::Injection {
                        children = self.unstarted_children(task, ctx).await?;
                    }
                    break;
                }
                Some(TriggerSubstage::Completed) => break,
            }
        }

        if task.task_type == TaskType::Injection
            && task.child_task_ids.is_empty()
            && task.task_status != TaskStatus::Failed
        {
            warn!(task_id = %task.id, "Fan-out finished without child tasks");
            return Err(ChaosError::InvariantViolated(format!(
                "fan-out task {} produced no child tasks and is not FAILED",
                task.id
            )));
        }

        Ok(ExecutionOutcome::with_children(children))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventPublisher;
    use crate::models::{AgentProperties, EndpointSpec, FanOutSpec};
    use crate::orchestration::capabilities::{AgentFaultCapability, CommandFaultCapability};
    use crate::orchestration::single_task::SingleTaskExecutor;
    use crate::persistence::{InMemoryStore, TaskRepository};
    use crate::test_helpers::{command_fault, RecordingExecutorFactory};
    use crate::execution::{CommandRunner, RetryPolicy};
    use std::collections::BTreeSet;

    fn helpers() -> (Arc<dyn TaskHelper>, Arc<dyn TaskHelper>) {
        let factory = Arc::new(RecordingExecutorFactory::default());
        let command: Arc<dyn TaskHelper> = Arc::new(SingleTaskExecutor::new(
            "command-fault",
            Arc::new(CommandFaultCapability::new(factory.clone())),
            CommandRunner::default(),
            RetryPolicy::default(),
        ));
        let agent: Arc<dyn TaskHelper> = Arc::new(SingleTaskExecutor::new(
            "agent-fault",
            Arc::new(AgentFaultCapability::new(factory)),
            CommandRunner::default(),
            RetryPolicy::default(),
        ));
        (command, agent)
    }

    fn trigger(seed: u64) -> FanOutTrigger<EndpointGroupResolver> {
        let (command, agent) = helpers();
        FanOutTrigger::new(
            "endpoint-group-trigger",
            EndpointGroupResolver,
            Arc::new(TargetSelector::seeded(seed)),
            command,
            agent,
        )
    }

    fn endpoints(count: usize) -> Vec<EndpointSpec> {
        (1..=count)
            .map(|i| EndpointSpec::new(format!("web-{i}"), Some(format!("10.0.0.{i}"))))
            .collect()
    }

    fn context() -> ExecutionContext {
        ExecutionContext::new("node-a", Arc::new(InMemoryStore::new()), EventPublisher::default())
    }

    #[tokio::test]
    async fn test_children_are_stored_before_checkpoint_and_resumed() {
        let trigger = trigger(7);
        let store = Arc::new(InMemoryStore::new());
        let ctx = ExecutionContext::new("node-a", store.clone(), EventPublisher::default());
        let spec = FanOutSpec::endpoint_group(endpoints(3), command_fault("cpu", "group", "0.0.0.0"));
        let mut task = trigger.init(TaskPayload::FanOut(spec), None).unwrap();
        task.transition(crate::state_machine::TaskEvent::Start).unwrap();

        trigger.execute(&mut task, &ctx).await.unwrap();
        let checkpointed = store.load_task(&task.id).await.unwrap().unwrap();
        assert_eq!(checkpointed.task_substage, "TRIGGER_CHILD_TASKS");
        for id in &checkpointed.child_task_ids {
            assert!(store.load_task(id).await.unwrap().is_some());
        }

        let mut started = store.load_task(&task.child_task_ids[0]).await.unwrap().unwrap();
        started.push_trigger("node-a");
        store.save_task(&started).await.unwrap();

        let mut resumed = checkpointed.clone();
        let outcome = trigger.execute(&mut resumed, &ctx).await.unwrap();
        let ids: BTreeSet<String> = outcome.children.iter().map(|c| c.id.clone()).collect();
        let expected: BTreeSet<String> = task.child_task_ids[1..].iter().cloned().collect();
        assert_eq!(ids, expected);
        assert_eq!(resumed.child_task_ids, task.child_task_ids);
    }

    #[tokio::test]
    async fn test_fan_out_creates_one_child_per_endpoint() {
        let trigger = trigger(7);
        let spec = FanOutSpec::endpoint_group(endpoints(3), command_fault("cpu", "group", "0.0.0.0"));
        let mut task = trigger.init(TaskPayload::FanOut(spec), None).unwrap();
        task.transition(crate::state_machine::TaskEvent::Start).unwrap();

        let outcome = trigger.execute(&mut task, &context()).await.unwrap();

        assert_eq!(outcome.children.len(), 3);
        assert_eq!(task.child_task_ids.len(), 3);
        assert_eq!(task.child_task_map.len(), 3);
        assert_eq!(task.task_substage, "TRIGGER_CHILD_TASKS");
        assert!(task.task_data.as_fan_out().unwrap().ready_for_child_execution);

        let endpoints: BTreeSet<_> = outcome
            .children
            .iter()
            .map(|child| child.fault().endpoint_name.clone())
            .collect();
        assert_eq!(endpoints.len(), 3);
        assert_eq!(outcome.children[0].task_name, format!("{}-1", task.task_name));
        assert!(outcome.children.iter().all(|child| child.fault().schedule.is_none()));
    }

    #[tokio::test]
    async fn test_random_injection_picks_one_target() {
        let trigger = trigger(11);
        let spec = FanOutSpec::endpoint_group(endpoints(3), command_fault("cpu", "group", "0.0.0.0"))
            .random(true);
        let mut task = trigger.init(TaskPayload::FanOut(spec), None).unwrap();

        let outcome = trigger.execute(&mut task, &context()).await.unwrap();
        assert_eq!(outcome.children.len(), 1);
        assert_eq!(task.child_task_map.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_group_violates_terminal_invariant() {
        let trigger = trigger(1);
        let spec = FanOutSpec::endpoint_group(Vec::new(), command_fault("cpu", "group", "0.0.0.0"));
        let mut task = trigger.init(TaskPayload::FanOut(spec), None).unwrap();
        task.transition(crate::state_machine::TaskEvent::Start).unwrap();

        let err = trigger.execute(&mut task, &context()).await.unwrap_err();
        assert!(err.is_invariant_violation());
    }

    #[tokio::test]
    async fn test_remediation_short_circuits_resolution() {
        let trigger = trigger(1);
        let spec = FanOutSpec::endpoint_group(endpoints(2), command_fault("cpu", "group", "0.0.0.0"));
        let mut task = trigger
            .init(TaskPayload::FanOut(spec), Some("parent-injection".into()))
            .unwrap();

        let outcome = trigger.execute(&mut task, &context()).await.unwrap();
        assert!(outcome.children.is_empty());
        assert!(task.remediated);
        assert!(task.child_task_map.is_empty());
        assert_eq!(task.task_substage, "TRIGGER_CHILD_TASKS");
    }

    #[tokio::test]
    async fn test_agent_properties_select_agent_helper() {
        let trigger = trigger(1);
        let mut fault = command_fault("cpu", "group", "0.0.0.0");
        fault.target = FaultTarget::ProcessAgent {
            agent: AgentProperties {
                process_id: Some("4242".into()),
                ..Default::default()
            },
        };
        let spec = FanOutSpec::endpoint_group(endpoints(2), fault);
        let mut task = trigger.init(TaskPayload::FanOut(spec), None).unwrap();

        let outcome = trigger.execute(&mut task, &context()).await.unwrap();
        assert!(outcome
            .children
            .iter()
            .all(|child| child.extension_name == "agent-fault"));
    }

    #[tokio::test]
    async fn test_network_partition_children_exclude_themselves() {
        let trigger = trigger(1);
        let mut fault = command_fault("NETWORKPARTITIONFAULT", "group", "0.0.0.0");
        fault.target = FaultTarget::NetworkPartition {
            hosts: vec!["10.0.0.1".into(), "10.0.0.2".into(), "10.0.0.9".into()],
        };
        let spec = FanOutSpec::endpoint_group(endpoints(2), fault);
        let mut task = trigger.init(TaskPayload::FanOut(spec), None).unwrap();

        let outcome = trigger.execute(&mut task, &context()).await.unwrap();
        let first = outcome.children[0].fault();
        assert_eq!(
            first.target,
            FaultTarget::NetworkPartition {
                hosts: vec!["10.0.0.2".into(), "10.0.0.9".into()]
            }
        );
        assert_eq!(first.args[args::HOSTS], "10.0.0.2;10.0.0.9");
    }

    #[test]
    fn test_child_template_drops_schedule() {
        let parent = command_fault("cpu", "web", "10.0.0.1")
            .with_schedule(crate::models::ScheduleInfo::cron("0 0 * * * *"));
        let template = child_template(&parent);
        assert!(template.schedule.is_none());
        assert_eq!(template.injection_commands, parent.injection_commands);
    }
}
