//! # Node Bootstrap
//!
//! Assembles one cluster node from a [`ChaosConfig`] and its external
//! collaborators: helper registry, task runner, scheduler, coordinator and
//! the quorum gate in front of every inbound operation.
//!
//! ```rust,no_run
//! use chaos_core::bootstrap::{ChaosNode, LocalCluster};
//! use chaos_core::config::ChaosConfig;
//! use chaos_core::test_helpers::{RecordingExecutorFactory, StaticInventory};
//! use std::sync::Arc;
//!
//! # async fn example() -> chaos_core::Result<()> {
//! let cluster = LocalCluster::new();
//! cluster.membership().join("10.0.0.1")?;
//! let deps = cluster.dependencies(
//!     Arc::new(RecordingExecutorFactory::default()),
//!     Arc::new(StaticInventory::new()),
//! );
//! let mut node = ChaosNode::bootstrap(&ChaosConfig::for_node("10.0.0.1"), deps)?;
//! node.start().await?;
//! node.shutdown().await;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::cluster::{
    ClusterCoordinator, ClusterEventBus, CoordinatorServices, InMemoryEventBus, InMemoryMembership,
    InMemoryWorkMap, MembershipProvider, QuorumGuard, QuorumState, RequestKind, WorkAnnouncementMap,
};
use crate::config::ChaosConfig;
use crate::constants::helpers;
use crate::error::{ChaosError, Result};
use crate::events::EventPublisher;
use crate::execution::{CommandRunner, ExecutorFactory, RetryPolicy};
use crate::models::{NodeStatus, SchedulerSpec, Task, TaskPayload};
use crate::orchestration::{
    AgentFaultCapability, CommandFaultCapability, EndpointGroupResolver, FanOutTrigger, HelperRegistry,
    KubernetesPodResolver, SingleTaskExecutor, TargetInventory, TargetSelector, TaskHelper, TaskRunner,
    TaskScheduling, VirtualInfraResolver,
};
use crate::persistence::{
    ClusterConfigRepository, DeletionService, InMemoryStore, RepositoryDeletionService, ScheduleRepository,
    TaskRepository,
};
use crate::scheduler::Scheduler;

/// External collaborators of one node
#[derive(Clone)]
pub struct NodeDependencies {
    pub executors: Arc<dyn ExecutorFactory>,
    pub inventory: Arc<dyn TargetInventory>,
    pub membership: Arc<dyn MembershipProvider>,
    pub bus: Arc<dyn ClusterEventBus>,
    pub work_map: Arc<dyn WorkAnnouncementMap>,
    pub tasks: Arc<dyn TaskRepository>,
    pub schedules: Arc<dyn ScheduleRepository>,
    pub cluster_configs: Arc<dyn ClusterConfigRepository>,
    pub deletion: Arc<dyn DeletionService>,
    pub selector: Arc<TargetSelector>,
}

/// Shared bus, membership, work map and store for nodes living in one process
#[derive(Clone)]
pub struct LocalCluster {
    bus: Arc<InMemoryEventBus>,
    membership: Arc<InMemoryMembership>,
    work_map: Arc<InMemoryWorkMap>,
    store: Arc<InMemoryStore>,
    selector: Arc<TargetSelector>,
}

impl LocalCluster {
    pub fn new() -> Self {
        Self::with_selector(TargetSelector::from_entropy())
    }

    /// Cluster whose random target choices are reproducible
    pub fn with_selector(selector: TargetSelector) -> Self {
        let bus = Arc::new(InMemoryEventBus::default());
        Self {
            membership: Arc::new(InMemoryMembership::new(bus.clone())),
            work_map: Arc::new(InMemoryWorkMap::new(bus.clone())),
            store: Arc::new(InMemoryStore::new()),
            selector: Arc::new(selector),
            bus,
        }
    }

    pub fn bus(&self) -> &Arc<InMemoryEventBus> {
        &self.bus
    }

    pub fn membership(&self) -> &Arc<InMemoryMembership> {
        &self.membership
    }

    pub fn work_map(&self) -> &Arc<InMemoryWorkMap> {
        &self.work_map
    }

    pub fn store(&self) -> &Arc<InMemoryStore> {
        &self.store
    }

    /// Dependencies for a node; its membership view is bound at bootstrap
    pub fn dependencies(
        &self,
        executors: Arc<dyn ExecutorFactory>,
        inventory: Arc<dyn TargetInventory>,
    ) -> LocalNodeDependencies {
        LocalNodeDependencies {
            cluster: self.clone(),
            executors,
            inventory,
        }
    }
}

impl Default for LocalCluster {
    fn default() -> Self {
        Self::new()
    }
}

/// [`NodeDependencies`] still waiting for the node id
pub struct LocalNodeDependencies {
    cluster: LocalCluster,
    executors: Arc<dyn ExecutorFactory>,
    inventory: Arc<dyn TargetInventory>,
}

impl LocalNodeDependencies {
    pub fn for_node(self, node_id: &str) -> NodeDependencies {
        let store = self.cluster.store.clone();
        NodeDependencies {
            executors: self.executors,
            inventory: self.inventory,
            membership: Arc::new(self.cluster.membership.view(node_id)),
            bus: self.cluster.bus.clone(),
            work_map: self.cluster.work_map.clone(),
            tasks: store.clone(),
            schedules: store.clone(),
            cluster_configs: store.clone(),
            deletion: Arc::new(RepositoryDeletionService::new(store.clone(), store)),
            selector: self.cluster.selector.clone(),
        }
    }
}

/// Accepted by [`ChaosNode::bootstrap`]
pub trait IntoNodeDependencies {
    fn into_dependencies(self, node_id: &str) -> NodeDependencies;
}

impl IntoNodeDependencies for NodeDependencies {
    fn into_dependencies(self, _node_id: &str) -> NodeDependencies {
        self
    }
}

impl IntoNodeDependencies for LocalNodeDependencies {
    fn into_dependencies(self, node_id: &str) -> NodeDependencies {
        self.for_node(node_id)
    }
}

/// Register the single-target executors and the three fan-out triggers
pub fn build_registry(config: &ChaosConfig, deps: &NodeDependencies) -> Arc<HelperRegistry> {
    let retry = RetryPolicy::from_config(&config.execution);
    let runner = CommandRunner::from_config(&config.execution);

    let command: Arc<dyn TaskHelper> = Arc::new(SingleTaskExecutor::new(
        helpers::COMMAND_FAULT,
        Arc::new(CommandFaultCapability::new(deps.executors.clone())),
        runner.clone(),
        retry,
    ));
    let agent: Arc<dyn TaskHelper> = Arc::new(SingleTaskExecutor::new(
        helpers::AGENT_FAULT,
        Arc::new(AgentFaultCapability::new(deps.executors.clone())),
        runner,
        retry,
    ));

    let registry = Arc::new(HelperRegistry::new());
    registry.register(Arc::new(FanOutTrigger::new(
        helpers::ENDPOINT_GROUP_TRIGGER,
        EndpointGroupResolver,
        deps.selector.clone(),
        command.clone(),
        agent.clone(),
    )));
    registry.register(Arc::new(FanOutTrigger::new(
        helpers::KUBERNETES_TRIGGER,
        KubernetesPodResolver::new(deps.inventory.clone()),
        deps.selector.clone(),
        command.clone(),
        agent.clone(),
    )));
    registry.register(Arc::new(FanOutTrigger::new(
        helpers::VIRTUAL_INFRA_TRIGGER,
        VirtualInfraResolver::new(deps.inventory.clone()),
        deps.selector.clone(),
        command.clone(),
        agent.clone(),
    )));
    registry.register(command);
    registry.register(agent);
    registry
}

/// Handle for one running cluster node
pub struct ChaosNode {
    node_id: String,
    registry: Arc<HelperRegistry>,
    tasks: Arc<dyn TaskRepository>,
    runner: Arc<TaskRunner>,
    scheduler: Arc<Scheduler>,
    coordinator: Arc<ClusterCoordinator>,
    guard: QuorumGuard,
    events: EventPublisher,
    event_loop: Option<JoinHandle<()>>,
}

impl ChaosNode {
    pub fn bootstrap(config: &ChaosConfig, deps: impl IntoNodeDependencies) -> Result<Self> {
        config.validate()?;
        let node_id = config.cluster.node_id.clone();
        let deps = deps.into_dependencies(&node_id);

        let events = EventPublisher::new(config.events.channel_capacity);
        let registry = build_registry(config, &deps);
        let runner = Arc::new(
            TaskRunner::new(
                node_id.clone(),
                registry.clone(),
                deps.tasks.clone(),
                events.clone(),
                &config.execution,
            )
            .with_work_map(deps.work_map.clone()),
        );
        let scheduler = Arc::new(
            Scheduler::new(
                node_id.clone(),
                deps.tasks.clone(),
                deps.schedules.clone(),
                deps.deletion.clone(),
                runner.clone(),
                deps.bus.clone(),
                events.clone(),
                &config.scheduler,
            )
            .with_work_map(deps.work_map.clone()),
        );
        let scheduling: Arc<dyn TaskScheduling> = scheduler.clone();
        runner.attach_scheduler(Arc::downgrade(&scheduling));

        let quorum = Arc::new(QuorumState::new(config.cluster.quorum, deps.membership.members().len()));
        let guard = QuorumGuard::new(node_id.clone(), quorum.clone());
        let services = CoordinatorServices {
            membership: deps.membership.clone(),
            quorum,
            cluster_configs: deps.cluster_configs.clone(),
            tasks: deps.tasks.clone(),
            schedules: deps.schedules.clone(),
            work_map: deps.work_map.clone(),
            bus: deps.bus.clone(),
        };
        let coordinator = Arc::new(ClusterCoordinator::new(
            services,
            scheduler.clone(),
            runner.clone(),
            config.cluster.clone(),
        ));

        info!(node = %node_id, helpers = ?registry.names(), "Chaos node assembled");
        Ok(Self {
            node_id,
            registry,
            tasks: deps.tasks,
            runner,
            scheduler,
            coordinator,
            guard,
            events,
            event_loop: None,
        })
    }

    /// Start reacting to cluster events, running leader recovery if needed
    pub async fn start(&mut self) -> Result<()> {
        if self.event_loop.is_some() {
            warn!(node = %self.node_id, "Chaos node already started");
            return Ok(());
        }
        self.event_loop = Some(self.coordinator.start().await?);
        info!(node = %self.node_id, "Chaos node started");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.event_loop.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Stop the event loop and every live timer. Persisted state is kept.
    pub async fn shutdown(&mut self) {
        if let Some(handle) = self.event_loop.take() {
            handle.abort();
        }
        self.scheduler.shutdown().await;
        info!(node = %self.node_id, "Chaos node stopped");
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn registry(&self) -> &Arc<HelperRegistry> {
        &self.registry
    }

    pub fn runner(&self) -> &Arc<TaskRunner> {
        &self.runner
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn coordinator(&self) -> &Arc<ClusterCoordinator> {
        &self.coordinator
    }

    pub fn guard(&self) -> &QuorumGuard {
        &self.guard
    }

    pub fn events(&self) -> &EventPublisher {
        &self.events
    }

    pub fn set_node_status(&self, status: NodeStatus) {
        self.runner.set_node_status(status);
    }

    /// Create a task for `payload` with the named helper without running it
    pub fn create_task(&self, helper: &str, payload: TaskPayload, injection_task_id: Option<String>) -> Result<Task> {
        self.registry.get(helper)?.init(payload, injection_task_id)
    }

    /// Create and submit a fault. Scheduled faults are armed instead of run.
    pub async fn submit_fault(&self, helper: &str, payload: TaskPayload) -> Result<Task> {
        self.guard.authorize("submit-fault", RequestKind::Mutating)?;
        let task = self.create_task(helper, payload, None)?;
        self.runner.submit(task).await
    }

    /// Create and run the remediation of a previous injection task
    pub async fn remediate(&self, injection_task_id: &str) -> Result<Task> {
        self.guard.authorize("remediate-fault", RequestKind::Mutating)?;
        let injection = self.get_task(injection_task_id).await?;
        let mut payload = injection.task_data.clone();
        payload.fault_mut().schedule = None;
        let task = self.create_task(&injection.extension_name, payload, Some(injection.id))?;
        self.runner.submit(task).await
    }

    pub async fn get_task(&self, id: &str) -> Result<Task> {
        self.guard.authorize("get-task", RequestKind::Read)?;
        self.tasks
            .load_task(id)
            .await?
            .ok_or_else(|| ChaosError::TaskNotFound { id: id.to_string() })
    }

    pub async fn schedule_cron(&self, task: Task, cron_expression: &str) -> Result<Task> {
        self.guard.authorize("schedule", RequestKind::Mutating)?;
        self.scheduler.schedule_cron(task, cron_expression).await
    }

    pub async fn schedule_once(&self, task: Task, time_in_millis: i64) -> Result<Task> {
        self.guard.authorize("schedule", RequestKind::Mutating)?;
        self.scheduler.schedule_once(task, time_in_millis).await
    }

    pub async fn pause_schedules(&self, ids: &[String]) -> Result<()> {
        self.guard.authorize("pause-schedules", RequestKind::Mutating)?;
        self.scheduler.pause(ids).await
    }

    pub async fn cancel_schedules(&self, ids: &[String]) -> Result<()> {
        self.guard.authorize("cancel-schedules", RequestKind::Mutating)?;
        self.scheduler.cancel(ids).await
    }

    pub async fn resume_schedules(&self, ids: &[String]) -> Result<()> {
        self.guard.authorize("resume-schedules", RequestKind::Mutating)?;
        self.scheduler.resume(ids).await
    }

    pub async fn delete_schedules(&self, ids: &[String], also_delete_tasks: bool) -> Result<()> {
        self.guard.authorize("delete-schedules", RequestKind::Mutating)?;
        self.scheduler.delete(ids, also_delete_tasks).await
    }

    pub async fn get_schedule(&self, id: &str) -> Result<SchedulerSpec> {
        self.guard.authorize("get-schedule", RequestKind::Read)?;
        self.scheduler.get_schedule(id).await
    }
}
