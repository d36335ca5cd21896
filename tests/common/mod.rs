//! Shared fixtures for the integration suites: in-process clusters of
//! [`ChaosNode`]s backed by scripted executors.

#![allow(dead_code)] // Each suite uses a different subset

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chaos_core::bootstrap::{ChaosNode, LocalCluster};
use chaos_core::config::ChaosConfig;
use chaos_core::models::{CommandInfo, EndpointSpec, FanOutSpec, FaultSpec, FaultTarget};
use chaos_core::orchestration::TargetSelector;
use chaos_core::test_helpers::{command_fault, RecordingExecutor, RecordingExecutorFactory, StaticInventory};

/// Config with fast retries, suitable for tests
pub fn test_config(node_id: &str, quorum: usize) -> ChaosConfig {
    let mut config = ChaosConfig::for_node(node_id);
    config.cluster.quorum = quorum;
    config.execution.max_connection_retries = 1;
    config.execution.retry_backoff_ms = 1;
    config.execution.default_command_retry_interval_seconds = 0;
    config
}

/// Nodes sharing one bus, membership, work map and store
pub struct TestCluster {
    pub cluster: LocalCluster,
    pub executor: Arc<RecordingExecutor>,
    pub inventory: Arc<StaticInventory>,
}

impl TestCluster {
    pub fn new() -> Self {
        Self::with_executor(RecordingExecutor::new())
    }

    pub fn with_executor(executor: RecordingExecutor) -> Self {
        Self {
            cluster: LocalCluster::with_selector(TargetSelector::seeded(42)),
            executor: Arc::new(executor),
            inventory: Arc::new(StaticInventory::new()),
        }
    }

    /// Join `node_id` to the membership and bootstrap a node for it, not yet started
    pub fn node(&self, node_id: &str, quorum: usize) -> ChaosNode {
        self.node_with_config(test_config(node_id, quorum))
    }

    pub fn node_with_config(&self, config: ChaosConfig) -> ChaosNode {
        self.cluster
            .membership()
            .join(config.cluster.node_id.clone())
            .expect("join membership");
        let deps = self.cluster.dependencies(
            Arc::new(RecordingExecutorFactory::with_executor(self.executor.clone())),
            self.inventory.clone(),
        );
        ChaosNode::bootstrap(&config, deps).expect("bootstrap node")
    }

    pub async fn started_node(&self, node_id: &str, quorum: usize) -> ChaosNode {
        self.started_node_with_config(test_config(node_id, quorum)).await
    }

    pub async fn started_node_with_config(&self, config: ChaosConfig) -> ChaosNode {
        let mut node = self.node_with_config(config);
        node.start().await.expect("start node");
        node
    }
}

/// Single-target fault with two injection commands and one remediation command
pub fn two_step_fault(endpoint: &str, host: &str) -> FaultSpec {
    let mut fault = command_fault("cpu-hog", endpoint, host);
    fault.injection_commands = vec![
        CommandInfo::new("stage cpu-hog"),
        CommandInfo::new("start cpu-hog"),
    ];
    fault.remediation_commands = vec![CommandInfo::new("stop cpu-hog")];
    fault
}

pub fn endpoints(count: usize) -> Vec<EndpointSpec> {
    (1..=count)
        .map(|i| EndpointSpec::new(format!("web-{i}"), Some(format!("10.0.0.{i}"))))
        .collect()
}

pub fn endpoint_group(count: usize, random: bool) -> FanOutSpec {
    let template = command_fault("latency", "web-group", "10.0.0.254");
    FanOutSpec::endpoint_group(endpoints(count), template).random(random)
}

pub fn network_partition_group(targets: Vec<EndpointSpec>, hosts: Vec<String>) -> FanOutSpec {
    let mut template = FaultSpec::new("partition", "web-group", FaultTarget::NetworkPartition { hosts });
    template.injection_commands = vec![CommandInfo::new("block $FI_ARG_--hosts")];
    FanOutSpec::endpoint_group(targets, template)
}

/// Poll `check` until it holds or about two seconds passed
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
