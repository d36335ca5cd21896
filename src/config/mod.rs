//! # Chaos Core Configuration System
//!
//! Layered configuration for a cluster node: built-in defaults, an optional
//! `chaos.yaml`, an environment-specific `chaos.<env>.yaml` override and
//! finally `CHAOS__SECTION__KEY` environment variables.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use chaos_core::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let quorum = manager.config().cluster.quorum;
//! let delay = manager.config().cluster.retrigger_delay();
//! # Ok(())
//! # }
//! ```

pub mod loader;

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants::system;
use crate::error::{ChaosError, Result};

pub use loader::ConfigManager;

/// Root configuration structure mirroring chaos.yaml
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ChaosConfig {
    /// Membership, quorum and recovery settings
    pub cluster: ClusterSettings,

    /// Live-timer pool settings
    pub scheduler: SchedulerConfig,

    /// Task worker pool and remote command settings
    pub execution: ExecutionConfig,

    /// In-process event channel settings
    pub events: EventsConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeploymentMode {
    #[default]
    Standalone,
    Cluster,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClusterSettings {
    /// Identity of the local node, usually its address
    pub node_id: String,
    /// Minimum live member count for mutating operations
    pub quorum: usize,
    /// Delay before queued in-progress tasks are re-announced after recovery
    pub retrigger_delay_seconds: u64,
    /// In-progress tasks older than this are failed instead of re-triggered
    pub retrigger_window_minutes: i64,
    pub deployment_mode: DeploymentMode,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            node_id: "localhost".to_string(),
            quorum: 1,
            retrigger_delay_seconds: system::DEFAULT_RETRIGGER_DELAY_SECONDS,
            retrigger_window_minutes: system::DEFAULT_RETRIGGER_WINDOW_MINUTES,
            deployment_mode: DeploymentMode::Standalone,
        }
    }
}

impl ClusterSettings {
    pub fn retrigger_delay(&self) -> Duration {
        Duration::from_secs(self.retrigger_delay_seconds)
    }

    pub fn retrigger_window(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.retrigger_window_minutes)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub timer_pool_size: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            timer_pool_size: system::DEFAULT_TIMER_POOL_SIZE,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Concurrent task executions per node
    pub worker_pool_size: usize,
    /// Attempts for resolving an executor or reaching a target
    pub max_connection_retries: u32,
    pub retry_backoff_ms: u64,
    /// Used when a command asks for retries without an interval
    pub default_command_retry_interval_seconds: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: system::DEFAULT_WORKER_POOL_SIZE,
            max_connection_retries: system::DEFAULT_MAX_CONNECTION_RETRIES,
            retry_backoff_ms: system::DEFAULT_RETRY_BACKOFF_MS,
            default_command_retry_interval_seconds: system::DEFAULT_COMMAND_RETRY_INTERVAL_SECONDS,
        }
    }
}

impl ExecutionConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EventsConfig {
    pub channel_capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            channel_capacity: system::DEFAULT_EVENT_CHANNEL_CAPACITY,
        }
    }
}

impl ChaosConfig {
    /// Reject values that would leave the node unable to schedule or run anything
    pub fn validate(&self) -> Result<()> {
        if self.cluster.node_id.trim().is_empty() {
            return Err(ChaosError::Configuration(
                "cluster.node_id must not be empty".to_string(),
            ));
        }
        if self.cluster.quorum == 0 {
            return Err(ChaosError::Configuration(
                "cluster.quorum must be at least 1".to_string(),
            ));
        }
        if self.cluster.retrigger_window_minutes <= 0 {
            return Err(ChaosError::Configuration(
                "cluster.retrigger_window_minutes must be positive".to_string(),
            ));
        }
        if self.scheduler.timer_pool_size == 0 {
            return Err(ChaosError::Configuration(
                "scheduler.timer_pool_size must be at least 1".to_string(),
            ));
        }
        if self.execution.worker_pool_size == 0 {
            return Err(ChaosError::Configuration(
                "execution.worker_pool_size must be at least 1".to_string(),
            ));
        }
        if self.events.channel_capacity == 0 {
            return Err(ChaosError::Configuration(
                "events.channel_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Single-node configuration used by tests and local runs
    pub fn for_node(node_id: impl Into<String>) -> Self {
        let mut config = Self::default();
        config.cluster.node_id = node_id.into();
        config
    }
}
