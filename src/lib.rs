#![allow(clippy::doc_markdown)] // Allow technical terms like FNV-1a, JSON in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Chaos Core
//!
//! Orchestration core of a clustered fault-injection service.
//!
//! ## Overview
//!
//! A fault request becomes a [`Task`](models::Task). Single-target tasks walk a
//! resumable sequence of substages that check prerequisites and run injection
//! or remediation commands against the target. Fan-out tasks resolve a set of
//! targets (endpoint groups, Kubernetes pods, virtual infrastructure) and
//! spawn one child task per target. Tasks can run immediately or on a cron or
//! one-shot schedule.
//!
//! ## Architecture
//!
//! Every node of the cluster runs the same components:
//!
//! - a [`TaskRunner`](orchestration::TaskRunner) executing tasks on a bounded worker pool
//! - a [`Scheduler`](scheduler::Scheduler) owning the live timers of this node
//! - a [`ClusterCoordinator`](cluster::ClusterCoordinator) reacting to membership and schedule events
//! - a [`QuorumGuard`](cluster::QuorumGuard) rejecting mutating requests while quorum is lost
//!
//! The oldest surviving member drives startup recovery. Schedules and
//! announced work belong to the node owning their partition.
//!
//! ## Module Organization
//!
//! - [`models`] - Tasks, fault specs, schedules and cluster documents
//! - [`state_machine`] - Task status transitions and substage cursors
//! - [`execution`] - Remote command contract and the command runner
//! - [`orchestration`] - Task helpers, fan-out triggers and the task runner
//! - [`scheduler`] - Cron and one-shot timers with bulk schedule control
//! - [`cluster`] - Membership, quorum, cluster events and recovery
//! - [`persistence`] - Repository contracts and in-memory storage
//! - [`config`] - Layered configuration
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use chaos_core::bootstrap::{ChaosNode, LocalCluster};
//! use chaos_core::config::ChaosConfig;
//! use chaos_core::constants::helpers;
//! use chaos_core::models::TaskPayload;
//! use chaos_core::test_helpers::{command_fault, RecordingExecutorFactory, StaticInventory};
//! use std::sync::Arc;
//!
//! # async fn example() -> chaos_core::Result<()> {
//! chaos_core::logging::init_structured_logging();
//!
//! let cluster = LocalCluster::new();
//! cluster.membership().join("10.0.0.1")?;
//! let deps = cluster.dependencies(
//!     Arc::new(RecordingExecutorFactory::default()),
//!     Arc::new(StaticInventory::new()),
//! );
//! let mut node = ChaosNode::bootstrap(&ChaosConfig::for_node("10.0.0.1"), deps)?;
//! node.start().await?;
//!
//! let fault = command_fault("cpu-hog", "web-1", "10.0.0.20");
//! let task = node
//!     .submit_fault(helpers::COMMAND_FAULT, TaskPayload::Single(fault))
//!     .await?;
//! println!("{} finished as {}", task.id, task.task_status);
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! ```bash
//! cargo test --lib    # Unit tests
//! cargo test          # Unit and integration tests
//! ```

pub mod bootstrap;
pub mod cluster;
pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod execution;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod persistence;
pub mod scheduler;
pub mod state_machine;
pub mod test_helpers;

pub use bootstrap::{ChaosNode, LocalCluster, NodeDependencies};
pub use cluster::{ClusterCoordinator, QuorumGuard, QuorumState, RequestKind};
pub use config::{ChaosConfig, ConfigManager};
pub use error::{ChaosError, Result};
pub use events::{ChaosEvent, EventPublisher};
pub use models::{FanOutSpec, FaultSpec, ScheduleStatus, SchedulerSpec, Task, TaskPayload};
pub use orchestration::{HelperRegistry, TaskHelper, TaskRunner};
pub use scheduler::{ScheduleAction, Scheduler};
pub use state_machine::{TaskStatus, TaskType};
