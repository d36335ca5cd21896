//! # Orchestration Engine
//!
//! Drives fault tasks from creation to a terminal status.
//!
//! ## Core Components
//!
//! - **TargetCapability**: per-target-family command building, prerequisite
//!   checks and endpoint preparation
//! - **SingleTaskExecutor**: injection and remediation against one target,
//!   checkpointed through the task substage
//! - **FanOutTrigger**: expands a parent task into one child per resolved
//!   target; flavors inject target resolution through `TargetResolver`
//! - **HelperRegistry**: extension name to helper lookup
//! - **TaskRunner**: bounded worker pool owning task status bookkeeping

pub mod capabilities;
pub mod capability;
pub mod fan_out;
pub mod inventory;
pub mod registry;
pub mod selection;
pub mod single_task;
pub mod task_helper;
pub mod task_runner;

pub use capabilities::{AgentFaultCapability, CommandFaultCapability};
pub use capability::TargetCapability;
pub use fan_out::{
    EndpointGroupResolver, FanOutTrigger, KubernetesPodResolver, TargetResolver,
    VirtualInfraResolver,
};
pub use inventory::{TargetInventory, TargetQuery};
pub use registry::HelperRegistry;
pub use selection::TargetSelector;
pub use single_task::SingleTaskExecutor;
pub use task_helper::{ExecutionContext, ExecutionOutcome, TaskHelper};
pub use task_runner::{TaskRunner, TaskScheduling};
