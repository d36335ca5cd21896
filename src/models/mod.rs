pub mod cluster;
pub mod command;
pub mod fan_out;
pub mod fault_spec;
pub mod schedule;
pub mod task;

// Re-export core models for easy access
pub use cluster::{ClusterConfig, Member, NodeStatus, QuorumStatus};
pub use command::{CommandInfo, CommandResult, OutputProcessingInfo, SupportScript};
pub use fan_out::{FanOutKind, FanOutSpec};
pub use fault_spec::{
    AgentProperties, EndpointSpec, FaultSpec, FaultTarget, HostArguments, KubernetesArguments,
    VmArguments, VmFaultKind,
};
pub use schedule::{JobType, ScheduleInfo, ScheduleStatus, SchedulerSpec};
pub use task::{Task, TaskPayload, TaskTrigger, TroubleshootingInfo};
