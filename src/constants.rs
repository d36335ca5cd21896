//! # System Constants
//!
//! Placeholder syntax used in fault commands, event names, well-known argument
//! keys and default timings shared across the orchestration core.

pub use crate::state_machine::{CommandSubstage, TaskStatus, TriggerSubstage};

/// Placeholders resolved by the command runner before a command is executed
pub mod placeholders {
    /// `$FI_ARG_<key>` is replaced with the task argument `<key>`
    pub const ARG_EXPRESSION: &str = "$FI_ARG_";
    /// `$FI_ADD_INFO_<key>` is replaced with a value extracted from an earlier command output
    pub const ADD_INFO_EXPRESSION: &str = "$FI_ADD_INFO_";
    /// `$FI_STACK` is replaced with the trimmed output of the previous command
    pub const STACK_EXPRESSION: &str = "$FI_STACK";
}

/// Event names published on the in-process and cluster buses
pub mod events {
    pub const TASK_SUBSTAGE_CHANGED: &str = "task.substage_changed";
    pub const TASK_COMPLETED: &str = "task.completed";
    pub const SCHEDULE_CREATED: &str = "schedule.created";
    pub const SCHEDULE_STATUS_CHANGED: &str = "schedule.status_changed";
    pub const SCHEDULE_COMMAND: &str = "schedule.command";
    pub const WORK_ANNOUNCED: &str = "cluster.work_announced";
    pub const MEMBER_ADDED: &str = "cluster.member_added";
    pub const MEMBER_REMOVED: &str = "cluster.member_removed";
}

/// Argument keys understood by fault commands
pub mod args {
    /// Injection tasks always carry their own id under this key
    pub const TASK_ID: &str = "id";
    /// Semicolon separated host list for network partition faults
    pub const HOSTS: &str = "--hosts";
    pub const VM_ID: &str = "--vmId";
    pub const VM_NIC: &str = "--vmNic";
    pub const VM_DISK: &str = "--vmDisk";
    /// Key under which best-effort remediation failures are recorded
    pub const REMEDIATION_FAILURES: &str = "remediationFailures";
}

/// Request names that stay available while the cluster has lost quorum
pub const QUORUM_EXEMPT_OPERATIONS: &[&str] = &[
    "login",
    "password-reset",
    "cluster-config-read",
    "cluster-config-write",
];

/// Default timings and limits
pub mod system {
    pub const DEFAULT_RETRIGGER_DELAY_SECONDS: u64 = 300;
    pub const DEFAULT_RETRIGGER_WINDOW_MINUTES: i64 = 30;
    pub const DEFAULT_COMMAND_RETRY_INTERVAL_SECONDS: u64 = 1;
    pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 1000;
    pub const DEFAULT_WORKER_POOL_SIZE: usize = 16;
    pub const DEFAULT_TIMER_POOL_SIZE: usize = 10;
    pub const DEFAULT_MAX_CONNECTION_RETRIES: u32 = 3;
    pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 1000;
}

/// Names under which task helpers are registered
pub mod helpers {
    pub const COMMAND_FAULT: &str = "command-fault";
    pub const AGENT_FAULT: &str = "agent-fault";
    pub const ENDPOINT_GROUP_TRIGGER: &str = "endpoint-group-trigger";
    pub const KUBERNETES_TRIGGER: &str = "kubernetes-trigger";
    pub const VIRTUAL_INFRA_TRIGGER: &str = "virtual-infra-trigger";
}

/// Kubernetes conventions
pub mod kubernetes {
    /// Pods carrying this label are never selected as fault targets
    pub const INJECTION_DISABLED_LABEL_KEY: &str = "chaos.injection/disabled";
    pub const INJECTION_DISABLED_LABEL_VALUE: &str = "true";
}
