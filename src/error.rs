//! Error types for the chaos orchestration core.
//!
//! Errors fall into a handful of families: validation problems surfaced straight
//! to the caller, transient remote failures retried inside the executor, cluster
//! level rejections and invariant violations that signal a logic defect.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ChaosError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidCronExpression { expression: String, reason: String },

    #[error("Failed to schedule job {id}: {reason}")]
    ScheduleFailure { id: String, reason: String },

    #[error("Unknown schedule ids: {ids:?}")]
    UnknownSchedules { ids: Vec<String> },

    #[error("Schedules not in expected state {expected}: {offenders:?}")]
    ScheduleStateMismatch {
        expected: String,
        /// (schedule id, actual status)
        offenders: Vec<(String, String)>,
    },

    #[error("Job {id} is not active on this node")]
    JobNotActive { id: String },

    #[error("No active jobs scheduled on this node")]
    NoActiveJobs,

    #[error("No targets found for selector: {selector}")]
    NoTargetsFound { selector: String },

    #[error("Prerequisite check failed: {reason}")]
    Prerequisite { reason: String },

    #[error("Command '{command}' failed with exit code {exit_code}: {output}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        output: String,
    },

    #[error("Command '{command}' failed with known failure: {message}")]
    KnownFailure { command: String, message: String },

    #[error("Command '{command}' references values that were not provided")]
    MissingReferenceValues { command: String },

    #[error("Failed to extract property '{property}' from command output")]
    OutputProcessing { property: String },

    #[error("Transient error: {0}")]
    Transient(String),

    #[error("Retries exhausted after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    #[error("Cluster quorum not met, request rejected by node {node}")]
    QuorumNotMet { node: String },

    #[error("Invariant violated: {0}")]
    InvariantViolated(String),

    #[error("Invalid task status transition from {from} on event {event}")]
    InvalidTransition { from: String, event: String },

    #[error("Task {id} not found")]
    TaskNotFound { id: String },

    #[error("Task {task_id} has no trigger history")]
    EmptyTriggerHistory { task_id: String },

    #[error("No task helper registered under '{0}'")]
    HelperNotFound(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Event error: {0}")]
    Event(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ChaosError {
    /// Whether the error is worth retrying locally.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Logic defects are never retried or swallowed.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, Self::InvariantViolated(_))
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

impl From<serde_json::Error> for ChaosError {
    fn from(error: serde_json::Error) -> Self {
        ChaosError::Validation(format!("JSON serialization error: {error}"))
    }
}

impl From<config::ConfigError> for ChaosError {
    fn from(error: config::ConfigError) -> Self {
        ChaosError::Configuration(error.to_string())
    }
}

impl From<tokio::task::JoinError> for ChaosError {
    fn from(error: tokio::task::JoinError) -> Self {
        ChaosError::Internal(format!("worker task failed: {error}"))
    }
}

pub type Result<T> = std::result::Result<T, ChaosError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(ChaosError::transient("connection refused").is_transient());
        assert!(!ChaosError::validation("bad").is_transient());
        assert!(ChaosError::InvariantViolated("no children".into()).is_invariant_violation());
    }

    #[test]
    fn test_error_messages() {
        let err = ChaosError::QuorumNotMet {
            node: "10.0.0.1".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Cluster quorum not met, request rejected by node 10.0.0.1"
        );

        let err = ChaosError::UnknownSchedules {
            ids: vec!["a".to_string()],
        };
        assert!(err.to_string().contains("\"a\""));
    }
}
