//! Substage cursors persisted on a task so multi-step executors resume where
//! they stopped instead of repeating work after a restart.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Substages of a single-target command execution task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandSubstage {
    Initialised,
    PrerequisitesCheck,
    PrepareTargetMachine,
    TriggerInjection,
    RemediationPrerequisitesCheck,
    TriggerRemediation,
    CleanupExecutionInfo,
    Completed,
}

impl CommandSubstage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initialised => "INITIALISED",
            Self::PrerequisitesCheck => "PREREQUISITES_CHECK",
            Self::PrepareTargetMachine => "PREPARE_TARGET_MACHINE",
            Self::TriggerInjection => "TRIGGER_INJECTION",
            Self::RemediationPrerequisitesCheck => "REMEDIATION_PREREQUISITES_CHECK",
            Self::TriggerRemediation => "TRIGGER_REMEDIATION",
            Self::CleanupExecutionInfo => "CLEANUP_EXECUTION_INFO",
            Self::Completed => "COMPLETED",
        }
    }
}

impl fmt::Display for CommandSubstage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandSubstage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "INITIALISED" => Ok(Self::Initialised),
            "PREREQUISITES_CHECK" => Ok(Self::PrerequisitesCheck),
            "PREPARE_TARGET_MACHINE" => Ok(Self::PrepareTargetMachine),
            "TRIGGER_INJECTION" => Ok(Self::TriggerInjection),
            "REMEDIATION_PREREQUISITES_CHECK" => Ok(Self::RemediationPrerequisitesCheck),
            "TRIGGER_REMEDIATION" => Ok(Self::TriggerRemediation),
            "CLEANUP_EXECUTION_INFO" => Ok(Self::CleanupExecutionInfo),
            "COMPLETED" => Ok(Self::Completed),
            other => Err(format!("Invalid command substage: {other}")),
        }
    }
}

/// Substages of a fan-out parent task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerSubstage {
    Initialised,
    TriggerChildTasks,
    Completed,
}

impl TriggerSubstage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initialised => "INITIALISED",
            Self::TriggerChildTasks => "TRIGGER_CHILD_TASKS",
            Self::Completed => "COMPLETED",
        }
    }
}

impl fmt::Display for TriggerSubstage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerSubstage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "INITIALISED" => Ok(Self::Initialised),
            "TRIGGER_CHILD_TASKS" => Ok(Self::TriggerChildTasks),
            "COMPLETED" => Ok(Self::Completed),
            other => Err(format!("Invalid trigger substage: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_substage_round_trip_through_cursor_string() {
        let stage: CommandSubstage = "prepare_target_machine".parse().unwrap();
        assert_eq!(stage, CommandSubstage::PrepareTargetMachine);
        assert_eq!(stage.to_string(), "PREPARE_TARGET_MACHINE");

        let stage: TriggerSubstage = "TRIGGER_CHILD_TASKS".parse().unwrap();
        assert_eq!(stage, TriggerSubstage::TriggerChildTasks);
    }

    #[test]
    fn test_unknown_substage_rejected() {
        assert!("BOGUS".parse::<CommandSubstage>().is_err());
        assert!("".parse::<TriggerSubstage>().is_err());
    }
}
