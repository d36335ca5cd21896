//! Persisted scheduling intent, independent of any live timer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ChaosError, Result};

/// Schedule attached to a fault request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleInfo {
    pub cron_expression: Option<String>,
    /// Epoch millis for one-shot runs
    pub time_in_millis: Option<i64>,
    pub description: Option<String>,
}

impl ScheduleInfo {
    pub fn cron(expression: impl Into<String>) -> Self {
        Self {
            cron_expression: Some(expression.into()),
            ..Default::default()
        }
    }

    pub fn once(time_in_millis: i64) -> Self {
        Self {
            time_in_millis: Some(time_in_millis),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobType {
    Cron,
    Simple,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScheduleStatus {
    Scheduled,
    Paused,
    Cancelled,
    Initializing,
    /// One-shot schedule that already fired
    Finished,
}

impl ScheduleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "SCHEDULED",
            Self::Paused => "PAUSED",
            Self::Cancelled => "CANCELLED",
            Self::Initializing => "INITIALIZING",
            Self::Finished => "FINISHED",
        }
    }

    /// Statuses in which a schedule still owns, or is about to own, a timer
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Scheduled | Self::Paused | Self::Initializing)
    }
}

impl fmt::Display for ScheduleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerSpec {
    /// Same as the owning task id
    pub id: String,
    pub job_type: JobType,
    pub cron_expression: Option<String>,
    pub scheduled_time: Option<i64>,
    pub status: ScheduleStatus,
    pub description: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl SchedulerSpec {
    pub fn cron(id: impl Into<String>, expression: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            job_type: JobType::Cron,
            cron_expression: Some(expression.into()),
            scheduled_time: None,
            status: ScheduleStatus::Initializing,
            description: None,
            updated_at: Utc::now(),
        }
    }

    pub fn once(id: impl Into<String>, scheduled_time: i64) -> Self {
        Self {
            id: id.into(),
            job_type: JobType::Simple,
            cron_expression: None,
            scheduled_time: Some(scheduled_time),
            status: ScheduleStatus::Initializing,
            description: None,
            updated_at: Utc::now(),
        }
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }

    pub fn set_status(&mut self, status: ScheduleStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    /// Exactly one trigger policy is set and it matches the job type
    pub fn validate(&self) -> Result<()> {
        match (self.job_type, &self.cron_expression, self.scheduled_time) {
            (JobType::Cron, Some(_), None) | (JobType::Simple, None, Some(_)) => Ok(()),
            _ => Err(ChaosError::validation(format!(
                "schedule {} must set exactly one of cron expression or scheduled time matching job type {:?}",
                self.id, self.job_type
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_policy_invariant() {
        assert!(SchedulerSpec::cron("a", "0 0 * * * *").validate().is_ok());
        assert!(SchedulerSpec::once("b", 1_700_000_000_000).validate().is_ok());

        let mut mixed = SchedulerSpec::cron("c", "0 0 * * * *");
        mixed.scheduled_time = Some(1);
        assert!(mixed.validate().is_err());

        let mut wrong_type = SchedulerSpec::once("d", 1);
        wrong_type.job_type = JobType::Cron;
        assert!(wrong_type.validate().is_err());
    }

    #[test]
    fn test_active_statuses() {
        assert!(ScheduleStatus::Paused.is_active());
        assert!(ScheduleStatus::Initializing.is_active());
        assert!(!ScheduleStatus::Cancelled.is_active());
        assert!(!ScheduleStatus::Finished.is_active());
    }
}
