use chrono::{DateTime, TimeZone, Utc};
use cron::Schedule;
use std::str::FromStr;

use crate::error::{ChaosError, Result};
use crate::models::{JobType, SchedulerSpec};

/// When a live timer fires
#[derive(Debug, Clone)]
pub enum TriggerPolicy {
    /// Six-field cron expression (seconds first)
    Cron(Box<Schedule>),
    Once(DateTime<Utc>),
}

impl TriggerPolicy {
    pub fn cron(expression: &str) -> Result<Self> {
        Schedule::from_str(expression)
            .map(|schedule| Self::Cron(Box::new(schedule)))
            .map_err(|e| ChaosError::InvalidCronExpression {
                expression: expression.to_string(),
                reason: e.to_string(),
            })
    }

    pub fn once(time_in_millis: i64) -> Result<Self> {
        Utc.timestamp_millis_opt(time_in_millis)
            .single()
            .map(Self::Once)
            .ok_or_else(|| ChaosError::validation(format!("invalid schedule time {time_in_millis}")))
    }

    pub fn from_spec(spec: &SchedulerSpec) -> Result<Self> {
        spec.validate()?;
        match (spec.job_type, &spec.cron_expression, spec.scheduled_time) {
            (JobType::Cron, Some(expression), _) => Self::cron(expression),
            (JobType::Simple, _, Some(millis)) => Self::once(millis),
            _ => Err(ChaosError::validation(format!(
                "schedule {} has no trigger policy",
                spec.id
            ))),
        }
    }

    pub fn is_one_shot(&self) -> bool {
        matches!(self, Self::Once(_))
    }

    /// Next fire time strictly after `after`; a one-shot always answers its
    /// own time
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Cron(schedule) => schedule.after(&after).next(),
            Self::Once(at) => Some(*at),
        }
    }

    /// Next fire time after a run due at `due` that ended at `finished`.
    /// Occurrences falling inside the run are skipped.
    pub fn next_after_run(&self, due: DateTime<Utc>, finished: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.next_after(finished.max(due))
    }

    /// One-shot whose time has already passed
    pub fn has_elapsed(&self, now: DateTime<Utc>) -> bool {
        matches!(self, Self::Once(at) if *at <= now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn test_hourly_cron_fires_on_the_hour() {
        let policy = TriggerPolicy::cron("0 0 * * * *").unwrap();
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 10, 15, 0).unwrap();
        let next = policy.next_after(now).unwrap();
        assert_eq!((next.hour(), next.minute(), next.second()), (11, 0, 0));
        assert!(!policy.is_one_shot());
    }

    #[test]
    fn test_slow_run_skips_missed_occurrences() {
        let policy = TriggerPolicy::cron("* * * * * *").unwrap();
        let due = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();

        let after_slow_run = policy
            .next_after_run(due, due + chrono::Duration::seconds(5))
            .unwrap();
        assert_eq!(after_slow_run, due + chrono::Duration::seconds(6));

        let after_quick_run = policy
            .next_after_run(due, due - chrono::Duration::milliseconds(10))
            .unwrap();
        assert_eq!(after_quick_run, due + chrono::Duration::seconds(1));
    }

    #[test]
    fn test_invalid_cron_reports_expression() {
        match TriggerPolicy::cron("every tuesday") {
            Err(ChaosError::InvalidCronExpression { expression, .. }) => {
                assert_eq!(expression, "every tuesday")
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_one_shot_elapsed() {
        let policy = TriggerPolicy::once(1_700_000_000_000).unwrap();
        assert!(policy.has_elapsed(Utc::now()));
        assert!(policy.is_one_shot());
    }
}
