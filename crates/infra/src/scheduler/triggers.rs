//! Declarative trigger table.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;
use serde::Serialize;

use super::SchedulerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TriggerKind {
    JobMatchingSweep,
    PaymentRun,
    ComplianceSweep,
    WeeklyReport,
    DatabaseCleanup,
    HealthCheck,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerKind::JobMatchingSweep => "job-matching-sweep",
            TriggerKind::PaymentRun => "payment-run",
            TriggerKind::ComplianceSweep => "compliance-sweep",
            TriggerKind::WeeklyReport => "weekly-report",
            TriggerKind::DatabaseCleanup => "database-cleanup",
            TriggerKind::HealthCheck => "health-check",
        }
    }
}

impl std::fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Calendar expressions (UTC, with a leading seconds field).
pub const TRIGGER_TABLE: [(TriggerKind, &str); 6] = [
    (TriggerKind::JobMatchingSweep, "0 */15 * * * *"),
    (TriggerKind::PaymentRun, "0 0 2 * * *"),
    (TriggerKind::ComplianceSweep, "0 0 1 * * *"),
    (TriggerKind::WeeklyReport, "0 0 6 * * Sun"),
    (TriggerKind::DatabaseCleanup, "0 0 3 * * *"),
    (TriggerKind::HealthCheck, "0 */5 * * * *"),
];

#[derive(Debug, Clone)]
pub struct Trigger {
    pub kind: TriggerKind,
    pub expression: &'static str,
    schedule: Schedule,
}

impl Trigger {
    pub fn parse(kind: TriggerKind, expression: &'static str) -> Result<Self, SchedulerError> {
        let schedule =
            Schedule::from_str(expression).map_err(|e| SchedulerError::InvalidExpression {
                trigger: kind,
                message: e.to_string(),
            })?;
        Ok(Self {
            kind,
            expression,
            schedule,
        })
    }

    /// First firing strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }

    /// Whether the trigger fires at least once in `(since, until]`.
    pub fn is_due(&self, since: DateTime<Utc>, until: DateTime<Utc>) -> bool {
        self.next_after(since).is_some_and(|next| next <= until)
    }
}

/// Parse the full trigger table.
pub fn default_triggers() -> Result<Vec<Trigger>, SchedulerError> {
    TRIGGER_TABLE
        .iter()
        .map(|(kind, expression)| Trigger::parse(*kind, expression))
        .collect()
}
