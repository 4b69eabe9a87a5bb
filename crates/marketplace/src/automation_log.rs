use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use rigger_core::AutomationLogId;

use crate::impl_status_str;

/// Which processor wrote a log row.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AutomationLogType {
    JobMatching,
    NotificationSent,
    PaymentProcessing,
    ComplianceCheck,
}

impl_status_str!(AutomationLogType {
    JobMatching => "JOB_MATCHING",
    NotificationSent => "NOTIFICATION_SENT",
    PaymentProcessing => "PAYMENT_PROCESSING",
    ComplianceCheck => "COMPLIANCE_CHECK",
});

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogStatus {
    Running,
    Success,
    Failed,
}

impl_status_str!(LogStatus {
    Running => "RUNNING",
    Success => "SUCCESS",
    Failed => "FAILED",
});

/// Append-only outcome of one processor invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationLog {
    pub id: AutomationLogId,
    pub log_type: AutomationLogType,
    pub status: LogStatus,
    /// Snapshot of the task payload plus outcome details.
    pub data: JsonValue,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AutomationLog {
    pub fn success(log_type: AutomationLogType, data: JsonValue, at: DateTime<Utc>) -> Self {
        Self {
            id: AutomationLogId::new(),
            log_type,
            status: LogStatus::Success,
            data,
            error: None,
            created_at: at,
        }
    }

    pub fn failed(
        log_type: AutomationLogType,
        data: JsonValue,
        error: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: AutomationLogId::new(),
            log_type,
            status: LogStatus::Failed,
            data,
            error: Some(error.into()),
            created_at: at,
        }
    }
}

/// Trailing-window activity counts for the weekly report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityMetrics {
    pub new_jobs: u64,
    pub new_applications: u64,
    pub new_users: u64,
    pub matches_generated: u64,
}
