use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use rigger_core::{CompanyId, SubscriptionId, UserId};

use crate::impl_status_str;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionStatus {
    Active,
    Cancelled,
    PastDue,
    Trialing,
    Incomplete,
}

impl_status_str!(SubscriptionStatus {
    Active => "ACTIVE",
    Cancelled => "CANCELLED",
    PastDue => "PAST_DUE",
    Trialing => "TRIALING",
    Incomplete => "INCOMPLETE",
});

/// A company's paid plan; the payment run bills those whose period is ending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub company_id: CompanyId,
    pub status: SubscriptionStatus,
    pub current_period_end: DateTime<Utc>,
}

impl Subscription {
    pub fn is_due_by(&self, deadline: DateTime<Utc>) -> bool {
        self.status == SubscriptionStatus::Active && self.current_period_end <= deadline
    }
}

/// Platform administrator; receives the weekly report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminUser {
    pub id: UserId,
    pub email: String,
}
