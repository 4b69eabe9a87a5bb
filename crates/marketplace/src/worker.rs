use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use rigger_core::{SkillId, UserId, WorkerProfileId};

use crate::impl_status_str;

/// Whether a worker can currently take on work.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Availability {
    Available,
    Busy,
    Inactive,
    Suspended,
}

impl_status_str!(Availability {
    Available => "AVAILABLE",
    Busy => "BUSY",
    Inactive => "INACTIVE",
    Suspended => "SUSPENDED",
});

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CertificationStatus {
    Active,
    Expired,
    Suspended,
    Pending,
}

impl_status_str!(CertificationStatus {
    Active => "ACTIVE",
    Expired => "EXPIRED",
    Suspended => "SUSPENDED",
    Pending => "PENDING",
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerSkill {
    pub skill_id: SkillId,
    pub name: String,
    /// Self-assessed proficiency, 0 to 10.
    pub proficiency: u8,
    pub years_experience: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerCertification {
    pub name: String,
    pub status: CertificationStatus,
    pub expires_at: Option<DateTime<Utc>>,
}

impl WorkerCertification {
    /// Active and not yet expired. A certificate without an expiry date does not count.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.status == CertificationStatus::Active
            && self.expires_at.is_some_and(|expires| expires > now)
    }

    /// Active and expiring inside `[now, until]`.
    pub fn expires_within(&self, now: DateTime<Utc>, until: DateTime<Utc>) -> bool {
        self.status == CertificationStatus::Active
            && self
                .expires_at
                .is_some_and(|expires| expires >= now && expires <= until)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerProfile {
    pub id: WorkerProfileId,
    pub user_id: UserId,
    /// Where match notifications are sent.
    pub email: String,
    pub city: Option<String>,
    pub state: Option<String>,
    #[serde(default)]
    pub years_experience: u32,
    pub availability: Availability,
    pub skills: Vec<WorkerSkill>,
    pub certifications: Vec<WorkerCertification>,
}

impl WorkerProfile {
    pub fn is_available(&self) -> bool {
        self.availability == Availability::Available
    }

    pub fn skill(&self, skill_id: SkillId) -> Option<&WorkerSkill> {
        self.skills.iter().find(|s| s.skill_id == skill_id)
    }

    pub fn active_certifications(&self, now: DateTime<Utc>) -> usize {
        self.certifications
            .iter()
            .filter(|c| c.is_active_at(now))
            .count()
    }
}
