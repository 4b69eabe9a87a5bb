use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use rigger_core::{CompanyId, JobPostingId, SkillId};

use crate::impl_status_str;

/// Lifecycle of a job posting.
///
/// Postings are created as `Draft`; publishing makes them eligible for matching.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Draft,
    Published,
    Paused,
    InProgress,
    Completed,
    Cancelled,
}

impl_status_str!(JobStatus {
    Draft => "DRAFT",
    Published => "PUBLISHED",
    Paused => "PAUSED",
    InProgress => "IN_PROGRESS",
    Completed => "COMPLETED",
    Cancelled => "CANCELLED",
});

/// A skill a posting asks for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillRequirement {
    pub skill_id: SkillId,
    pub required: bool,
    /// Informational only; the scorer does not read it.
    pub min_experience_years: Option<u32>,
}

impl SkillRequirement {
    pub fn required(skill_id: SkillId) -> Self {
        Self {
            skill_id,
            required: true,
            min_experience_years: None,
        }
    }

    pub fn optional(skill_id: SkillId) -> Self {
        Self {
            skill_id,
            required: false,
            min_experience_years: None,
        }
    }

    pub fn with_min_experience(mut self, years: u32) -> Self {
        self.min_experience_years = Some(years);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPosting {
    pub id: JobPostingId,
    pub company_id: CompanyId,
    pub company_name: String,
    pub title: String,
    pub skills: Vec<SkillRequirement>,
    pub city: String,
    pub state: String,
    pub pay_rate: Option<f64>,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
    pub application_deadline: Option<DateTime<Utc>>,
}

impl JobPosting {
    /// Matching only runs against published postings whose deadline has not passed.
    pub fn is_matchable(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Published
            && self.application_deadline.is_none_or(|deadline| deadline > now)
    }

    pub fn required_skills(&self) -> impl Iterator<Item = &SkillRequirement> {
        self.skills.iter().filter(|s| s.required)
    }

    pub fn optional_skills(&self) -> impl Iterator<Item = &SkillRequirement> {
        self.skills.iter().filter(|s| !s.required)
    }

    /// "City, State" as shown in notifications.
    pub fn location(&self) -> String {
        format!("{}, {}", self.city, self.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn posting(status: JobStatus, deadline: Option<DateTime<Utc>>) -> JobPosting {
        let now = Utc::now();
        JobPosting {
            id: JobPostingId::new(),
            company_id: CompanyId::new(),
            company_name: "Harbour Cranes".to_string(),
            title: "Dogman".to_string(),
            skills: vec![],
            city: "Sydney".to_string(),
            state: "NSW".to_string(),
            pay_rate: Some(55.0),
            status,
            created_at: now,
            published_at: Some(now),
            application_deadline: deadline,
        }
    }

    #[test]
    fn only_published_postings_are_matchable() {
        let now = Utc::now();
        assert!(posting(JobStatus::Published, None).is_matchable(now));
        for status in [
            JobStatus::Draft,
            JobStatus::Paused,
            JobStatus::InProgress,
            JobStatus::Completed,
            JobStatus::Cancelled,
        ] {
            assert!(!posting(status, None).is_matchable(now), "{status} should not match");
        }
    }

    #[test]
    fn expired_deadline_blocks_matching() {
        let now = Utc::now();
        let past = posting(JobStatus::Published, Some(now - Duration::hours(1)));
        let future = posting(JobStatus::Published, Some(now + Duration::hours(1)));
        assert!(!past.is_matchable(now));
        assert!(future.is_matchable(now));
    }

    #[test]
    fn status_parses_database_names() {
        assert_eq!("IN_PROGRESS".parse::<JobStatus>().unwrap(), JobStatus::InProgress);
        assert!("published".parse::<JobStatus>().is_err());
    }
}
