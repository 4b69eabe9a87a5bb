use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use rigger_core::{JobPostingId, MatchId, WorkerProfileId};

/// Worker skill that overlapped with the posting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchedSkill {
    pub name: String,
    pub proficiency: u8,
    pub years_experience: Option<u32>,
}

/// Human-readable explanation stored next to a match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchReasons {
    pub score: u8,
    pub reasons: Vec<String>,
    pub matching_skills: Vec<MatchedSkill>,
}

/// A persisted (posting, worker) match.
///
/// Unique per pair and never updated once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub id: MatchId,
    pub job_id: JobPostingId,
    pub worker_profile_id: WorkerProfileId,
    pub score: u8,
    pub reasons: MatchReasons,
    pub created_at: DateTime<Utc>,
}

impl MatchRecord {
    pub fn new(
        job_id: JobPostingId,
        worker_profile_id: WorkerProfileId,
        reasons: MatchReasons,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: MatchId::new(),
            job_id,
            worker_profile_id,
            score: reasons.score,
            reasons,
            created_at,
        }
    }

    pub fn pair(&self) -> (JobPostingId, WorkerProfileId) {
        (self.job_id, self.worker_profile_id)
    }
}
