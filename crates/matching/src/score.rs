use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use rigger_marketplace::{JobPosting, MatchReasons, MatchedSkill, WorkerProfile, WorkerSkill};

use crate::weights::*;

/// Result of scoring one worker against one posting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchScore {
    /// Normalized score in `0..=100`.
    pub score: u8,
    pub reasons: Vec<String>,
    pub matched_skills: Vec<MatchedSkill>,
}

impl MatchScore {
    pub fn is_match(&self) -> bool {
        self.score >= MATCH_THRESHOLD
    }
}

impl From<MatchScore> for MatchReasons {
    fn from(value: MatchScore) -> Self {
        MatchReasons {
            score: value.score,
            reasons: value.reasons,
            matching_skills: value.matched_skills,
        }
    }
}

/// Score `worker` against `job` as of `now`.
///
/// Deterministic: identical inputs always produce identical output.
pub fn score(job: &JobPosting, worker: &WorkerProfile, now: DateTime<Utc>) -> MatchScore {
    let mut points: u32 = 0;
    let mut max_points: u32 = 0;

    for requirement in job.required_skills() {
        max_points += REQUIRED_SKILL_WEIGHT;
        if let Some(skill) = worker.skill(requirement.skill_id) {
            points += REQUIRED_SKILL_WEIGHT + required_bonus(skill.proficiency);
        }
    }

    for requirement in job.optional_skills() {
        max_points += OPTIONAL_SKILL_WEIGHT;
        if let Some(skill) = worker.skill(requirement.skill_id) {
            points += OPTIONAL_SKILL_WEIGHT + optional_bonus(skill.proficiency);
        }
    }

    max_points += LOCATION_WEIGHT;
    points += location_points(job, worker);

    max_points += EXPERIENCE_WEIGHT;
    points += experience_points(worker.years_experience);

    // Bonus only: not part of max_points.
    let active_certifications = worker.active_certifications(now);
    points += certification_points(active_certifications);

    let normalized = (f64::from(points) / f64::from(max_points) * 100.0)
        .round()
        .min(100.0);

    let matched = matching_skills(job, worker);

    MatchScore {
        score: normalized as u8,
        reasons: reasons(job, worker, &matched, active_certifications),
        matched_skills: matched
            .into_iter()
            .map(|s| MatchedSkill {
                name: s.name.clone(),
                proficiency: s.proficiency,
                years_experience: s.years_experience,
            })
            .collect(),
    }
}

/// Whether `worker` clears the match threshold for `job`.
pub fn is_match(job: &JobPosting, worker: &WorkerProfile, now: DateTime<Utc>) -> bool {
    score(job, worker, now).is_match()
}

fn required_bonus(proficiency: u8) -> u32 {
    if proficiency >= EXPERT_PROFICIENCY {
        REQUIRED_EXPERT_BONUS
    } else if proficiency >= SKILLED_PROFICIENCY {
        REQUIRED_SKILLED_BONUS
    } else {
        0
    }
}

fn optional_bonus(proficiency: u8) -> u32 {
    if proficiency >= EXPERT_PROFICIENCY {
        OPTIONAL_EXPERT_BONUS
    } else {
        0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Proximity {
    SameCity,
    SameState,
    Elsewhere,
}

fn proximity(job: &JobPosting, worker: &WorkerProfile) -> Proximity {
    if worker.city.as_deref() == Some(job.city.as_str()) {
        Proximity::SameCity
    } else if worker.state.as_deref() == Some(job.state.as_str()) {
        Proximity::SameState
    } else {
        Proximity::Elsewhere
    }
}

fn location_points(job: &JobPosting, worker: &WorkerProfile) -> u32 {
    match proximity(job, worker) {
        Proximity::SameCity => SAME_CITY_POINTS,
        Proximity::SameState => SAME_STATE_POINTS,
        Proximity::Elsewhere => 0,
    }
}

fn experience_points(years: u32) -> u32 {
    EXPERIENCE_TIERS
        .iter()
        .find(|(min_years, _)| years >= *min_years)
        .map_or(EXPERIENCE_FLOOR_POINTS, |(_, points)| *points)
}

fn certification_points(active: usize) -> u32 {
    CERTIFICATION_TIERS
        .iter()
        .find(|(min_count, _)| active >= *min_count)
        .map_or(0, |(_, points)| *points)
}

/// Worker skills that appear anywhere in the posting, in the worker's order.
fn matching_skills<'w>(job: &JobPosting, worker: &'w WorkerProfile) -> Vec<&'w WorkerSkill> {
    worker
        .skills
        .iter()
        .filter(|ws| job.skills.iter().any(|js| js.skill_id == ws.skill_id))
        .collect()
}

fn reasons(
    job: &JobPosting,
    worker: &WorkerProfile,
    matched: &[&WorkerSkill],
    active_certifications: usize,
) -> Vec<String> {
    let mut reasons = Vec::new();

    if let Some(first) = matched.first() {
        reasons.push(format!(
            "{} matching skills including {}",
            matched.len(),
            first.name
        ));
    }

    match proximity(job, worker) {
        Proximity::SameCity => reasons.push("Local worker - same city".to_string()),
        Proximity::SameState => reasons.push("Regional worker - same state".to_string()),
        Proximity::Elsewhere => {}
    }

    if worker.years_experience >= 10 {
        reasons.push("Highly experienced (10+ years)".to_string());
    } else if worker.years_experience >= 5 {
        reasons.push("Experienced professional (5+ years)".to_string());
    }

    if active_certifications > 0 {
        reasons.push(format!("{active_certifications} active certifications"));
    }

    reasons
}
