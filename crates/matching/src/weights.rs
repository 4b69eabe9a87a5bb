//! Weights of the match score.
//!
//! The denominator (`max score`) is built from the skill weights plus the flat
//! location and experience weights. Proficiency bonuses and the certification
//! bonus only ever add to the numerator, so a strong candidate can exceed the
//! denominator and is clamped to 100.

/// Minimum normalized score for a worker to be recorded as matched.
pub const MATCH_THRESHOLD: u8 = 60;

pub const REQUIRED_SKILL_WEIGHT: u32 = 40;
pub const OPTIONAL_SKILL_WEIGHT: u32 = 20;
pub const LOCATION_WEIGHT: u32 = 100;
pub const EXPERIENCE_WEIGHT: u32 = 100;

/// Required skill bonus at proficiency >= 8.
pub const REQUIRED_EXPERT_BONUS: u32 = 10;
/// Required skill bonus at proficiency >= 6.
pub const REQUIRED_SKILLED_BONUS: u32 = 5;
/// Optional skill bonus at proficiency >= 8.
pub const OPTIONAL_EXPERT_BONUS: u32 = 5;

pub const EXPERT_PROFICIENCY: u8 = 8;
pub const SKILLED_PROFICIENCY: u8 = 6;

pub const SAME_CITY_POINTS: u32 = 100;
pub const SAME_STATE_POINTS: u32 = 50;

/// Experience tiers as (minimum years, points), checked top-down.
pub const EXPERIENCE_TIERS: [(u32, u32); 3] = [(10, 100), (5, 70), (2, 40)];
/// Points for fewer years than the lowest tier.
pub const EXPERIENCE_FLOOR_POINTS: u32 = 20;

/// Certification tiers as (minimum active certifications, points), checked top-down.
pub const CERTIFICATION_TIERS: [(usize, u32); 3] = [(3, 100), (2, 70), (1, 40)];
