//! `rigger-matching`
//!
//! **Responsibility:** rank a worker against a job posting.
//!
//! The scorer is a pure function of its inputs (the caller supplies `now`, which
//! decides whether certifications are still active). It never reads storage and
//! never mutates anything; persisting matches is the automation engine's job.

pub mod score;
pub mod weights;

pub use score::{MatchScore, is_match, score};
pub use weights::MATCH_THRESHOLD;
