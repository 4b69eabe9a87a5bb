//! Marketplace data model consumed by the automation engine.
//!
//! Plain data plus the few invariants the engine relies on (which postings are
//! matchable, which certifications count as active). No IO.

pub mod automation_log;
pub mod job;
pub mod match_record;
pub mod subscription;
pub mod worker;

pub use automation_log::{ActivityMetrics, AutomationLog, AutomationLogType, LogStatus};
pub use job::{JobPosting, JobStatus, SkillRequirement};
pub use match_record::{MatchReasons, MatchRecord, MatchedSkill};
pub use subscription::{AdminUser, Subscription, SubscriptionStatus};
pub use worker::{Availability, CertificationStatus, WorkerCertification, WorkerProfile, WorkerSkill};

/// Implements `as_str` / `Display` / `FromStr` for a unit-only status enum using the
/// upper-case names stored in the database.
macro_rules! impl_status_str {
    ($t:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        impl $t {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($t::$variant => $s,)+
                }
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl core::str::FromStr for $t {
            type Err = rigger_core::DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok($t::$variant),)+
                    other => Err(rigger_core::DomainError::validation(format!(
                        "unknown {}: {other}",
                        stringify!($t)
                    ))),
                }
            }
        }
    };
}

pub(crate) use impl_status_str;
