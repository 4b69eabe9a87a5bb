//! Postgres-backed marketplace store.
//!
//! Reads the marketplace tables maintained by the main application and owns the
//! two automation tables (`job_matches`, `automation_logs`), created by
//! [`PostgresMarketplaceStore::migrate`].
//!
//! ## Error Mapping
//!
//! | SQLx Error | StoreError |
//! |------------|------------|
//! | PoolClosed / PoolTimedOut / Io | `Unavailable` |
//! | Decode / ColumnDecode / unknown enum text | `Decode` |
//! | anything else | `Database` |

use std::collections::HashMap;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use tracing::{debug, instrument};
use uuid::Uuid;

use rigger_core::{CompanyId, JobPostingId, SkillId, SubscriptionId, UserId, WorkerProfileId};
use rigger_marketplace::{
    ActivityMetrics, AdminUser, AutomationLog, JobPosting, MatchRecord, SkillRequirement,
    Subscription, WorkerCertification, WorkerProfile, WorkerSkill,
};

use super::{MarketplaceStore, StoreError};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS job_matches (
    id UUID PRIMARY KEY,
    job_id UUID NOT NULL,
    worker_profile_id UUID NOT NULL,
    score INTEGER NOT NULL,
    reasons JSONB NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    UNIQUE (job_id, worker_profile_id)
);

CREATE TABLE IF NOT EXISTS automation_logs (
    id UUID PRIMARY KEY,
    log_type TEXT NOT NULL,
    status TEXT NOT NULL,
    data JSONB NOT NULL,
    error TEXT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS automation_logs_status_created_idx
    ON automation_logs (status, created_at);
"#;

#[derive(Debug, Clone)]
pub struct PostgresMarketplaceStore {
    pool: PgPool,
}

impl PostgresMarketplaceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Create the tables owned by the automation engine.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    async fn skills_for_jobs(
        &self,
        job_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, Vec<SkillRequirement>>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT job_id, skill_id, required, min_experience_years
            FROM job_skills
            WHERE job_id = ANY($1)
            ORDER BY job_id, required DESC, skill_id
            "#,
        )
        .bind(job_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("job_skills", e))?;

        let mut by_job: HashMap<Uuid, Vec<SkillRequirement>> = HashMap::new();
        for row in rows {
            let job_id: Uuid = get(&row, "job_skills", "job_id")?;
            let min_years: Option<i32> = get(&row, "job_skills", "min_experience_years")?;
            by_job.entry(job_id).or_default().push(SkillRequirement {
                skill_id: SkillId::from_uuid(get(&row, "job_skills", "skill_id")?),
                required: get(&row, "job_skills", "required")?,
                min_experience_years: min_years.map(non_negative),
            });
        }
        Ok(by_job)
    }

    /// Load worker profiles (with skills and certifications) matching `filter`.
    async fn load_workers(
        &self,
        operation: &'static str,
        filter: WorkerFilter,
    ) -> Result<Vec<WorkerProfile>, StoreError> {
        let base = r#"
            SELECT w.id, w.user_id, u.email, w.city, w.state, w.years_experience, w.availability
            FROM worker_profiles w
            JOIN users u ON u.id = w.user_id
        "#;
        let (sql, id) = match filter {
            WorkerFilter::Available => (
                format!("{base} WHERE w.availability = 'AVAILABLE' ORDER BY w.id"),
                None,
            ),
            WorkerFilter::Id(id) => (format!("{base} WHERE w.id = $1"), Some(id)),
        };
        let mut query = sqlx::query(&sql);
        if let Some(id) = id {
            query = query.bind(id);
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;

        let mut workers = Vec::with_capacity(rows.len());
        for row in &rows {
            let years: Option<i32> = get(row, operation, "years_experience")?;
            let availability: String = get(row, operation, "availability")?;
            workers.push(WorkerProfile {
                id: WorkerProfileId::from_uuid(get(row, operation, "id")?),
                user_id: UserId::from_uuid(get(row, operation, "user_id")?),
                email: get(row, operation, "email")?,
                city: get(row, operation, "city")?,
                state: get(row, operation, "state")?,
                years_experience: years.map(non_negative).unwrap_or(0),
                availability: parse(operation, &availability)?,
                skills: Vec::new(),
                certifications: Vec::new(),
            });
        }
        if workers.is_empty() {
            return Ok(workers);
        }

        let ids: Vec<Uuid> = workers.iter().map(|w| *w.id.as_uuid()).collect();

        let skill_rows = sqlx::query(
            r#"
            SELECT ws.worker_profile_id, ws.skill_id, s.name, ws.proficiency, ws.years_experience
            FROM worker_skills ws
            JOIN skills s ON s.id = ws.skill_id
            WHERE ws.worker_profile_id = ANY($1)
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error(operation, e))?;

        let cert_rows = sqlx::query(
            r#"
            SELECT worker_profile_id, name, status, expires_at
            FROM certifications
            WHERE worker_profile_id = ANY($1)
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error(operation, e))?;

        let mut skills: HashMap<Uuid, Vec<WorkerSkill>> = HashMap::new();
        for row in &skill_rows {
            let proficiency: i32 = get(row, operation, "proficiency")?;
            let years: Option<i32> = get(row, operation, "years_experience")?;
            skills
                .entry(get(row, operation, "worker_profile_id")?)
                .or_default()
                .push(WorkerSkill {
                    skill_id: SkillId::from_uuid(get(row, operation, "skill_id")?),
                    name: get(row, operation, "name")?,
                    proficiency: proficiency.clamp(0, 10) as u8,
                    years_experience: years.map(non_negative),
                });
        }

        let mut certs: HashMap<Uuid, Vec<WorkerCertification>> = HashMap::new();
        for row in &cert_rows {
            let status: String = get(row, operation, "status")?;
            certs
                .entry(get(row, operation, "worker_profile_id")?)
                .or_default()
                .push(WorkerCertification {
                    name: get(row, operation, "name")?,
                    status: parse(operation, &status)?,
                    expires_at: get(row, operation, "expires_at")?,
                });
        }

        for worker in &mut workers {
            let id = *worker.id.as_uuid();
            worker.skills = skills.remove(&id).unwrap_or_default();
            worker.certifications = certs.remove(&id).unwrap_or_default();
        }
        Ok(workers)
    }

    async fn count(
        &self,
        operation: &'static str,
        sql: &str,
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let row = sqlx::query(sql)
            .bind(at)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;
        let n: i64 = get(&row, operation, "n")?;
        Ok(n.max(0) as u64)
    }

    async fn delete(
        &self,
        operation: &'static str,
        sql: &str,
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(sql)
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;
        debug!(operation, rows = result.rows_affected(), "deleted rows");
        Ok(result.rows_affected())
    }
}

enum WorkerFilter {
    Available,
    Id(Uuid),
}

#[async_trait]
impl MarketplaceStore for PostgresMarketplaceStore {
    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("ping", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(job_id = %id), err)]
    async fn job_posting(&self, id: JobPostingId) -> Result<Option<JobPosting>, StoreError> {
        const OP: &str = "job_posting";
        let row = sqlx::query(
            r#"
            SELECT j.id, j.company_id, c.name AS company_name, j.title, j.city, j.state,
                   j.pay_rate, j.status, j.created_at, j.published_at, j.application_deadline
            FROM job_postings j
            JOIN companies c ON c.id = j.company_id
            WHERE j.id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error(OP, e))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let mut skills = self.skills_for_jobs(&[*id.as_uuid()]).await?;
        let status: String = get(&row, OP, "status")?;
        Ok(Some(JobPosting {
            id,
            company_id: CompanyId::from_uuid(get(&row, OP, "company_id")?),
            company_name: get(&row, OP, "company_name")?,
            title: get(&row, OP, "title")?,
            skills: skills.remove(id.as_uuid()).unwrap_or_default(),
            city: get(&row, OP, "city")?,
            state: get(&row, OP, "state")?,
            pay_rate: get(&row, OP, "pay_rate")?,
            status: parse(OP, &status)?,
            created_at: get(&row, OP, "created_at")?,
            published_at: get(&row, OP, "published_at")?,
            application_deadline: get(&row, OP, "application_deadline")?,
        }))
    }

    async fn jobs_published_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<JobPostingId>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id FROM job_postings
            WHERE status = 'PUBLISHED' AND published_at >= $1
            ORDER BY published_at, id
            "#,
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("jobs_published_since", e))?;

        rows.iter()
            .map(|row| get(row, "jobs_published_since", "id").map(JobPostingId::from_uuid))
            .collect()
    }

    async fn available_workers(&self) -> Result<Vec<WorkerProfile>, StoreError> {
        self.load_workers("available_workers", WorkerFilter::Available)
            .await
    }

    async fn worker(&self, id: WorkerProfileId) -> Result<Option<WorkerProfile>, StoreError> {
        let mut workers = self
            .load_workers("worker", WorkerFilter::Id(*id.as_uuid()))
            .await?;
        Ok(workers.pop())
    }

    async fn workers_with_expiring_certifications(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<WorkerProfileId>, StoreError> {
        const OP: &str = "workers_with_expiring_certifications";
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT worker_profile_id FROM certifications
            WHERE status = 'ACTIVE' AND expires_at >= $1 AND expires_at <= $2
            ORDER BY worker_profile_id
            "#,
        )
        .bind(from)
        .bind(until)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error(OP, e))?;

        rows.iter()
            .map(|row| get(row, OP, "worker_profile_id").map(WorkerProfileId::from_uuid))
            .collect()
    }

    async fn subscription(&self, id: SubscriptionId) -> Result<Option<Subscription>, StoreError> {
        const OP: &str = "subscription";
        let row = sqlx::query(
            "SELECT id, company_id, status, current_period_end FROM subscriptions WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error(OP, e))?;

        row.map(|row| {
            let status: String = get(&row, OP, "status")?;
            Ok(Subscription {
                id,
                company_id: CompanyId::from_uuid(get(&row, OP, "company_id")?),
                status: parse(OP, &status)?,
                current_period_end: get(&row, OP, "current_period_end")?,
            })
        })
        .transpose()
    }

    async fn subscriptions_due_by(
        &self,
        deadline: DateTime<Utc>,
    ) -> Result<Vec<SubscriptionId>, StoreError> {
        const OP: &str = "subscriptions_due_by";
        let rows = sqlx::query(
            r#"
            SELECT id FROM subscriptions
            WHERE status = 'ACTIVE' AND current_period_end <= $1
            ORDER BY id
            "#,
        )
        .bind(deadline)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error(OP, e))?;

        rows.iter()
            .map(|row| get(row, OP, "id").map(SubscriptionId::from_uuid))
            .collect()
    }

    async fn admin_users(&self) -> Result<Vec<AdminUser>, StoreError> {
        const OP: &str = "admin_users";
        let rows = sqlx::query("SELECT id, email FROM users WHERE role = 'ADMIN' ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(OP, e))?;

        rows.iter()
            .map(|row| {
                Ok(AdminUser {
                    id: UserId::from_uuid(get(row, OP, "id")?),
                    email: get(row, OP, "email")?,
                })
            })
            .collect()
    }

    async fn activity_since(&self, since: DateTime<Utc>) -> Result<ActivityMetrics, StoreError> {
        const OP: &str = "activity_since";
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM job_postings WHERE created_at >= $1) AS new_jobs,
                (SELECT COUNT(*) FROM applications WHERE created_at >= $1) AS new_applications,
                (SELECT COUNT(*) FROM users WHERE created_at >= $1) AS new_users,
                (SELECT COUNT(*) FROM job_matches WHERE created_at >= $1) AS matches_generated
            "#,
        )
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error(OP, e))?;

        let count = |column| get::<i64>(&row, OP, column).map(|n| n.max(0) as u64);
        Ok(ActivityMetrics {
            new_jobs: count("new_jobs")?,
            new_applications: count("new_applications")?,
            new_users: count("new_users")?,
            matches_generated: count("matches_generated")?,
        })
    }

    #[instrument(skip(self, matches), fields(count = matches.len()), err)]
    async fn insert_matches(&self, matches: &[MatchRecord]) -> Result<u64, StoreError> {
        const OP: &str = "insert_matches";
        if matches.is_empty() {
            return Ok(0);
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let mut inserted = 0;
        for chunk in matches.chunks(MATCH_INSERT_CHUNK) {
            let rows = chunk
                .iter()
                .map(MatchRow::from_record)
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| StoreError::decode(OP, e.to_string()))?;
            let result = insert_matches_query(rows)
                .build()
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error(OP, e))?;
            inserted += result.rows_affected();
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(inserted)
    }

    async fn append_log(&self, log: &AutomationLog) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO automation_logs (id, log_type, status, data, error, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(log.id.as_uuid())
        .bind(log.log_type.as_str())
        .bind(log.status.as_str())
        .bind(&log.data)
        .bind(log.error.as_deref())
        .bind(log.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("append_log", e))?;
        Ok(())
    }

    async fn count_running_logs_before(&self, before: DateTime<Utc>) -> Result<u64, StoreError> {
        self.count(
            "count_running_logs_before",
            "SELECT COUNT(*) AS n FROM automation_logs WHERE status = 'RUNNING' AND created_at < $1",
            before,
        )
        .await
    }

    async fn delete_audit_logs_before(&self, before: DateTime<Utc>) -> Result<u64, StoreError> {
        self.delete(
            "delete_audit_logs_before",
            "DELETE FROM audit_logs WHERE created_at < $1",
            before,
        )
        .await
    }

    async fn delete_automation_logs_before(
        &self,
        before: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        self.delete(
            "delete_automation_logs_before",
            "DELETE FROM automation_logs WHERE created_at < $1",
            before,
        )
        .await
    }

    async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        self.delete(
            "delete_expired_sessions",
            "DELETE FROM sessions WHERE expires_at <= $1",
            now,
        )
        .await
    }
}

fn get<'r, T>(row: &'r PgRow, operation: &'static str, column: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get(column)
        .map_err(|e| StoreError::decode(operation, format!("{column}: {e}")))
}

fn parse<T>(operation: &'static str, text: &str) -> Result<T, StoreError>
where
    T: FromStr<Err = rigger_core::DomainError>,
{
    text.parse()
        .map_err(|e: rigger_core::DomainError| StoreError::decode(operation, e.to_string()))
}

fn non_negative(n: i32) -> u32 {
    n.max(0) as u32
}

/// Map SQLx errors to `StoreError`.
fn map_sqlx_error(operation: &'static str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => {
            StoreError::Unavailable(format!("{operation}: {err}"))
        }
        sqlx::Error::Decode(_) | sqlx::Error::ColumnDecode { .. } => {
            StoreError::decode(operation, err.to_string())
        }
        sqlx::Error::Database(db_err) => {
            let code = db_err.code().map(|c| c.to_string()).unwrap_or_default();
            StoreError::database(operation, format!("{} (code {code})", db_err.message()))
        }
        other => StoreError::database(operation, other.to_string()),
    }
}

/// Rows per multi-row insert. Six binds each keeps a chunk far below the
/// 65535 bind parameter limit.
const MATCH_INSERT_CHUNK: usize = 1000;

/// One `job_matches` row with owned bind values.
struct MatchRow {
    id: Uuid,
    job_id: Uuid,
    worker_profile_id: Uuid,
    score: i32,
    reasons: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl MatchRow {
    fn from_record(record: &MatchRecord) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: *record.id.as_uuid(),
            job_id: *record.job_id.as_uuid(),
            worker_profile_id: *record.worker_profile_id.as_uuid(),
            score: i32::from(record.score),
            reasons: serde_json::to_value(&record.reasons)?,
            created_at: record.created_at,
        })
    }
}

/// A single `INSERT ... VALUES (..), (..)` for `rows`; existing pairs are skipped.
fn insert_matches_query(rows: Vec<MatchRow>) -> QueryBuilder<'static, Postgres> {
    let mut query = QueryBuilder::new(
        "INSERT INTO job_matches (id, job_id, worker_profile_id, score, reasons, created_at) ",
    );
    query.push_values(rows, |mut row, m| {
        row.push_bind(m.id)
            .push_bind(m.job_id)
            .push_bind(m.worker_profile_id)
            .push_bind(m.score)
            .push_bind(m.reasons)
            .push_bind(m.created_at);
    });
    query.push(" ON CONFLICT (job_id, worker_profile_id) DO NOTHING");
    query
}

#[cfg(test)]
mod tests {
    use super::*;
    use rigger_marketplace::MatchReasons;

    fn record() -> MatchRecord {
        MatchRecord::new(
            JobPostingId::new(),
            WorkerProfileId::new(),
            MatchReasons {
                score: 80,
                reasons: vec!["Located in Denver".into()],
                matching_skills: vec![],
            },
            Utc::now(),
        )
    }

    #[test]
    fn matches_are_inserted_with_one_statement() {
        let rows = (0..3)
            .map(|_| MatchRow::from_record(&record()).unwrap())
            .collect();
        let query = insert_matches_query(rows);
        let sql = query.sql();

        assert_eq!(sql.matches("INSERT INTO job_matches").count(), 1);
        assert_eq!(sql.matches("), (").count(), 2);
        assert!(sql.contains("$18"));
        assert!(!sql.contains("$19"));
        assert!(sql.ends_with("ON CONFLICT (job_id, worker_profile_id) DO NOTHING"));
    }

    #[test]
    fn match_row_carries_score_and_reasons() {
        let record = record();
        let row = MatchRow::from_record(&record).unwrap();
        assert_eq!(row.id, *record.id.as_uuid());
        assert_eq!(row.score, 80);
        assert_eq!(row.reasons["reasons"][0], "Located in Denver");
    }
}
