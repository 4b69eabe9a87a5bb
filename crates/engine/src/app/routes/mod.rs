use axum::{
    Router,
    routing::{get, post},
};

pub mod compliance;
pub mod jobs;
pub mod notifications;
pub mod payments;
pub mod system;

/// Router for everything under `/api`.
pub fn router() -> Router {
    Router::new()
        .route("/stats", get(system::stats))
        .route("/jobs/:job_id/match", post(jobs::trigger_matching))
        .route("/notifications", post(notifications::send))
        .route(
            "/payments/:subscription_id/process",
            post(payments::process),
        )
        .route("/compliance/:worker_id/check", post(compliance::check))
}
