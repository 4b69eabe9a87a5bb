use std::sync::Arc;

use axum::{Extension, Json, extract::Path, http::StatusCode, response::IntoResponse};

use rigger_core::JobPostingId;
use rigger_infra::queue::EnqueueOptions;

use crate::app::{AppState, dto, errors};

/// POST /api/jobs/:job_id/match - queue matching with the queue's usual delay
pub async fn trigger_matching(
    Extension(state): Extension<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> axum::response::Response {
    let job_id = match errors::parse_id(&job_id, "job", JobPostingId::from_uuid) {
        Ok(id) => id,
        Err(res) => return res,
    };

    match state
        .queues
        .enqueue_matching(job_id, EnqueueOptions::default())
        .await
    {
        Ok(handle) => {
            tracing::info!(job_id = %job_id, task_id = %handle.id, "matching requested");
            (StatusCode::OK, Json(dto::enqueued_to_json(&handle))).into_response()
        }
        Err(err) => errors::queue_error_to_response(err),
    }
}
