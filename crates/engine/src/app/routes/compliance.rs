use std::sync::Arc;

use axum::{Extension, Json, extract::Path, http::StatusCode, response::IntoResponse};

use rigger_core::WorkerProfileId;
use rigger_infra::queue::{ComplianceCheck, EnqueueOptions};

use crate::app::{AppState, dto, errors};

/// POST /api/compliance/:worker_id/check - body `{ "type": ... }` is optional
pub async fn check(
    Extension(state): Extension<Arc<AppState>>,
    Path(worker_id): Path<String>,
    body: Option<Json<dto::ComplianceCheckRequest>>,
) -> axum::response::Response {
    let worker_id = match errors::parse_id(&worker_id, "worker", WorkerProfileId::from_uuid) {
        Ok(id) => id,
        Err(res) => return res,
    };

    let requested = body.and_then(|Json(b)| b.check_type);
    let check_type = match requested.as_deref() {
        None => ComplianceCheck::Certification,
        Some(raw) => match raw.parse::<ComplianceCheck>() {
            Ok(check) => check,
            Err(msg) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_check_type", msg),
        },
    };

    match state
        .queues
        .enqueue_compliance(worker_id, check_type, EnqueueOptions::default())
        .await
    {
        Ok(handle) => (StatusCode::OK, Json(dto::enqueued_to_json(&handle))).into_response(),
        Err(err) => errors::queue_error_to_response(err),
    }
}
