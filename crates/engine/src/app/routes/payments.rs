use std::sync::Arc;

use axum::{Extension, Json, extract::Path, http::StatusCode, response::IntoResponse};

use rigger_core::SubscriptionId;
use rigger_infra::queue::EnqueueOptions;

use crate::app::{AppState, dto, errors};

/// POST /api/payments/:subscription_id/process
pub async fn process(
    Extension(state): Extension<Arc<AppState>>,
    Path(subscription_id): Path<String>,
) -> axum::response::Response {
    let subscription_id =
        match errors::parse_id(&subscription_id, "subscription", SubscriptionId::from_uuid) {
            Ok(id) => id,
            Err(res) => return res,
        };

    match state
        .queues
        .enqueue_payment(subscription_id, EnqueueOptions::default())
        .await
    {
        Ok(handle) => (StatusCode::OK, Json(dto::enqueued_to_json(&handle))).into_response(),
        Err(err) => errors::queue_error_to_response(err),
    }
}
