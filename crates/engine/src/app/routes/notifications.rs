use std::sync::Arc;

use axum::{Extension, Json, http::StatusCode, response::IntoResponse};

use rigger_infra::queue::{EnqueueOptions, NotificationMessage};

use crate::app::{AppState, dto, errors};

/// POST /api/notifications - queue a free-form notification
pub async fn send(
    Extension(state): Extension<Arc<AppState>>,
    Json(body): Json<dto::SendNotificationRequest>,
) -> axum::response::Response {
    let kind = body.kind.filter(|k| !k.trim().is_empty());
    let recipient = body.recipient.filter(|r| !r.trim().is_empty());
    let (Some(kind), Some(recipient)) = (kind, recipient) else {
        return errors::json_error(
            StatusCode::BAD_REQUEST,
            "validation_error",
            "type and recipient are required",
        );
    };

    let message = NotificationMessage::Custom {
        kind,
        data: body.data,
    };
    match state
        .queues
        .enqueue_notification(recipient, message, EnqueueOptions::default())
        .await
    {
        Ok(handle) => (StatusCode::OK, Json(dto::enqueued_to_json(&handle))).into_response(),
        Err(err) => errors::queue_error_to_response(err),
    }
}
