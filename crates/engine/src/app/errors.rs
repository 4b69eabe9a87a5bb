use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;
use uuid::Uuid;

use rigger_infra::queue::QueueError;

pub fn queue_error_to_response(err: QueueError) -> axum::response::Response {
    tracing::error!(error = %err, "enqueue failed");
    match err {
        QueueError::WrongQueue { .. } => {
            json_error(StatusCode::BAD_REQUEST, "wrong_queue", err.to_string())
        }
        QueueError::AlreadyExists(_) => json_error(StatusCode::CONFLICT, "conflict", err.to_string()),
        QueueError::NotFound(_) => json_error(StatusCode::NOT_FOUND, "not_found", err.to_string()),
        QueueError::Storage(msg) => json_error(StatusCode::INTERNAL_SERVER_ERROR, "queue_error", msg),
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

/// Parse a path segment into a typed id, or a 400 response naming `what`.
pub fn parse_id<T>(
    raw: &str,
    what: &'static str,
    wrap: fn(Uuid) -> T,
) -> Result<T, axum::response::Response> {
    raw.parse::<Uuid>().map(wrap).map_err(|_| {
        json_error(
            StatusCode::BAD_REQUEST,
            "invalid_id",
            format!("invalid {what} id"),
        )
    })
}
