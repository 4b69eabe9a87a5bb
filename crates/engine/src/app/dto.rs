use serde::Deserialize;
use serde_json::{Value as JsonValue, json};

use rigger_infra::queue::{QueueCounts, QueueName, TaskHandle};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct SendNotificationRequest {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub recipient: Option<String>,
    #[serde(default)]
    pub data: JsonValue,
}

#[derive(Debug, Default, Deserialize)]
pub struct ComplianceCheckRequest {
    #[serde(rename = "type")]
    pub check_type: Option<String>,
}

// -------------------------
// Response mapping
// -------------------------

pub fn enqueued_to_json(handle: &TaskHandle) -> JsonValue {
    json!({
        "success": true,
        "task_id": handle.id.to_string(),
        "queue": handle.queue.as_str(),
        "task_name": handle.task_name,
        "available_at": handle.available_at.to_rfc3339(),
    })
}

/// `{ "<queue>": { waiting, delayed, active, completed, failed }, ... }`
pub fn counts_to_json(counts: &[(QueueName, QueueCounts)]) -> JsonValue {
    let map = counts
        .iter()
        .map(|(queue, counts)| (queue.as_str().to_string(), json!(counts)))
        .collect::<serde_json::Map<_, _>>();
    JsonValue::Object(map)
}
