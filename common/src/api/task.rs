use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueParams {
    // Registered task kind, e.g. "email.send"
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueResponse {
    pub task_id: String,
    pub queue: String,
}

// Archived record of a task whose retries were exhausted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterResponse {
    pub task_id: String,
    pub kind: String,
    pub payload: Value,
    pub last_error: String,
    pub retry_count: u32,
    pub processed_at: u64,
}
