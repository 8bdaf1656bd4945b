use festa_common::{
    crypto::Id,
    serializer::{Reader, ReaderError, Serializer, Writer},
    time::TimestampMillis,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{fmt::{Display, Formatter}, time::Duration};
use thiserror::Error;

// Priority classes, highest first. Each class gets its own worker pool
// with class-dependent concurrency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueClass {
    Critical,
    Default,
    Low,
}

impl QueueClass {
    pub const ALL: [QueueClass; 3] = [QueueClass::Critical, QueueClass::Default, QueueClass::Low];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueClass::Critical => "critical",
            QueueClass::Default => "default",
            QueueClass::Low => "low",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "critical" => Some(QueueClass::Critical),
            "default" => Some(QueueClass::Default),
            "low" => Some(QueueClass::Low),
            _ => None,
        }
    }
}

impl Display for QueueClass {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Active,
    Retry,
    Succeeded,
    Failed,
    Archived,
}

// One unit of background work, serialized as JSON into the broker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Id,
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
    pub queue: QueueClass,
    pub max_retries: u32,
    #[serde(default)]
    pub retry_count: u32,
    pub timeout_millis: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<TimestampMillis>,
    pub state: TaskState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    pub created_at: TimestampMillis,
}

impl Task {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_millis)
    }
}

// Options accepted at enqueue time; everything unset falls back to the
// registration defaults for the task kind
#[derive(Debug, Clone, Default)]
pub struct TaskOptions {
    pub queue: Option<QueueClass>,
    pub delay: Option<Duration>,
    pub max_retries: Option<u32>,
    pub timeout: Option<Duration>,
    pub idempotency_key: Option<String>,
}

// How a handler failed. Transient errors are retried with exponential
// backoff; permanent ones are logged and the task completes, because
// retrying cannot ever succeed.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Transient: {0:#}")]
    Transient(anyhow::Error),

    #[error("Permanent: {0:#}")]
    Permanent(anyhow::Error),
}

impl TaskError {
    pub fn transient(err: impl Into<anyhow::Error>) -> Self {
        TaskError::Transient(err.into())
    }

    pub fn permanent(err: impl Into<anyhow::Error>) -> Self {
        TaskError::Permanent(err.into())
    }
}

// Archived record of a task whose retries were exhausted, retained for
// inspection and manual replay
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub task_id: Id,
    pub kind: String,
    // JSON payload, stored verbatim so replay reproduces the task
    pub payload: String,
    pub queue: QueueClass,
    pub last_error: String,
    pub retry_count: u32,
    pub processed_at: TimestampMillis,
}

impl DeadLetter {
    pub fn payload_value(&self) -> Value {
        serde_json::from_str(&self.payload).unwrap_or(Value::Null)
    }
}

impl Serializer for QueueClass {
    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        match reader.read_u8()? {
            0 => Ok(QueueClass::Critical),
            1 => Ok(QueueClass::Default),
            2 => Ok(QueueClass::Low),
            _ => Err(ReaderError::InvalidValue),
        }
    }

    fn write(&self, writer: &mut Writer) {
        writer.write_u8(match self {
            QueueClass::Critical => 0,
            QueueClass::Default => 1,
            QueueClass::Low => 2,
        });
    }

    fn size(&self) -> usize {
        1
    }
}

impl Serializer for DeadLetter {
    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(Self {
            task_id: Id::read(reader)?,
            kind: reader.read_string()?,
            payload: {
                // Payloads may exceed the 255-byte string limit
                let size = reader.read_u32()? as usize;
                let bytes = reader.read_bytes(size)?;
                String::from_utf8(bytes.to_vec()).map_err(|_| ReaderError::InvalidString)?
            },
            queue: QueueClass::read(reader)?,
            last_error: {
                let size = reader.read_u32()? as usize;
                let bytes = reader.read_bytes(size)?;
                String::from_utf8(bytes.to_vec()).map_err(|_| ReaderError::InvalidString)?
            },
            retry_count: reader.read_u32()?,
            processed_at: reader.read_u64()?,
        })
    }

    fn write(&self, writer: &mut Writer) {
        self.task_id.write(writer);
        writer.write_string(&self.kind);
        writer.write_u32(self.payload.len() as u32);
        writer.write_bytes(self.payload.as_bytes());
        self.queue.write(writer);
        writer.write_u32(self.last_error.len() as u32);
        writer.write_bytes(self.last_error.as_bytes());
        writer.write_u32(self.retry_count);
        writer.write_u64(&self.processed_at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_json_roundtrip() {
        let task = Task {
            id: Id::random(),
            kind: "sms.send".to_string(),
            payload: serde_json::json!({"to": "+33600000001", "text": "hi"}),
            queue: QueueClass::Default,
            max_retries: 3,
            retry_count: 1,
            timeout_millis: 30_000,
            scheduled_at: None,
            state: TaskState::Retry,
            idempotency_key: Some("sms-42".to_string()),
            created_at: 1_750_000_000_000,
        };

        let json = serde_json::to_string(&task).unwrap();
        let back: Task = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, task.id);
        assert_eq!(back.kind, "sms.send");
        assert_eq!(back.queue, QueueClass::Default);
        assert_eq!(back.retry_count, 1);
        assert_eq!(back.state, TaskState::Retry);
    }

    #[test]
    fn test_dead_letter_roundtrip() {
        let entry = DeadLetter {
            task_id: Id::random(),
            kind: "email.send".to_string(),
            payload: r#"{"to":["a@b.c"]}"#.to_string(),
            queue: QueueClass::Default,
            last_error: "Transient: smtp timeout".to_string(),
            retry_count: 3,
            processed_at: 1_750_000_000_000,
        };

        let decoded = DeadLetter::from_bytes(&entry.to_bytes()).unwrap();
        assert_eq!(decoded.task_id, entry.task_id);
        assert_eq!(decoded.payload, entry.payload);
        assert_eq!(decoded.retry_count, 3);
        assert_eq!(decoded.payload_value()["to"][0], "a@b.c");
    }

    #[test]
    fn test_queue_class_names() {
        for class in QueueClass::ALL {
            assert_eq!(QueueClass::from_str(class.as_str()), Some(class));
        }
        assert_eq!(QueueClass::from_str("urgent"), None);
    }
}
