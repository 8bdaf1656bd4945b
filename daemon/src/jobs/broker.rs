use super::task::{QueueClass, Task};
use async_trait::async_trait;
use festa_common::time::TimestampMillis;
use redis::AsyncCommands;
use std::{
    collections::{HashMap, VecDeque},
    sync::Mutex,
    time::Duration,
};
use thiserror::Error;
use tokio::sync::Notify;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error(transparent)]
    Redis(#[from] redis::RedisError),

    #[error("Task encoding failed: {0}")]
    Codec(#[from] serde_json::Error),
}

// The queue broker port: Redis-compatible lists for the ready queues,
// a sorted set for delayed work, plain KV for enqueue deduplication.
// Best-effort infrastructure; never the source of truth for money.
#[async_trait]
pub trait QueueBroker: Send + Sync + 'static {
    async fn push(&self, task: &Task) -> Result<(), BrokerError>;

    // Blocking pop with a timeout; None when nothing arrived in time
    async fn pop(&self, queue: QueueClass, wait: Duration) -> Result<Option<Task>, BrokerError>;

    // Park a task until its fire time
    async fn schedule(&self, task: &Task, fire_at: TimestampMillis) -> Result<(), BrokerError>;

    // Remove and return tasks whose fire time has passed
    async fn take_due(
        &self,
        now: TimestampMillis,
        limit: usize,
    ) -> Result<Vec<Task>, BrokerError>;

    // Enqueue-level idempotency: true when the key was free and is now
    // reserved for the TTL
    async fn try_reserve_key(&self, key: &str, ttl: Duration) -> Result<bool, BrokerError>;

    async fn queue_len(&self, queue: QueueClass) -> Result<usize, BrokerError>;
}

fn queue_key(queue: QueueClass) -> String {
    format!("festa:queue:{}", queue)
}

const SCHEDULED_KEY: &str = "festa:scheduled";

fn idempotency_key(key: &str) -> String {
    format!("festa:idem:{}", key)
}

// Production broker backed by Redis
pub struct RedisBroker {
    connection: redis::aio::ConnectionManager,
}

impl RedisBroker {
    pub async fn connect(url: &str) -> Result<Self, BrokerError> {
        let client = redis::Client::open(url)?;
        let connection = client.get_connection_manager().await?;
        Ok(Self { connection })
    }
}

#[async_trait]
impl QueueBroker for RedisBroker {
    async fn push(&self, task: &Task) -> Result<(), BrokerError> {
        let mut conn = self.connection.clone();
        let body = serde_json::to_string(task)?;
        let _: () = conn.lpush(queue_key(task.queue), body).await?;
        Ok(())
    }

    async fn pop(&self, queue: QueueClass, wait: Duration) -> Result<Option<Task>, BrokerError> {
        let mut conn = self.connection.clone();
        let reply: Option<(String, String)> = redis::cmd("BRPOP")
            .arg(queue_key(queue))
            .arg(wait.as_secs().max(1))
            .query_async(&mut conn)
            .await?;

        match reply {
            Some((_, body)) => Ok(Some(serde_json::from_str(&body)?)),
            None => Ok(None),
        }
    }

    async fn schedule(&self, task: &Task, fire_at: TimestampMillis) -> Result<(), BrokerError> {
        let mut conn = self.connection.clone();
        let body = serde_json::to_string(task)?;
        let _: () = conn.zadd(SCHEDULED_KEY, body, fire_at).await?;
        Ok(())
    }

    async fn take_due(
        &self,
        now: TimestampMillis,
        limit: usize,
    ) -> Result<Vec<Task>, BrokerError> {
        let mut conn = self.connection.clone();
        let due: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(SCHEDULED_KEY)
            .arg("-inf")
            .arg(now)
            .arg("LIMIT")
            .arg(0)
            .arg(limit)
            .query_async(&mut conn)
            .await?;

        let mut tasks = Vec::with_capacity(due.len());
        for body in due {
            // Only the member that was actually removed is ours to run;
            // another instance may have raced us to it
            let removed: usize = conn.zrem(SCHEDULED_KEY, &body).await?;
            if removed > 0 {
                tasks.push(serde_json::from_str(&body)?);
            }
        }
        Ok(tasks)
    }

    async fn try_reserve_key(&self, key: &str, ttl: Duration) -> Result<bool, BrokerError> {
        let mut conn = self.connection.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(idempotency_key(key))
            .arg(1)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn queue_len(&self, queue: QueueClass) -> Result<usize, BrokerError> {
        let mut conn = self.connection.clone();
        Ok(conn.llen(queue_key(queue)).await?)
    }
}

// In-memory broker for tests and single-node development
#[derive(Default)]
pub struct MemoryBroker {
    inner: Mutex<MemoryState>,
    notify: Notify,
}

#[derive(Default)]
struct MemoryState {
    queues: HashMap<QueueClass, VecDeque<Task>>,
    scheduled: Vec<(TimestampMillis, Task)>,
    reserved: HashMap<String, TimestampMillis>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QueueBroker for MemoryBroker {
    async fn push(&self, task: &Task) -> Result<(), BrokerError> {
        self.inner
            .lock()
            .expect("broker lock poisoned")
            .queues
            .entry(task.queue)
            .or_default()
            .push_back(task.clone());
        self.notify.notify_waiters();
        Ok(())
    }

    async fn pop(&self, queue: QueueClass, wait: Duration) -> Result<Option<Task>, BrokerError> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            // Register for wakeups before checking, so a push landing
            // between the check and the wait is not missed
            let notified = self.notify.notified();

            if let Some(task) = self
                .inner
                .lock()
                .expect("broker lock poisoned")
                .queues
                .entry(queue)
                .or_default()
                .pop_front()
            {
                return Ok(Some(task));
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn schedule(&self, task: &Task, fire_at: TimestampMillis) -> Result<(), BrokerError> {
        self.inner
            .lock()
            .expect("broker lock poisoned")
            .scheduled
            .push((fire_at, task.clone()));
        Ok(())
    }

    async fn take_due(
        &self,
        now: TimestampMillis,
        limit: usize,
    ) -> Result<Vec<Task>, BrokerError> {
        let mut state = self.inner.lock().expect("broker lock poisoned");
        let mut due = Vec::new();
        let mut remaining = Vec::new();

        for (fire_at, task) in state.scheduled.drain(..) {
            if fire_at <= now && due.len() < limit {
                due.push(task);
            } else {
                remaining.push((fire_at, task));
            }
        }
        state.scheduled = remaining;
        Ok(due)
    }

    async fn try_reserve_key(&self, key: &str, ttl: Duration) -> Result<bool, BrokerError> {
        let now = festa_common::time::get_current_time_in_millis();
        let mut state = self.inner.lock().expect("broker lock poisoned");

        if let Some(expires) = state.reserved.get(key) {
            if *expires > now {
                return Ok(false);
            }
        }
        state
            .reserved
            .insert(key.to_string(), now + ttl.as_millis() as u64);
        Ok(true)
    }

    async fn queue_len(&self, queue: QueueClass) -> Result<usize, BrokerError> {
        Ok(self
            .inner
            .lock()
            .expect("broker lock poisoned")
            .queues
            .get(&queue)
            .map(VecDeque::len)
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::task::TaskState;
    use festa_common::crypto::Id;

    fn make_task(kind: &str, queue: QueueClass) -> Task {
        Task {
            id: Id::random(),
            kind: kind.to_string(),
            payload: serde_json::Value::Null,
            queue,
            max_retries: 3,
            retry_count: 0,
            timeout_millis: 30_000,
            scheduled_at: None,
            state: TaskState::Pending,
            idempotency_key: None,
            created_at: 0,
        }
    }

    #[tokio::test]
    async fn test_push_pop_fifo() {
        let broker = MemoryBroker::new();
        broker.push(&make_task("a", QueueClass::Default)).await.unwrap();
        broker.push(&make_task("b", QueueClass::Default)).await.unwrap();

        let first = broker
            .pop(QueueClass::Default, Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.kind, "a");

        let second = broker
            .pop(QueueClass::Default, Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.kind, "b");
    }

    #[tokio::test]
    async fn test_pop_timeout_empty() {
        let broker = MemoryBroker::new();
        let nothing = broker
            .pop(QueueClass::Low, Duration::from_millis(10))
            .await
            .unwrap();
        assert!(nothing.is_none());
    }

    #[tokio::test]
    async fn test_queues_are_separate() {
        let broker = MemoryBroker::new();
        broker.push(&make_task("a", QueueClass::Critical)).await.unwrap();

        assert!(broker
            .pop(QueueClass::Low, Duration::from_millis(10))
            .await
            .unwrap()
            .is_none());
        assert!(broker
            .pop(QueueClass::Critical, Duration::from_millis(10))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_scheduled_not_due_until_fire_time() {
        let broker = MemoryBroker::new();
        broker
            .schedule(&make_task("later", QueueClass::Default), 1_000)
            .await
            .unwrap();

        assert!(broker.take_due(999, 10).await.unwrap().is_empty());
        let due = broker.take_due(1_000, 10).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].kind, "later");

        // Taken once, gone
        assert!(broker.take_due(2_000, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reserve_key() {
        let broker = MemoryBroker::new();
        assert!(broker
            .try_reserve_key("topup:42", Duration::from_secs(60))
            .await
            .unwrap());
        assert!(!broker
            .try_reserve_key("topup:42", Duration::from_secs(60))
            .await
            .unwrap());
        assert!(broker
            .try_reserve_key("topup:43", Duration::from_secs(60))
            .await
            .unwrap());
    }
}
