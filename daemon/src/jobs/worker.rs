use super::{
    broker::{BrokerError, QueueBroker},
    registry::{Dispatcher, TaskContext},
    task::{DeadLetter, QueueClass, Task, TaskError, TaskOptions, TaskState},
};
use crate::core::storage::{DeadLetterProvider, SledStorage};
use festa_common::{
    context::{Cancellation, CancellationSource},
    crypto::Id,
    time::get_current_time_in_millis,
};
use futures::FutureExt;
use serde_json::Value;
use std::{panic::AssertUnwindSafe, sync::Arc, time::Duration};
use thiserror::Error;
use tokio::task::JoinHandle;

// How long a worker blocks on the broker before re-checking shutdown
const POP_WAIT: Duration = Duration::from_secs(1);

// Pause after a broker failure before polling again
const BROKER_ERROR_BACKOFF: Duration = Duration::from_secs(1);

// Exponential backoff between retries: 1s, 2s, 4s, ... capped
const BACKOFF_BASE_MS: u64 = 1000;
const BACKOFF_CAP_MS: u64 = 60_000;

// Reservation window for enqueue-level idempotency keys
const ENQUEUE_IDEMPOTENCY_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Error)]
pub enum EnqueueError {
    #[error("Unknown task kind: {0}")]
    UnknownKind(String),

    #[error("A task with idempotency key {0} is already enqueued")]
    Duplicate(String),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Storage(#[from] crate::core::storage::StorageError),
}

#[derive(Debug, Clone)]
pub struct FleetConfig {
    pub critical_workers: usize,
    pub default_workers: usize,
    pub low_workers: usize,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            critical_workers: crate::config::CRITICAL_WORKERS,
            default_workers: crate::config::DEFAULT_WORKERS,
            low_workers: crate::config::LOW_WORKERS,
        }
    }
}

// Enqueue handle shared with request handlers and other components.
// Registration defaults fill anything the options leave unset.
#[derive(Clone)]
pub struct Enqueuer {
    broker: Arc<dyn QueueBroker>,
    dispatcher: Dispatcher,
}

impl Enqueuer {
    pub fn new(broker: Arc<dyn QueueBroker>, dispatcher: Dispatcher) -> Self {
        Self { broker, dispatcher }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub async fn enqueue(
        &self,
        kind: &str,
        payload: Value,
        options: TaskOptions,
    ) -> Result<Task, EnqueueError> {
        let registration = self
            .dispatcher
            .get(kind)
            .ok_or_else(|| EnqueueError::UnknownKind(kind.to_string()))?;

        if let Some(key) = &options.idempotency_key {
            if !self
                .broker
                .try_reserve_key(key, ENQUEUE_IDEMPOTENCY_TTL)
                .await?
            {
                return Err(EnqueueError::Duplicate(key.clone()));
            }
        }

        let now = get_current_time_in_millis();
        let delay = options.delay.unwrap_or_default();
        let task = Task {
            id: Id::random(),
            kind: kind.to_string(),
            payload,
            queue: options.queue.unwrap_or(registration.queue),
            max_retries: options.max_retries.unwrap_or(registration.max_retries),
            retry_count: 0,
            timeout_millis: options.timeout.unwrap_or(registration.timeout).as_millis() as u64,
            scheduled_at: (!delay.is_zero()).then(|| now + delay.as_millis() as u64),
            state: TaskState::Pending,
            idempotency_key: options.idempotency_key,
            created_at: now,
        };

        if let Some(fire_at) = task.scheduled_at {
            self.broker.schedule(&task, fire_at).await?;
            debug!("Scheduled task {} ({}) for {}", task.id, task.kind, fire_at);
        } else {
            self.broker.push(&task).await?;
            debug!("Enqueued task {} ({}) on {}", task.id, task.kind, task.queue);
        }
        Ok(task)
    }
}

// The worker pools: one per queue class, sized by priority. Workers are
// stopped gracefully; a task already running completes (up to its
// timeout) before the worker exits.
pub struct JobFleet {
    shutdown: CancellationSource,
    handles: Vec<JoinHandle<()>>,
}

impl JobFleet {
    pub fn start(
        broker: Arc<dyn QueueBroker>,
        dispatcher: Dispatcher,
        storage: Arc<SledStorage>,
        config: FleetConfig,
    ) -> Self {
        let (shutdown, cancellation) = CancellationSource::new();
        let mut handles = Vec::new();

        let pools = [
            (QueueClass::Critical, config.critical_workers),
            (QueueClass::Default, config.default_workers),
            (QueueClass::Low, config.low_workers),
        ];

        for (queue, count) in pools {
            for index in 0..count {
                let broker = broker.clone();
                let dispatcher = dispatcher.clone();
                let storage = storage.clone();
                let cancellation = cancellation.clone();
                handles.push(tokio::spawn(async move {
                    worker_loop(queue, index, broker, dispatcher, storage, cancellation).await;
                }));
            }
        }

        handles.push(super::scheduler::spawn_scheduler(
            broker.clone(),
            cancellation.clone(),
        ));
        for handle in super::scheduler::spawn_periodics(
            Enqueuer::new(broker, dispatcher),
            cancellation,
        ) {
            handles.push(handle);
        }

        Self { shutdown, handles }
    }

    pub async fn stop(self) {
        info!("Stopping job fleet, waiting for active tasks");
        self.shutdown.cancel();
        for handle in self.handles {
            if let Err(err) = handle.await {
                error!("Worker task join failed: {:#}", err);
            }
        }
        info!("Job fleet stopped");
    }
}

async fn worker_loop(
    queue: QueueClass,
    index: usize,
    broker: Arc<dyn QueueBroker>,
    dispatcher: Dispatcher,
    storage: Arc<SledStorage>,
    cancellation: Cancellation,
) {
    debug!("Worker {}#{} started", queue, index);

    loop {
        if cancellation.is_cancelled() {
            break;
        }

        let mut cancel_wait = cancellation.clone();
        let popped = tokio::select! {
            result = broker.pop(queue, POP_WAIT) => result,
            _ = cancel_wait.cancelled() => break,
        };

        let task = match popped {
            Ok(Some(task)) => task,
            Ok(None) => continue,
            Err(err) => {
                warn!("Worker {}#{} broker error: {:#}", queue, index, err);
                tokio::time::sleep(BROKER_ERROR_BACKOFF).await;
                continue;
            }
        };

        // Shutdown between tasks is graceful; once a task started it
        // runs to completion or its timeout
        run_task(task, &broker, &dispatcher, &storage, &cancellation).await;
    }

    debug!("Worker {}#{} stopped", queue, index);
}

async fn run_task(
    mut task: Task,
    broker: &Arc<dyn QueueBroker>,
    dispatcher: &Dispatcher,
    storage: &Arc<SledStorage>,
    cancellation: &Cancellation,
) {
    let Some(registration) = dispatcher.get(&task.kind) else {
        error!("No handler registered for task kind {}", task.kind);
        archive(task, "unknown task kind".to_string(), storage).await;
        return;
    };

    task.state = TaskState::Active;
    let ctx = TaskContext {
        task_id: task.id,
        kind: task.kind.clone(),
        attempt: task.retry_count,
        cancellation: cancellation.clone(),
    };

    if log::log_enabled!(log::Level::Debug) {
        debug!(
            "Running task {} ({}) attempt {}/{}",
            task.id,
            task.kind,
            task.retry_count + 1,
            task.max_retries + 1
        );
    }

    let handler_future = (registration.handler)(ctx, task.payload.clone());
    let outcome = tokio::time::timeout(
        task.timeout(),
        AssertUnwindSafe(handler_future).catch_unwind(),
    )
    .await;

    match outcome {
        Ok(Ok(Ok(()))) => {
            task.state = TaskState::Succeeded;
            debug!("Task {} ({}) succeeded", task.id, task.kind);
        }
        // Permanent failures are done: retrying cannot succeed, and the
        // structured log entry is the record. No dead letter.
        Ok(Ok(Err(TaskError::Permanent(err)))) => {
            warn!(
                "Task {} ({}) failed permanently, not retrying: {:#}",
                task.id, task.kind, err
            );
            task.state = TaskState::Succeeded;
        }
        Ok(Ok(Err(TaskError::Transient(err)))) => {
            retry_or_archive(task, format!("{:#}", err), broker, storage).await;
        }
        Ok(Err(panic)) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!("Task {} ({}) panicked: {}", task.id, task.kind, message);
            retry_or_archive(task, format!("panic: {}", message), broker, storage).await;
        }
        Err(_elapsed) => {
            let error = format!("timed out after {}ms", task.timeout_millis);
            retry_or_archive(task, error, broker, storage).await;
        }
    }
}

async fn retry_or_archive(
    mut task: Task,
    error: String,
    broker: &Arc<dyn QueueBroker>,
    storage: &Arc<SledStorage>,
) {
    task.retry_count += 1;

    if task.retry_count > task.max_retries {
        error!(
            "Task {} ({}) exhausted {} retries, archiving: {}",
            task.id, task.kind, task.max_retries, error
        );
        archive(task, error, storage).await;
        return;
    }

    let exponent = task.retry_count.saturating_sub(1).min(16);
    let delay = (BACKOFF_BASE_MS << exponent).min(BACKOFF_CAP_MS);
    warn!(
        "Task {} ({}) failed (attempt {}/{}), retrying in {}ms: {}",
        task.id,
        task.kind,
        task.retry_count,
        task.max_retries + 1,
        delay,
        error
    );

    task.state = TaskState::Retry;
    let fire_at = get_current_time_in_millis() + delay;
    if let Err(err) = broker.schedule(&task, fire_at).await {
        // The broker is gone; archiving keeps the task recoverable
        error!("Failed to schedule retry for task {}: {:#}", task.id, err);
        archive(task, error, storage).await;
    }
}

async fn archive(mut task: Task, error: String, storage: &Arc<SledStorage>) {
    task.state = TaskState::Archived;
    let entry = DeadLetter {
        task_id: task.id,
        kind: task.kind.clone(),
        payload: task.payload.to_string(),
        queue: task.queue,
        last_error: error,
        retry_count: task.retry_count,
        processed_at: get_current_time_in_millis(),
    };

    if let Err(err) = storage.append_dead_letter(&entry).await {
        error!(
            "Failed to archive dead letter for task {}: {:#}",
            task.id, err
        );
    }
}

// Re-enqueue an archived task for another run, resetting its retry
// budget. Used by the dead-letter replay endpoint.
pub async fn replay_dead_letter(
    storage: &Arc<SledStorage>,
    enqueuer: &Enqueuer,
    task_id: &Id,
) -> Result<Option<Task>, EnqueueError> {
    let Some(entry) = storage.take_dead_letter(task_id).await? else {
        return Ok(None);
    };

    info!("Replaying dead letter {} ({})", entry.task_id, entry.kind);
    let task = enqueuer
        .enqueue(&entry.kind, entry.payload_value(), TaskOptions::default())
        .await?;
    Ok(Some(task))
}
