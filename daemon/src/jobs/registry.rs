use super::task::{QueueClass, TaskError};
use festa_common::{context::Cancellation, crypto::Id};
use futures::future::BoxFuture;
use indexmap::IndexMap;
use serde_json::Value;
use std::{future::Future, sync::Arc, time::Duration};

// What a running handler sees: identity of the task, which attempt this
// is, and the cooperative cancellation signal it must honor
#[derive(Clone)]
pub struct TaskContext {
    pub task_id: Id,
    pub kind: String,
    pub attempt: u32,
    pub cancellation: Cancellation,
}

pub type TaskHandler =
    Arc<dyn Fn(TaskContext, Value) -> BoxFuture<'static, Result<(), TaskError>> + Send + Sync>;

// Defaults attached to a task kind at registration time
pub struct Registration {
    pub handler: TaskHandler,
    pub queue: QueueClass,
    pub max_retries: u32,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct PeriodicSchedule {
    pub kind: String,
    pub interval: Duration,
}

// Handler and periodic registration happen once at startup through this
// builder; workers only ever see the sealed, immutable dispatcher.
#[derive(Default)]
pub struct RegistryBuilder {
    handlers: IndexMap<String, Registration>,
    periodics: Vec<PeriodicSchedule>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F, Fut>(
        &mut self,
        kind: &str,
        queue: QueueClass,
        max_retries: u32,
        timeout: Duration,
        handler: F,
    ) -> &mut Self
    where
        F: Fn(TaskContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        debug_assert!(
            !self.handlers.contains_key(kind),
            "task kind registered twice: {}",
            kind
        );

        let handler: TaskHandler = Arc::new(move |ctx, payload| Box::pin(handler(ctx, payload)));
        self.handlers.insert(
            kind.to_string(),
            Registration {
                handler,
                queue,
                max_retries,
                timeout,
            },
        );
        self
    }

    // Register a fixed-interval schedule for an already registered kind.
    // Periodic dispatches carry an empty payload; the handler supplies
    // its own defaults.
    pub fn periodic(&mut self, kind: &str, interval: Duration) -> &mut Self {
        debug_assert!(
            self.handlers.contains_key(kind),
            "periodic schedule for unregistered kind: {}",
            kind
        );
        self.periodics.push(PeriodicSchedule {
            kind: kind.to_string(),
            interval,
        });
        self
    }

    pub fn build(self) -> Dispatcher {
        Dispatcher {
            handlers: Arc::new(self.handlers),
            periodics: Arc::from(self.periodics),
        }
    }
}

// Immutable kind -> handler map, cheap to clone into every worker
#[derive(Clone)]
pub struct Dispatcher {
    handlers: Arc<IndexMap<String, Registration>>,
    periodics: Arc<[PeriodicSchedule]>,
}

impl Dispatcher {
    pub fn get(&self, kind: &str) -> Option<&Registration> {
        self.handlers.get(kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    pub fn periodics(&self) -> &[PeriodicSchedule] {
        &self.periodics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_lookup() {
        let mut builder = RegistryBuilder::new();
        builder.register(
            "email.send",
            QueueClass::Default,
            3,
            Duration::from_secs(30),
            |_ctx, _payload| async { Ok(()) },
        );
        builder.periodic("email.send", Duration::from_secs(60));

        let dispatcher = builder.build();
        let registration = dispatcher.get("email.send").unwrap();
        assert_eq!(registration.queue, QueueClass::Default);
        assert_eq!(registration.max_retries, 3);
        assert_eq!(dispatcher.periodics().len(), 1);
        assert!(dispatcher.get("email.unknown").is_none());
    }

    #[tokio::test]
    async fn test_handler_invocation() {
        let mut builder = RegistryBuilder::new();
        builder.register(
            "echo",
            QueueClass::Low,
            0,
            Duration::from_secs(1),
            |_ctx, payload| async move {
                if payload["fail"].as_bool().unwrap_or(false) {
                    Err(TaskError::transient(anyhow::anyhow!("asked to fail")))
                } else {
                    Ok(())
                }
            },
        );
        let dispatcher = builder.build();
        let registration = dispatcher.get("echo").unwrap();

        let ctx = TaskContext {
            task_id: Id::random(),
            kind: "echo".to_string(),
            attempt: 0,
            cancellation: Cancellation::never(),
        };

        let ok = (registration.handler)(ctx.clone(), serde_json::json!({}));
        assert!(ok.await.is_ok());

        let err = (registration.handler)(ctx, serde_json::json!({"fail": true}));
        assert!(matches!(err.await, Err(TaskError::Transient(_))));
    }
}
