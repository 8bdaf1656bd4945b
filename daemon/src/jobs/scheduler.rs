use super::{
    broker::QueueBroker,
    task::{TaskOptions, TaskState},
    worker::Enqueuer,
};
use festa_common::{context::Cancellation, time::get_current_time_in_millis};
use serde_json::Value;
use std::{sync::Arc, time::Duration};
use tokio::task::JoinHandle;

// How often delayed tasks are promoted from the sorted set to their
// ready queues
const SCHEDULER_TICK: Duration = Duration::from_millis(500);

// How many due tasks are promoted per tick
const SCHEDULER_BATCH: usize = 64;

// Moves due tasks from the delay store onto their queues
pub fn spawn_scheduler(
    broker: Arc<dyn QueueBroker>,
    cancellation: Cancellation,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        debug!("Scheduler started");
        let mut ticker = tokio::time::interval(SCHEDULER_TICK);
        let mut cancel_wait = cancellation.clone();

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = cancel_wait.cancelled() => break,
            }

            let due = match broker
                .take_due(get_current_time_in_millis(), SCHEDULER_BATCH)
                .await
            {
                Ok(due) => due,
                Err(err) => {
                    warn!("Scheduler failed to fetch due tasks: {:#}", err);
                    continue;
                }
            };

            for mut task in due {
                task.state = TaskState::Pending;
                task.scheduled_at = None;
                if let Err(err) = broker.push(&task).await {
                    error!("Scheduler failed to promote task {}: {:#}", task.id, err);
                }
            }
        }
        debug!("Scheduler stopped");
    })
}

// One loop per periodic registration. Periodic dispatches carry an
// empty payload; handlers supply sensible defaults.
pub fn spawn_periodics(enqueuer: Enqueuer, cancellation: Cancellation) -> Vec<JoinHandle<()>> {
    let schedules: Vec<(String, Duration)> = enqueuer
        .dispatcher()
        .periodics()
        .iter()
        .map(|schedule| (schedule.kind.clone(), schedule.interval))
        .collect();

    schedules
        .into_iter()
        .map(|(kind, interval)| {
            let enqueuer = enqueuer.clone();
            let cancellation = cancellation.clone();
            tokio::spawn(async move {
                debug!("Periodic schedule for {} every {:?}", kind, interval);
                let mut ticker = tokio::time::interval(interval);
                // The first tick of a tokio interval fires immediately;
                // periodic work starts one full interval after boot
                ticker.tick().await;
                let mut cancel_wait = cancellation.clone();

                loop {
                    tokio::select! {
                        _ = ticker.tick() => {}
                        _ = cancel_wait.cancelled() => break,
                    }

                    if let Err(err) = enqueuer
                        .enqueue(&kind, Value::Null, TaskOptions::default())
                        .await
                    {
                        warn!("Periodic enqueue of {} failed: {:#}", kind, err);
                    }
                }
                debug!("Periodic schedule for {} stopped", kind);
            })
        })
        .collect()
}
