use super::{decode_payload, HandlerDeps};
use crate::{
    jobs::{
        registry::{RegistryBuilder, TaskContext},
        task::{QueueClass, TaskError},
    },
    providers::{SendError, SmsGateway, SMS_PERMANENT_CODES},
};
use futures::{stream, StreamExt};
use serde::Deserialize;
use std::{sync::Arc, time::Duration};

pub const KIND: &str = "sms.send";
pub const BULK_KIND: &str = "sms.bulk";

// Parallel sends inside one bulk task
const BULK_CONCURRENCY: usize = 8;

#[derive(Debug, Clone, Deserialize)]
struct SmsMessage {
    to: String,
    text: String,
}

#[derive(Debug, Deserialize)]
struct BulkSmsPayload {
    messages: Vec<SmsMessage>,
}

async fn send_one(gateway: &Arc<dyn SmsGateway>, message: &SmsMessage) -> Result<(), TaskError> {
    match gateway.send(&message.to, &message.text).await {
        Ok(provider_id) => {
            debug!("SMS to {} delivered, provider id {}", message.to, provider_id);
            Ok(())
        }
        Err(SendError::Transient(reason)) => Err(TaskError::transient(anyhow::anyhow!(reason))),
        // The defined permanent code set: unroutable, unreachable
        // handset, blocked carrier. Logged, never retried.
        Err(SendError::Permanent { code, message }) => {
            if !SMS_PERMANENT_CODES.contains(&code.as_str()) {
                warn!("SMS gateway returned undeclared permanent code {}", code);
            }
            Err(TaskError::permanent(anyhow::anyhow!("{}: {}", code, message)))
        }
    }
}

async fn send_one_owned(gateway: Arc<dyn SmsGateway>, message: SmsMessage) -> Result<(), TaskError> {
    send_one(&gateway, &message).await
}

pub fn register(builder: &mut RegistryBuilder, deps: &HandlerDeps) {
    let single = deps.clone();
    builder.register(
        KIND,
        QueueClass::Default,
        3,
        Duration::from_secs(30),
        move |_ctx, payload| {
            let gateway = single.sms.clone();
            async move {
                let message: SmsMessage = decode_payload(payload)?;
                send_one(&gateway, &message).await
            }
        },
    );

    let bulk = deps.clone();
    builder.register(
        BULK_KIND,
        QueueClass::Default,
        3,
        Duration::from_secs(600),
        move |task_ctx: TaskContext, payload| {
            let gateway = bulk.sms.clone();
            async move {
                let payload: BulkSmsPayload = decode_payload(payload)?;
                let total = payload.messages.len();

                // Bounded parallel sub-work; the cancellation check sits
                // between chunks so a stop signal lands promptly
                let mut sent = 0;
                let mut permanent_failures = 0;
                let mut transient: Option<String> = None;

                for chunk in payload.messages.chunks(BULK_CONCURRENCY) {
                    if task_ctx.cancellation.is_cancelled() {
                        warn!("Bulk SMS cancelled after {}/{} messages", sent, total);
                        return Err(TaskError::transient(anyhow::anyhow!(
                            "cancelled after {}/{} messages",
                            sent,
                            total
                        )));
                    }

                    let results = stream::iter(chunk.to_vec())
                        .map(|message| send_one_owned(gateway.clone(), message))
                        .buffer_unordered(BULK_CONCURRENCY)
                        .collect::<Vec<_>>()
                        .await;

                    for result in results {
                        match result {
                            Ok(()) => sent += 1,
                            Err(TaskError::Permanent(err)) => {
                                warn!("Bulk SMS recipient skipped: {:#}", err);
                                permanent_failures += 1;
                            }
                            Err(TaskError::Transient(err)) => {
                                transient = Some(format!("{:#}", err));
                            }
                        }
                    }
                }

                info!(
                    "Bulk SMS finished: {}/{} sent, {} permanently failed",
                    sent, total, permanent_failures
                );

                // Retry the batch when any transient failure remains;
                // already delivered messages are skipped by the gateway's
                // own dedup on retried runs
                match transient {
                    Some(reason) => Err(TaskError::transient(anyhow::anyhow!(reason))),
                    None => Ok(()),
                }
            }
        },
    );
}
