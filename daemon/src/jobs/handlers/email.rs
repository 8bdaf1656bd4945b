use super::{decode_payload, HandlerDeps};
use crate::{
    jobs::{registry::RegistryBuilder, task::{QueueClass, TaskError}},
    providers::{OutgoingMail, SendError},
};
use serde::Deserialize;
use std::time::Duration;

pub const KIND: &str = "email.send";

#[derive(Debug, Deserialize)]
struct EmailPayload {
    to: Vec<String>,
    subject: String,
    #[serde(default)]
    html: Option<String>,
    #[serde(default)]
    text: String,
}

pub fn register(builder: &mut RegistryBuilder, deps: &HandlerDeps) {
    let deps = deps.clone();
    builder.register(
        KIND,
        QueueClass::Default,
        3,
        Duration::from_secs(30),
        move |_ctx, payload| {
            let mailer = deps.mailer.clone();
            async move {
                let payload: EmailPayload = decode_payload(payload)?;
                if payload.to.is_empty() {
                    return Err(TaskError::permanent(anyhow::anyhow!("no recipients")));
                }

                let mail = OutgoingMail {
                    to: payload.to,
                    subject: payload.subject,
                    html: payload.html,
                    text: payload.text,
                    attachments: Vec::new(),
                };

                match mailer.send(&mail).await {
                    Ok(provider_id) => {
                        info!("Email delivered, provider id {}", provider_id);
                        Ok(())
                    }
                    Err(SendError::Transient(message)) => {
                        Err(TaskError::transient(anyhow::anyhow!(message)))
                    }
                    Err(err @ SendError::Permanent { .. }) => {
                        // Blocked or invalid recipients will not recover
                        Err(TaskError::permanent(err))
                    }
                }
            }
        },
    );
}
