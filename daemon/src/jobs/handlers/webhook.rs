// Outbound webhook notifications to tenant-configured endpoints.
// The interface is in place; delivery is not implemented yet.
// TODO: deliver signed payloads once tenant webhook registration lands

use super::HandlerDeps;
use crate::jobs::{registry::RegistryBuilder, task::QueueClass};
use std::time::Duration;

pub const KIND: &str = "notification.webhook";

pub fn register(builder: &mut RegistryBuilder, _deps: &HandlerDeps) {
    builder.register(
        KIND,
        QueueClass::Default,
        2,
        Duration::from_secs(30),
        move |_ctx, payload| async move {
            info!(
                "Webhook notifications are not implemented yet, dropping payload ({} bytes)",
                payload.to_string().len()
            );
            Ok(())
        },
    );
}
