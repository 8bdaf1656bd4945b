// Asynchronous sync batch processing: devices that submit through the
// fire-and-forget path get their batch applied by the fleet instead of
// inline. Resubmissions collapse through the batch id and the per-item
// idempotency chain exactly like the synchronous path.

use super::{decode_payload, fleet_session, HandlerDeps};
use crate::{
    core::error::SyncError,
    jobs::{registry::RegistryBuilder, task::{QueueClass, TaskError}},
};
use festa_common::{api::sync::SubmitBatchParams, crypto::Id};
use serde::Deserialize;
use std::time::Duration;

pub const KIND: &str = "sync.process_batch";

#[derive(Debug, Deserialize)]
struct SyncBatchPayload {
    tenant_id: Id,
    #[serde(flatten)]
    params: SubmitBatchParams,
}

pub fn register(builder: &mut RegistryBuilder, deps: &HandlerDeps) {
    let deps = deps.clone();
    builder.register(
        KIND,
        QueueClass::Default,
        3,
        Duration::from_secs(300),
        move |_ctx, payload| {
            let deps = deps.clone();
            async move {
                let payload: SyncBatchPayload = decode_payload(payload)?;
                let (tenant, store, ctx) =
                    fleet_session(&deps.storage, &payload.tenant_id).await?;

                match deps
                    .sync
                    .submit_batch(&ctx, &store, &tenant, payload.params)
                    .await
                {
                    Ok(result) => {
                        info!(
                            "Fleet processed sync batch {}: {}",
                            result.batch_id, result.status
                        );
                        Ok(())
                    }
                    // Another batch from the device is in flight; retry
                    // preserves per-device ordering
                    Err(err @ SyncError::DeviceBusy(_)) | Err(err @ SyncError::Cancelled) => {
                        Err(TaskError::transient(err))
                    }
                    Err(err @ SyncError::Storage(_)) => Err(TaskError::transient(err)),
                    Err(err) => Err(TaskError::permanent(err)),
                }
            }
        },
    );
}
