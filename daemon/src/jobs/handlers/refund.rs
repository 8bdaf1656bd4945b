// Refund processing. Single refunds run on the critical queue; bulk
// refunds (mass compensation after an incident) iterate cooperatively
// and report how far they got when cancelled.

use super::{decode_payload, fleet_session, HandlerDeps};
use crate::{
    core::error::LedgerError,
    jobs::{
        registry::{RegistryBuilder, TaskContext},
        task::{QueueClass, TaskError},
    },
};
use festa_common::crypto::Id;
use serde::Deserialize;
use std::time::Duration;

pub const KIND: &str = "refund.process";
pub const BULK_KIND: &str = "refund.bulk";

#[derive(Debug, Clone, Deserialize)]
struct RefundItem {
    transaction_id: Id,
    amount: u64,
    reason: String,
    // Operator action id: keeps a retried refund single
    operation_id: String,
}

#[derive(Debug, Deserialize)]
struct RefundPayload {
    tenant_id: Id,
    #[serde(flatten)]
    item: RefundItem,
}

#[derive(Debug, Deserialize)]
struct BulkRefundPayload {
    tenant_id: Id,
    refunds: Vec<RefundItem>,
}

async fn process_one(
    deps: &HandlerDeps,
    ctx: &festa_common::context::RequestContext,
    store: &crate::core::storage::TenantStore,
    item: &RefundItem,
) -> Result<(), TaskError> {
    let result = deps
        .ledger
        .refund(
            ctx,
            store,
            &item.transaction_id,
            item.amount,
            item.reason.clone(),
            format!("refund:{}", item.operation_id),
        )
        .await;

    match result {
        Ok(outcome) => {
            info!(
                "Refund of {} on transaction {} processed (tx {}, duplicate: {})",
                item.amount,
                item.transaction_id,
                outcome.transaction().get_id(),
                outcome.is_duplicate()
            );
            Ok(())
        }
        Err(err @ LedgerError::Storage(_)) | Err(err @ LedgerError::TooManyConflicts(_)) => {
            Err(TaskError::transient(err))
        }
        // Everything else (already refunded, exceeds remaining, not
        // refundable) is a business outcome that retrying cannot change
        Err(err) => Err(TaskError::permanent(err)),
    }
}

pub fn register(builder: &mut RegistryBuilder, deps: &HandlerDeps) {
    let single = deps.clone();
    builder.register(
        KIND,
        QueueClass::Critical,
        5,
        Duration::from_secs(300),
        move |_ctx, payload| {
            let deps = single.clone();
            async move {
                let payload: RefundPayload = decode_payload(payload)?;
                let (_tenant, store, ctx) =
                    fleet_session(&deps.storage, &payload.tenant_id).await?;
                process_one(&deps, &ctx, &store, &payload.item).await
            }
        },
    );

    let bulk = deps.clone();
    builder.register(
        BULK_KIND,
        QueueClass::Critical,
        2,
        Duration::from_secs(3600),
        move |task_ctx: TaskContext, payload| {
            let deps = bulk.clone();
            async move {
                let payload: BulkRefundPayload = decode_payload(payload)?;
                let (_tenant, store, ctx) =
                    fleet_session(&deps.storage, &payload.tenant_id).await?;

                let total = payload.refunds.len();
                let mut completed = 0;
                let mut skipped = 0;

                for item in &payload.refunds {
                    if task_ctx.cancellation.is_cancelled() {
                        // Idempotent items make the resumed run cheap:
                        // already processed refunds collapse to duplicates
                        warn!(
                            "Bulk refund cancelled after {}/{} items, resubmit to resume",
                            completed, total
                        );
                        return Err(TaskError::transient(anyhow::anyhow!(
                            "cancelled after {}/{} items",
                            completed,
                            total
                        )));
                    }

                    match process_one(&deps, &ctx, &store, item).await {
                        Ok(()) => completed += 1,
                        Err(TaskError::Permanent(err)) => {
                            // One unrefundable row must not poison the rest
                            warn!(
                                "Bulk refund item {} skipped: {:#}",
                                item.transaction_id, err
                            );
                            skipped += 1;
                        }
                        Err(err) => return Err(err),
                    }
                }

                info!(
                    "Bulk refund finished: {}/{} processed, {} skipped",
                    completed, total, skipped
                );
                Ok(())
            }
        },
    );
}
