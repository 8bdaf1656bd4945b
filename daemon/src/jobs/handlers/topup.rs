// Wallet top-up confirmation: consumes payment-provider confirmation
// events and credits the wallet. Critical queue; the idempotency key is
// derived from the payment intent so a confirmation delivered twice
// credits exactly once.

use super::{decode_payload, fleet_session, HandlerDeps};
use crate::{
    core::error::LedgerError,
    jobs::{registry::RegistryBuilder, task::TaskError},
};
use festa_common::{
    crypto::Id,
    transaction::TransactionSource,
};
use serde::Deserialize;
use std::time::Duration;

pub const KIND: &str = "wallet.topup";

#[derive(Debug, Deserialize)]
struct TopupPayload {
    tenant_id: Id,
    wallet_id: Id,
    amount: u64,
    intent_ref: String,
}

pub fn register(builder: &mut RegistryBuilder, deps: &HandlerDeps) {
    let deps = deps.clone();
    builder.register(
        KIND,
        crate::jobs::task::QueueClass::Critical,
        5,
        Duration::from_secs(60),
        move |_ctx, payload| {
            let deps = deps.clone();
            async move {
                let payload: TopupPayload = decode_payload(payload)?;
                let (_tenant, store, ctx) =
                    fleet_session(&deps.storage, &payload.tenant_id).await?;

                let result = deps
                    .ledger
                    .credit(
                        &ctx,
                        &store,
                        &payload.wallet_id,
                        payload.amount,
                        format!("topup:{}", payload.intent_ref),
                        format!("topup:{}", payload.intent_ref),
                        TransactionSource::default(),
                    )
                    .await;

                match result {
                    Ok(outcome) => {
                        info!(
                            "Top-up of {} confirmed on wallet {} (tx {}, duplicate: {})",
                            payload.amount,
                            payload.wallet_id,
                            outcome.transaction().get_id(),
                            outcome.is_duplicate()
                        );
                        Ok(())
                    }
                    // A vanished or closed wallet will not come back
                    Err(err @ LedgerError::WalletNotFound(_))
                    | Err(err @ LedgerError::WalletInactive { .. })
                    | Err(err @ LedgerError::InvalidAmount)
                    | Err(err @ LedgerError::IdempotencyConflict) => {
                        Err(TaskError::permanent(err))
                    }
                    Err(err) => Err(TaskError::transient(err)),
                }
            }
        },
    );
}
