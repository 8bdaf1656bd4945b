// Periodic analytics aggregation. Runs every 15 minutes with an empty
// payload and aggregates the recent window for every tenant into the
// external datastore; an explicit payload narrows it to one tenant.

use super::{decode_payload, fleet_session, HandlerDeps};
use crate::{
    core::storage::{TenantProvider, TransactionProvider, WalletProvider},
    jobs::{registry::RegistryBuilder, task::{QueueClass, TaskError}},
};
use festa_common::{
    api::{Paging, TimeRange},
    crypto::Id,
    time::get_current_time_in_millis,
    transaction::TransactionKind,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const KIND: &str = "analytics.aggregate";

pub const AGGREGATION_INTERVAL: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Default, Deserialize)]
struct AnalyticsPayload {
    #[serde(default)]
    tenant_id: Option<Id>,
    #[serde(default)]
    window_secs: Option<u64>,
}

#[derive(Debug, Default, Serialize)]
struct Aggregate {
    transactions: u64,
    volume_in: u64,
    volume_out: u64,
    payments: u64,
    recharges: u64,
    refunds: u64,
    cancels: u64,
    offline_share: f64,
}

pub fn register(builder: &mut RegistryBuilder, deps: &HandlerDeps) {
    let deps = deps.clone();
    builder.register(
        KIND,
        QueueClass::Low,
        2,
        Duration::from_secs(900),
        move |_ctx, payload| {
            let deps = deps.clone();
            async move {
                // Periodic dispatches carry no payload
                let payload: AnalyticsPayload = if payload.is_null() {
                    AnalyticsPayload::default()
                } else {
                    decode_payload(payload)?
                };

                let window_secs = payload.window_secs.unwrap_or(AGGREGATION_INTERVAL.as_secs());
                let now = get_current_time_in_millis();
                let range = TimeRange {
                    min_ts: Some(now.saturating_sub(window_secs * 1000)),
                    max_ts: None,
                };

                let tenants = match payload.tenant_id {
                    Some(tenant_id) => {
                        let (tenant, _, _) = fleet_session(&deps.storage, &tenant_id).await?;
                        vec![tenant]
                    }
                    None => deps
                        .storage
                        .list_tenants()
                        .await
                        .map_err(TaskError::transient)?,
                };

                for tenant in tenants {
                    let store = deps
                        .storage
                        .tenant_store(tenant.get_namespace())
                        .map_err(TaskError::transient)?;

                    let mut aggregate = Aggregate::default();
                    let mut offline = 0u64;
                    let wallets = store.list_wallets().await.map_err(TaskError::transient)?;
                    for wallet in &wallets {
                        let transactions = store
                            .list_transactions(wallet.get_id(), range, Paging::default())
                            .await
                            .map_err(TaskError::transient)?;
                        for tx in transactions {
                            aggregate.transactions += 1;
                            if tx.get_amount() > 0 {
                                aggregate.volume_in += tx.get_amount() as u64;
                            } else {
                                aggregate.volume_out += tx.get_amount().unsigned_abs();
                            }
                            if tx.is_offline_created() {
                                offline += 1;
                            }
                            match tx.get_kind() {
                                TransactionKind::Payment => aggregate.payments += 1,
                                TransactionKind::Recharge => aggregate.recharges += 1,
                                TransactionKind::Refund => aggregate.refunds += 1,
                                TransactionKind::Cancel => aggregate.cancels += 1,
                            }
                        }
                    }
                    if aggregate.transactions > 0 {
                        aggregate.offline_share = offline as f64 / aggregate.transactions as f64;
                    }

                    let key = format!("analytics/{}/{}.json", tenant.get_namespace(), now);
                    let body = serde_json::to_vec(&aggregate)
                        .map_err(|err| TaskError::permanent(anyhow::anyhow!(err)))?;
                    deps.objects
                        .put(&key, body, "application/json")
                        .await
                        .map_err(|err| TaskError::transient(anyhow::anyhow!("{}", err)))?;

                    debug!(
                        "Analytics window aggregated for {}: {} transactions",
                        tenant.get_namespace(),
                        aggregate.transactions
                    );
                }

                Ok(())
            }
        },
    );
    builder.periodic(KIND, AGGREGATION_INTERVAL);
}
