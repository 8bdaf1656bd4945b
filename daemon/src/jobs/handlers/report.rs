// Report generation: a CSV of journal activity for a tenant, written to
// the object store for later download.

use super::{decode_payload, fleet_session, HandlerDeps};
use crate::{
    core::storage::{TransactionProvider, WalletProvider},
    jobs::{registry::RegistryBuilder, task::{QueueClass, TaskError}},
};
use festa_common::{
    api::{Paging, TimeRange},
    crypto::Id,
    time::get_current_time_in_millis,
};
use serde::Deserialize;
use std::time::Duration;

pub const KIND: &str = "report.generate";

#[derive(Debug, Deserialize)]
struct ReportPayload {
    tenant_id: Id,
    #[serde(default)]
    min_ts: Option<u64>,
    #[serde(default)]
    max_ts: Option<u64>,
}

pub fn register(builder: &mut RegistryBuilder, deps: &HandlerDeps) {
    let deps = deps.clone();
    builder.register(
        KIND,
        QueueClass::Low,
        2,
        Duration::from_secs(1800),
        move |task_ctx, payload| {
            let deps = deps.clone();
            async move {
                let payload: ReportPayload = decode_payload(payload)?;
                let (tenant, store, _ctx) =
                    fleet_session(&deps.storage, &payload.tenant_id).await?;

                let range = TimeRange {
                    min_ts: payload.min_ts,
                    max_ts: payload.max_ts,
                };

                let wallets = store.list_wallets().await.map_err(TaskError::transient)?;
                let mut csv = String::from(
                    "wallet_id,transaction_id,type,amount,balance_after,reference,offline,created_at\n",
                );
                let mut rows = 0;

                for wallet in &wallets {
                    if task_ctx.cancellation.is_cancelled() {
                        warn!("Report for tenant {} cancelled after {} rows", tenant.get_id(), rows);
                        return Err(TaskError::transient(anyhow::anyhow!(
                            "cancelled after {} rows",
                            rows
                        )));
                    }

                    let transactions = store
                        .list_transactions(wallet.get_id(), range, Paging::default())
                        .await
                        .map_err(TaskError::transient)?;
                    for tx in transactions {
                        csv.push_str(&format!(
                            "{},{},{},{},{},{},{},{}\n",
                            wallet.get_id(),
                            tx.get_id(),
                            tx.get_kind(),
                            tx.get_amount(),
                            tx.get_balance_after(),
                            tx.get_reference().replace(',', ";"),
                            tx.is_offline_created(),
                            tx.get_created_at(),
                        ));
                        rows += 1;
                    }
                }

                let key = format!(
                    "reports/{}/transactions-{}.csv",
                    tenant.get_namespace(),
                    get_current_time_in_millis()
                );
                deps.objects
                    .put(&key, csv.into_bytes(), "text/csv")
                    .await
                    .map_err(|err| TaskError::transient(anyhow::anyhow!("{}", err)))?;

                info!("Report {} written ({} rows)", key, rows);
                Ok(())
            }
        },
    );
}
