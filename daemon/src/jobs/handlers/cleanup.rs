// Housekeeping. The daily sweep closes wallets that sat at zero balance
// past the inactivity horizon and verifies the journal invariant for
// every wallet it touches; the temp sweep clears transient object-store
// artifacts every few hours.

use super::{fleet_session, HandlerDeps};
use crate::{
    core::storage::{TenantProvider, TransactionProvider, WalletProvider},
    jobs::{registry::RegistryBuilder, task::{QueueClass, TaskError}},
};
use festa_common::{
    audit::{SecurityEvent, SecurityEventKind, Severity},
    time::get_current_time_in_millis,
    wallet::WalletStatus,
};
use std::time::Duration;

pub const WALLET_KIND: &str = "cleanup.wallets";
pub const TEMP_KIND: &str = "cleanup.temp";
pub const ARCHIVE_KIND: &str = "archive.transactions";

pub const WALLET_SWEEP_INTERVAL: Duration = Duration::from_secs(24 * 3600);
pub const TEMP_SWEEP_INTERVAL: Duration = Duration::from_secs(6 * 3600);
pub const ARCHIVE_INTERVAL: Duration = Duration::from_secs(24 * 3600);

// A wallet is closable after this long without a mutation, at zero
const INACTIVITY_HORIZON_MILLIS: u64 = 90 * 24 * 3600 * 1000;

// Journal rows of closed wallets move to the cold namespace after this
const ARCHIVE_HORIZON_MILLIS: u64 = 30 * 24 * 3600 * 1000;

pub fn register(builder: &mut RegistryBuilder, deps: &HandlerDeps) {
    let wallets = deps.clone();
    builder.register(
        WALLET_KIND,
        QueueClass::Low,
        2,
        Duration::from_secs(2 * 3600),
        move |task_ctx, _payload| {
            let deps = wallets.clone();
            async move {
                let now = get_current_time_in_millis();
                let tenants = deps
                    .storage
                    .list_tenants()
                    .await
                    .map_err(TaskError::transient)?;

                let mut closed = 0;
                for tenant in tenants {
                    let (_, store, _ctx) = fleet_session(&deps.storage, tenant.get_id()).await?;

                    for wallet in store.list_wallets().await.map_err(TaskError::transient)? {
                        if task_ctx.cancellation.is_cancelled() {
                            warn!("Wallet sweep cancelled, {} closed so far", closed);
                            return Err(TaskError::transient(anyhow::anyhow!(
                                "cancelled after {} closures",
                                closed
                            )));
                        }

                        // Closed wallets are out of scope: their journal
                        // may be partially archived to cold storage
                        if !wallet.is_active() {
                            continue;
                        }

                        // Invariant check first; a diverging wallet is a
                        // fatal finding, never a cleanup candidate
                        if let Err(err) = deps
                            .ledger
                            .verify_wallet_invariant(&store, wallet.get_id())
                            .await
                        {
                            error!(
                                "CRITICAL: ledger invariant violated for wallet {}: {:#}",
                                wallet.get_id(),
                                err
                            );
                            deps.audit.emit(
                                SecurityEvent::new(
                                    SecurityEventKind::InvariantViolation,
                                    Severity::Critical,
                                    "wallet_sweep",
                                    "journal_divergence",
                                    now,
                                )
                                .with_resource(format!("wallet:{}", wallet.get_id())),
                            );
                            continue;
                        }

                        let inactive_for = now.saturating_sub(wallet.get_updated_at());
                        if wallet.is_active()
                            && wallet.get_balance() == 0
                            && inactive_for > INACTIVITY_HORIZON_MILLIS
                        {
                            let mut wallet = wallet;
                            wallet.set_status(WalletStatus::Closed);
                            store
                                .save_wallet(&wallet)
                                .await
                                .map_err(TaskError::transient)?;
                            closed += 1;
                        }
                    }
                }

                info!("Wallet sweep finished, {} wallets closed", closed);
                Ok(())
            }
        },
    );
    builder.periodic(WALLET_KIND, WALLET_SWEEP_INTERVAL);

    let temp = deps.clone();
    builder.register(
        TEMP_KIND,
        QueueClass::Low,
        2,
        Duration::from_secs(3600),
        move |_ctx, _payload| {
            let objects = temp.objects.clone();
            async move {
                let keys = objects
                    .list("tmp/")
                    .await
                    .map_err(|err| TaskError::transient(anyhow::anyhow!("{}", err)))?;
                let count = keys.len();

                for key in keys {
                    objects
                        .delete(&key)
                        .await
                        .map_err(|err| TaskError::transient(anyhow::anyhow!("{}", err)))?;
                }

                info!("Temp sweep removed {} objects", count);
                Ok(())
            }
        },
    );
    builder.periodic(TEMP_KIND, TEMP_SWEEP_INTERVAL);

    let archive = deps.clone();
    builder.register(
        ARCHIVE_KIND,
        QueueClass::Low,
        2,
        Duration::from_secs(2 * 3600),
        move |task_ctx, _payload| {
            let deps = archive.clone();
            async move {
                let cutoff = get_current_time_in_millis().saturating_sub(ARCHIVE_HORIZON_MILLIS);
                let tenants = deps
                    .storage
                    .list_tenants()
                    .await
                    .map_err(TaskError::transient)?;

                let mut moved = 0;
                for tenant in tenants {
                    let (_, store, _ctx) = fleet_session(&deps.storage, tenant.get_id()).await?;

                    // Only closed wallets: their journal is settled and
                    // no refund or cancel can ever target it again
                    for wallet in store.list_wallets().await.map_err(TaskError::transient)? {
                        if task_ctx.cancellation.is_cancelled() {
                            warn!("Archival cancelled, {} rows moved so far", moved);
                            return Err(TaskError::transient(anyhow::anyhow!(
                                "cancelled after {} rows",
                                moved
                            )));
                        }
                        if wallet.get_status() != WalletStatus::Closed {
                            continue;
                        }

                        moved += store
                            .archive_transactions(wallet.get_id(), cutoff)
                            .await
                            .map_err(TaskError::transient)?;
                    }
                }

                info!("Archival moved {} journal rows to cold storage", moved);
                Ok(())
            }
        },
    );
    builder.periodic(ARCHIVE_KIND, ARCHIVE_INTERVAL);
}
