use super::{
    audit::AuditSink,
    error::{LedgerError, SyncError},
    ledger::{Ledger, LedgerOutcome},
    storage::TenantStorage,
    verifier::{OfflineVerifier, VerifyError},
};
use festa_common::{
    api::sync::{BatchResultResponse, PendingBatchesResponse, SubmitBatchParams},
    audit::{SecurityEvent, SecurityEventKind, Severity},
    config::{MAX_BATCH_SIZE, MAX_DEVICE_ID_SIZE},
    context::RequestContext,
    crypto::Id,
    sync::{OfflineTransaction, SyncBatch, SyncItemResult},
    tenant::Tenant,
    time::get_current_time_in_millis,
    transaction::{TransactionKind, TransactionSource},
};
use lru::LruCache;
use std::{num::NonZeroUsize, sync::Arc};
use tokio::sync::Mutex;

// Recently synced (device, local id) pairs kept in memory so the common
// resubmission case skips a storage lookup
const DUPLICATE_CACHE_SIZE: usize = 8192;

// Reconciles device-captured offline transactions with the server
// ledger. Safe to call any number of times with the same input: the
// idempotency key chain guarantees at-most-once application per
// (device, local id).
pub struct SyncEngine {
    ledger: Arc<Ledger>,
    verifier: OfflineVerifier,
    audit: AuditSink,
    duplicates: Mutex<LruCache<String, Id>>,
}

impl SyncEngine {
    pub fn new(ledger: Arc<Ledger>, verifier: OfflineVerifier, audit: AuditSink) -> Self {
        Self {
            ledger,
            verifier,
            audit,
            duplicates: Mutex::new(LruCache::new(
                NonZeroUsize::new(DUPLICATE_CACHE_SIZE).expect("cache size is non-zero"),
            )),
        }
    }

    pub async fn submit_batch(
        &self,
        ctx: &RequestContext,
        store: &dyn TenantStorage,
        tenant: &Tenant,
        params: SubmitBatchParams,
    ) -> Result<BatchResultResponse, SyncError> {
        if params.transactions.is_empty() {
            return Err(SyncError::EmptyBatch);
        }
        if params.transactions.len() > MAX_BATCH_SIZE {
            return Err(SyncError::BatchTooLarge(MAX_BATCH_SIZE));
        }
        if params.device_id.is_empty() || params.device_id.len() > MAX_DEVICE_ID_SIZE {
            return Err(SyncError::InvalidDeviceId(MAX_DEVICE_ID_SIZE));
        }

        // Idempotent resubmit: a terminal batch returns the stored
        // result; a batch stuck in processing (earlier crash or cancel)
        // is reprocessed from scratch, which is safe under idempotency
        if let Some(existing) = store.get_sync_batch(&params.batch_id).await? {
            if existing.get_status().is_terminal() {
                debug!("Batch {} resubmitted, returning stored result", params.batch_id);
                return Ok(BatchResultResponse::from(&existing));
            }
        }

        // One batch in flight per device; order across batches is the
        // device's responsibility and ours to preserve
        if store
            .has_processing_batch(params.device_id.as_str(), &params.batch_id)
            .await?
        {
            return Err(SyncError::DeviceBusy(params.device_id));
        }

        let mut batch = SyncBatch::new(
            params.batch_id,
            params.device_id.clone(),
            *tenant.get_id(),
            get_current_time_in_millis(),
        );
        store.save_sync_batch(&batch).await?;

        info!(
            "Processing sync batch {} from device {} ({} transactions)",
            params.batch_id,
            params.device_id,
            params.transactions.len()
        );

        for tx in &params.transactions {
            // A cancelled submission resumes on resubmit; nothing
            // half-applied is possible because every item commits
            // under its own idempotency key
            if ctx.is_cancelled() {
                store.save_sync_batch(&batch).await?;
                return Err(SyncError::Cancelled);
            }

            let result = self.process_item(ctx, store, tenant, tx).await?;
            batch.push_result(result);
        }

        batch.complete(get_current_time_in_millis());
        store.save_sync_batch(&batch).await?;

        info!(
            "Batch {} finished: {} ({} ok, {} duplicate, {} conflict, {} rejected)",
            batch.get_id(),
            batch.get_status(),
            batch.get_summary().success,
            batch.get_summary().duplicates,
            batch.get_summary().conflicts,
            batch.get_summary().rejected,
        );
        Ok(BatchResultResponse::from(&batch))
    }

    pub async fn get_batch(
        &self,
        store: &dyn TenantStorage,
        batch_id: &Id,
    ) -> Result<Option<BatchResultResponse>, SyncError> {
        Ok(store
            .get_sync_batch(batch_id)
            .await?
            .map(|batch| BatchResultResponse::from(&batch)))
    }

    pub async fn list_pending(
        &self,
        store: &dyn TenantStorage,
        device_id: &str,
    ) -> Result<PendingBatchesResponse, SyncError> {
        let batches = store.list_device_batches(device_id).await?;
        Ok(PendingBatchesResponse {
            device_id: device_id.to_string(),
            batch_ids: batches
                .iter()
                .filter(|batch| !batch.get_status().is_terminal())
                .map(|batch| *batch.get_id())
                .collect(),
        })
    }

    // One offline transaction through the pipeline: signature, duplicate
    // detection, wallet lookup, ledger application, classification
    async fn process_item(
        &self,
        ctx: &RequestContext,
        store: &dyn TenantStorage,
        tenant: &Tenant,
        tx: &OfflineTransaction,
    ) -> Result<SyncItemResult, SyncError> {
        let now = get_current_time_in_millis();

        if let Err(err) = self.verifier.verify(tx, tenant, ctx.get_tenant_id(), now) {
            let reason = match err {
                VerifyError::BadSignature => "bad_signature",
                VerifyError::Expired => "expired",
                VerifyError::WrongTenant => "wrong_tenant",
            };
            self.emit_rejected(ctx, tx, reason);
            return Ok(SyncItemResult::rejected(tx.local_id.clone(), reason));
        }

        // Duplicate by (device, local id), across all prior batches and
        // synced rows of this tenant
        let derived_key = tx.idempotency_key();
        if let Some(existing) = self.duplicates.lock().await.get(&derived_key) {
            return Ok(SyncItemResult::duplicate(tx.local_id.clone(), *existing));
        }
        if let Some(existing) = store
            .find_offline_duplicate(&tx.device_id, &tx.local_id)
            .await?
        {
            self.duplicates.lock().await.put(derived_key, existing);
            return Ok(SyncItemResult::duplicate(tx.local_id.clone(), existing));
        }

        if !store.has_wallet(&tx.wallet_id).await? {
            self.emit_rejected(ctx, tx, "unknown_wallet");
            return Ok(SyncItemResult::rejected(
                tx.local_id.clone(),
                "unknown_wallet",
            ));
        }

        let source = TransactionSource {
            stand_id: tx.stand_id,
            operator_id: tx.staff_id,
            device_id: Some(tx.device_id.clone()),
            offline_created: true,
        };

        let outcome = match tx.kind {
            TransactionKind::Recharge => {
                self.ledger
                    .credit(
                        ctx,
                        store,
                        &tx.wallet_id,
                        tx.amount,
                        tx.local_id.clone(),
                        derived_key.clone(),
                        source,
                    )
                    .await
            }
            _ => {
                self.ledger
                    .debit(
                        ctx,
                        store,
                        &tx.wallet_id,
                        tx.amount,
                        tx.local_id.clone(),
                        derived_key.clone(),
                        source,
                    )
                    .await
            }
        };

        match outcome {
            Ok(LedgerOutcome::Applied(server_tx)) => {
                self.duplicates
                    .lock()
                    .await
                    .put(derived_key, *server_tx.get_id());
                Ok(SyncItemResult::success(
                    tx.local_id.clone(),
                    *server_tx.get_id(),
                ))
            }
            Ok(LedgerOutcome::Duplicate(server_tx)) => {
                self.duplicates
                    .lock()
                    .await
                    .put(derived_key, *server_tx.get_id());
                Ok(SyncItemResult::duplicate(
                    tx.local_id.clone(),
                    *server_tx.get_id(),
                ))
            }
            // Server wins: the offline debit is not applied, the device
            // reconciles. A later batch that adds funds first may let a
            // resubmission succeed.
            Err(LedgerError::InsufficientBalance { need, have }) => {
                self.audit.emit(
                    SecurityEvent::new(
                        SecurityEventKind::SyncConflict,
                        Severity::Info,
                        "sync_item",
                        "insufficient_balance",
                        now,
                    )
                    .with_actor(ctx.get_actor().get_subject())
                    .with_resource(format!("wallet:{}", tx.wallet_id))
                    .with_details(format!("need {} have {}", need, have)),
                );
                Ok(SyncItemResult::conflict(
                    tx.local_id.clone(),
                    "insufficient_balance",
                ))
            }
            Err(LedgerError::WalletInactive { .. }) => {
                self.emit_rejected(ctx, tx, "wallet_closed");
                Ok(SyncItemResult::rejected(
                    tx.local_id.clone(),
                    "wallet_closed",
                ))
            }
            // Signed replay with a diverging payload; suspicious enough
            // to record
            Err(LedgerError::IdempotencyConflict) => {
                self.emit_rejected(ctx, tx, "idempotency_conflict");
                Ok(SyncItemResult::rejected(
                    tx.local_id.clone(),
                    "idempotency_conflict",
                ))
            }
            Err(LedgerError::InvalidAmount) => {
                self.emit_rejected(ctx, tx, "invalid_amount");
                Ok(SyncItemResult::rejected(
                    tx.local_id.clone(),
                    "invalid_amount",
                ))
            }
            Err(LedgerError::Storage(err)) => Err(SyncError::Storage(err)),
            Err(err) => {
                warn!(
                    "Unexpected ledger outcome for offline tx {} from {}: {:#}",
                    tx.local_id, tx.device_id, err
                );
                self.emit_rejected(ctx, tx, "internal");
                Ok(SyncItemResult::rejected(tx.local_id.clone(), "internal"))
            }
        }
    }

    fn emit_rejected(&self, ctx: &RequestContext, tx: &OfflineTransaction, reason: &str) {
        self.audit.emit(
            SecurityEvent::new(
                SecurityEventKind::SyncRejected,
                Severity::Warning,
                "sync_item",
                reason,
                get_current_time_in_millis(),
            )
            .with_actor(ctx.get_actor().get_subject())
            .with_resource(format!("device:{}:{}", tx.device_id, tx.local_id)),
        );
    }
}
