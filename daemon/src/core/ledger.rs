use super::{
    error::LedgerError,
    storage::{StorageError, TenantStorage, TransactionMeta},
};
use crate::config::MAX_COMMIT_ATTEMPTS;
use dashmap::DashMap;
use festa_common::{
    audit::AuditRecord,
    config::{format_signed_amount, MAX_IDEMPOTENCY_KEY_SIZE, MAX_REFERENCE_SIZE},
    context::RequestContext,
    crypto::Id,
    time::get_current_time_in_millis,
    transaction::{Transaction, TransactionKind, TransactionSource},
    wallet::Wallet,
};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

// Outcome of a ledger primitive: either a freshly committed row, or the
// stored row when the idempotency key has been seen before. Callers that
// retry cannot tell the difference, which is the point.
#[derive(Debug)]
pub enum LedgerOutcome {
    Applied(Transaction),
    Duplicate(Transaction),
}

impl LedgerOutcome {
    pub fn transaction(&self) -> &Transaction {
        match self {
            LedgerOutcome::Applied(tx) | LedgerOutcome::Duplicate(tx) => tx,
        }
    }

    pub fn into_transaction(self) -> Transaction {
        match self {
            LedgerOutcome::Applied(tx) | LedgerOutcome::Duplicate(tx) => tx,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, LedgerOutcome::Duplicate(_))
    }
}

// Post-commit notification for the job fleet and the audit sink.
// Emission never rolls a commit back: the channel is bounded and
// overflow only drops the notification, not the journal row.
#[derive(Debug)]
pub struct LedgerEvent {
    pub namespace: String,
    pub actor: String,
    pub transaction: Transaction,
}

#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub cancellation_window_secs: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            cancellation_window_secs: festa_common::config::DEFAULT_CANCELLATION_WINDOW_SECS,
        }
    }
}

// The single authority over wallet state. Every balance change flows
// through here: a per-wallet async mutex serializes writers in-process
// and the storage commit double-checks the wallet version, so two
// daemon instances sharing a store cannot interleave either.
pub struct Ledger {
    locks: DashMap<(Id, Id), Arc<Mutex<()>>>,
    events: mpsc::Sender<LedgerEvent>,
    config: LedgerConfig,
}

impl Ledger {
    pub fn new(events: mpsc::Sender<LedgerEvent>, config: LedgerConfig) -> Self {
        Self {
            locks: DashMap::new(),
            events,
            config,
        }
    }

    fn lock_for(&self, tenant_id: &Id, wallet_id: &Id) -> Arc<Mutex<()>> {
        self.locks
            .entry((*tenant_id, *wallet_id))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    // Create a wallet for a user; (user, tenant) is unique
    pub async fn open_wallet(
        &self,
        ctx: &RequestContext,
        store: &dyn TenantStorage,
        user_id: Id,
        currency_label: String,
        exchange_rate_milli: u64,
    ) -> Result<Wallet, LedgerError> {
        if let Some(existing) = store.get_wallet_by_user(&user_id).await? {
            return Err(LedgerError::WalletExists(*existing.get_user_id()));
        }

        let wallet = Wallet::new(
            Id::random(),
            user_id,
            *ctx.get_tenant_id(),
            currency_label,
            exchange_rate_milli,
            get_current_time_in_millis(),
        );
        store.save_wallet(&wallet).await?;

        debug!("Opened wallet {} for user {}", wallet.get_id(), user_id);
        Ok(wallet)
    }

    pub async fn credit(
        &self,
        ctx: &RequestContext,
        store: &dyn TenantStorage,
        wallet_id: &Id,
        amount: u64,
        reference: String,
        idempotency_key: String,
        source: TransactionSource,
    ) -> Result<LedgerOutcome, LedgerError> {
        if amount == 0 {
            return Err(LedgerError::InvalidAmount);
        }

        let lock = self.lock_for(ctx.get_tenant_id(), wallet_id);
        let _guard = lock.lock().await;
        self.apply_locked(
            ctx,
            store,
            wallet_id,
            TransactionKind::Recharge,
            amount as i64,
            reference,
            idempotency_key,
            source,
            None,
        )
        .await
    }

    pub async fn debit(
        &self,
        ctx: &RequestContext,
        store: &dyn TenantStorage,
        wallet_id: &Id,
        amount: u64,
        reference: String,
        idempotency_key: String,
        source: TransactionSource,
    ) -> Result<LedgerOutcome, LedgerError> {
        if amount == 0 {
            return Err(LedgerError::InvalidAmount);
        }

        let lock = self.lock_for(ctx.get_tenant_id(), wallet_id);
        let _guard = lock.lock().await;
        self.apply_locked(
            ctx,
            store,
            wallet_id,
            TransactionKind::Payment,
            -(amount as i64),
            reference,
            idempotency_key,
            source,
            None,
        )
        .await
    }

    // Compensate part (or all) of a payment. Partial refunds accumulate;
    // the total refunded never exceeds the original amount.
    pub async fn refund(
        &self,
        ctx: &RequestContext,
        store: &dyn TenantStorage,
        transaction_id: &Id,
        amount: u64,
        reason: String,
        idempotency_key: String,
    ) -> Result<LedgerOutcome, LedgerError> {
        if amount == 0 {
            return Err(LedgerError::InvalidAmount);
        }

        let original = match store.get_transaction(transaction_id).await {
            Ok(tx) => tx,
            Err(StorageError::NotFound) => {
                return Err(LedgerError::TransactionNotFound(*transaction_id))
            }
            Err(err) => return Err(err.into()),
        };

        if !original.is_refundable() {
            return Err(LedgerError::NotRefundable(*transaction_id));
        }

        let lock = self.lock_for(ctx.get_tenant_id(), original.get_wallet_id());
        let _guard = lock.lock().await;

        // Retried refunds must stay idempotent: the stored row wins over
        // every state check below
        if let Some(stored) = store
            .get_transaction_by_idempotency(original.get_wallet_id(), &idempotency_key)
            .await?
        {
            if stored.get_kind() == TransactionKind::Refund
                && stored.get_amount() == amount as i64
                && stored.get_reference() == reason
            {
                return Ok(LedgerOutcome::Duplicate(stored));
            }
            return Err(LedgerError::IdempotencyConflict);
        }

        // Meta reads happen under the wallet lock so concurrent refunds
        // of the same row serialize
        let meta = store.get_transaction_meta(transaction_id).await?;
        if meta.cancelled {
            return Err(LedgerError::AlreadyCancelled(*transaction_id));
        }

        let remaining = original.get_amount().unsigned_abs() - meta.refunded_total;
        if remaining == 0 {
            return Err(LedgerError::AlreadyRefunded(*transaction_id));
        }
        if amount > remaining {
            return Err(LedgerError::ExceedsRemaining {
                requested: amount,
                remaining,
            });
        }

        let updated_meta = TransactionMeta {
            refunded_total: meta.refunded_total + amount,
            cancelled: false,
        };

        self.apply_locked(
            ctx,
            store,
            original.get_wallet_id(),
            TransactionKind::Refund,
            amount as i64,
            reason,
            idempotency_key,
            TransactionSource {
                operator_id: None,
                stand_id: *original.get_stand_id(),
                device_id: None,
                offline_created: false,
            },
            Some((*transaction_id, updated_meta)),
        )
        .await
    }

    // Produce a compensating row of opposite sign. Permitted within the
    // cancellation window, or by an admin with an explicit, audited
    // override.
    pub async fn cancel(
        &self,
        ctx: &RequestContext,
        store: &dyn TenantStorage,
        transaction_id: &Id,
        reason: String,
        idempotency_key: String,
        admin_override: bool,
    ) -> Result<LedgerOutcome, LedgerError> {
        let original = match store.get_transaction(transaction_id).await {
            Ok(tx) => tx,
            Err(StorageError::NotFound) => {
                return Err(LedgerError::TransactionNotFound(*transaction_id))
            }
            Err(err) => return Err(err.into()),
        };

        if !original.is_cancellable() {
            return Err(LedgerError::NotCancellable(*transaction_id));
        }

        let lock = self.lock_for(ctx.get_tenant_id(), original.get_wallet_id());
        let _guard = lock.lock().await;

        // A cancel retried under the same operator action id returns the
        // stored compensating row
        if let Some(stored) = store
            .get_transaction_by_idempotency(original.get_wallet_id(), &idempotency_key)
            .await?
        {
            if stored.get_kind() == TransactionKind::Cancel
                && stored.get_amount() == -original.get_amount()
                && stored.get_reference() == reason
            {
                return Ok(LedgerOutcome::Duplicate(stored));
            }
            return Err(LedgerError::IdempotencyConflict);
        }

        let meta = store.get_transaction_meta(transaction_id).await?;
        if meta.cancelled {
            return Err(LedgerError::AlreadyCancelled(*transaction_id));
        }
        if meta.refunded_total > 0 {
            // Money already went back through refunds
            return Err(LedgerError::NotCancellable(*transaction_id));
        }

        let now = get_current_time_in_millis();
        let window_millis = self.config.cancellation_window_secs * 1000;
        let inside_window = now.saturating_sub(original.get_created_at()) <= window_millis;
        if !inside_window {
            if !(admin_override && ctx.get_actor().is_admin()) {
                return Err(LedgerError::CancellationWindowExpired(
                    self.config.cancellation_window_secs,
                ));
            }
        }

        let outcome = self
            .apply_locked(
                ctx,
                store,
                original.get_wallet_id(),
                TransactionKind::Cancel,
                -original.get_amount(),
                reason.clone(),
                idempotency_key,
                TransactionSource::default(),
                Some((
                    *transaction_id,
                    TransactionMeta {
                        refunded_total: meta.refunded_total,
                        cancelled: true,
                    },
                )),
            )
            .await?;

        // Out-of-window cancels by admins always leave an audit trail
        if admin_override {
            if let LedgerOutcome::Applied(tx) = &outcome {
                let record = AuditRecord {
                    id: Id::random(),
                    actor: ctx.get_actor().get_subject().to_string(),
                    action: "cancel_admin_override".to_string(),
                    subject: format!("transaction:{}", transaction_id),
                    before: None,
                    after: Some(format!("compensating:{}", tx.get_id())),
                    ip: ctx.get_actor().get_ip().map(str::to_string),
                    impersonated_by: ctx.get_actor().get_impersonator().map(str::to_string),
                    created_at: now,
                };
                if let Err(err) = store.append_audit(&record).await {
                    error!("Failed to append admin override audit record: {:#}", err);
                }
            }
        }

        Ok(outcome)
    }

    // Verify the journal invariant for one wallet: amounts sum to the
    // balance and every row's balance_after matches the running sum
    pub async fn verify_wallet_invariant(
        &self,
        store: &dyn TenantStorage,
        wallet_id: &Id,
    ) -> Result<(), LedgerError> {
        let wallet = store.get_wallet(wallet_id).await?;
        let transactions = store
            .list_transactions(wallet_id, Default::default(), Default::default())
            .await?;

        let mut running: i64 = 0;
        for tx in &transactions {
            running += tx.get_amount();
            if running < 0 || tx.get_balance_after() != running as u64 {
                return Err(LedgerError::InvariantViolation(*wallet_id));
            }
        }

        if running as u64 != wallet.get_balance() {
            return Err(LedgerError::InvariantViolation(*wallet_id));
        }
        Ok(())
    }

    // The mutation core. Assumes the per-wallet lock is held.
    #[allow(clippy::too_many_arguments)]
    async fn apply_locked(
        &self,
        ctx: &RequestContext,
        store: &dyn TenantStorage,
        wallet_id: &Id,
        kind: TransactionKind,
        amount: i64,
        reference: String,
        idempotency_key: String,
        source: TransactionSource,
        meta_update: Option<(Id, TransactionMeta)>,
    ) -> Result<LedgerOutcome, LedgerError> {
        if reference.len() > MAX_REFERENCE_SIZE {
            return Err(LedgerError::ReferenceTooLong(MAX_REFERENCE_SIZE));
        }
        if idempotency_key.is_empty() || idempotency_key.len() > MAX_IDEMPOTENCY_KEY_SIZE {
            return Err(LedgerError::InvalidIdempotencyKey(MAX_IDEMPOTENCY_KEY_SIZE));
        }

        for _attempt in 0..MAX_COMMIT_ATTEMPTS {
            // Idempotency first: the same key always returns the stored
            // row verbatim, never a new one
            if let Some(stored) = store
                .get_transaction_by_idempotency(wallet_id, &idempotency_key)
                .await?
            {
                if stored.get_kind() == kind
                    && stored.get_amount() == amount
                    && stored.get_reference() == reference
                {
                    return Ok(LedgerOutcome::Duplicate(stored));
                }
                // Same key, different payload: divergence never
                // silently succeeds
                return Err(LedgerError::IdempotencyConflict);
            }

            let wallet = match store.get_wallet(wallet_id).await {
                Ok(wallet) => wallet,
                Err(StorageError::NotFound) => {
                    return Err(LedgerError::WalletNotFound(*wallet_id))
                }
                Err(err) => return Err(err.into()),
            };

            if !wallet.is_active() {
                return Err(LedgerError::WalletInactive {
                    id: *wallet_id,
                    status: wallet.get_status(),
                });
            }

            let balance_after = wallet.balance_after(amount)?;
            let now = get_current_time_in_millis();

            let mut updated = wallet.clone();
            updated.apply(balance_after, now);

            let synced_at = source.offline_created.then_some(now);
            let tx = Transaction::new(
                Id::random(),
                *wallet_id,
                kind,
                amount,
                balance_after,
                reference.clone(),
                idempotency_key.clone(),
                source.clone(),
                synced_at,
                now,
            );

            match store
                .commit_mutation(&updated, wallet.get_version(), &tx, meta_update)
                .await
            {
                Ok(()) => {
                    if log::log_enabled!(log::Level::Debug) {
                        debug!(
                            "Committed {} of {} on wallet {} (balance {} -> {})",
                            kind,
                            format_signed_amount(amount),
                            wallet_id,
                            wallet.get_balance(),
                            balance_after
                        );
                    }

                    self.post_commit(ctx, store, &tx).await;
                    return Ok(LedgerOutcome::Applied(tx));
                }
                // Another process committed under us: re-read and retry.
                // If it was the same idempotency key, the next loop
                // iteration returns the stored row.
                Err(StorageError::VersionConflict) => continue,
                Err(err) => return Err(err.into()),
            }
        }

        warn!("Gave up committing to wallet {} after {} attempts", wallet_id, MAX_COMMIT_ATTEMPTS);
        Err(LedgerError::TooManyConflicts(*wallet_id))
    }

    // Post-commit side effects. None of these can fail the mutation.
    async fn post_commit(&self, ctx: &RequestContext, store: &dyn TenantStorage, tx: &Transaction) {
        let event = LedgerEvent {
            namespace: ctx.get_namespace().to_string(),
            actor: ctx.get_actor().get_subject().to_string(),
            transaction: tx.clone(),
        };
        if self.events.try_send(event).is_err() {
            warn!("Ledger event channel full, notification dropped for tx {}", tx.get_id());
        }

        if let Some(impersonator) = ctx.get_actor().get_impersonator() {
            let record = AuditRecord {
                id: Id::random(),
                actor: ctx.get_actor().get_subject().to_string(),
                action: format!("ledger_{}", tx.get_kind()),
                subject: format!("transaction:{}", tx.get_id()),
                before: None,
                after: Some(format!("balance_after:{}", tx.get_balance_after())),
                ip: ctx.get_actor().get_ip().map(str::to_string),
                impersonated_by: Some(impersonator.to_string()),
                created_at: tx.get_created_at(),
            };
            if let Err(err) = store.append_audit(&record).await {
                error!("Failed to append impersonation audit record: {:#}", err);
            }
        }
    }
}
