use super::{
    AuditProvider, DeadLetterProvider, SecurityEventFilter, SecurityEventProvider, StorageError,
    SyncProvider, TenantProvider, TenantStorage, TransactionMeta, TransactionProvider,
    WalletProvider,
};
use crate::jobs::task::DeadLetter;
use async_trait::async_trait;
use festa_common::{
    api::{Paging, TimeRange},
    audit::{AuditRecord, SecurityEvent},
    crypto::Id,
    serializer::Serializer,
    sync::{SyncBatch, SyncStatus},
    tenant::Tenant,
    transaction::Transaction,
    wallet::Wallet,
};
use sled::{
    transaction::{ConflictableTransactionError, TransactionError},
    Transactional, Tree,
};
use std::path::Path;

// Key prefixes inside the per-tenant wallets tree
const WALLET_PREFIX: u8 = b'w';
const USER_INDEX_PREFIX: u8 = b'u';

// Key prefixes inside the per-tenant transactions tree.
// Everything that must commit atomically with a journal append lives in
// this one tree so a single sled transaction covers it.
const TX_PREFIX: u8 = b't';
const ORDER_PREFIX: u8 = b'o';
const IDEMPOTENCY_PREFIX: u8 = b'i';
const DEVICE_PREFIX: u8 = b'd';
const META_PREFIX: u8 = b'm';

// Key prefixes inside the per-tenant sync tree
const BATCH_PREFIX: u8 = b'b';
const DEVICE_BATCH_PREFIX: u8 = b'v';

// Why a serial-section commit had to give up
enum AbortReason {
    WalletMissing,
    VersionConflict,
    DuplicateIdempotencyKey,
    Corrupted,
}

impl From<AbortReason> for StorageError {
    fn from(reason: AbortReason) -> Self {
        match reason {
            AbortReason::WalletMissing => StorageError::NotFound,
            // A concurrent writer landed the same idempotency key first:
            // the caller re-reads and returns the stored row
            AbortReason::VersionConflict | AbortReason::DuplicateIdempotencyKey => {
                StorageError::VersionConflict
            }
            AbortReason::Corrupted => {
                StorageError::Aborted("stored record failed to decode".to_string())
            }
        }
    }
}

fn prefixed(prefix: u8, bytes: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + 1 + bytes.len());
    key.push(prefix);
    key.push(b':');
    key.extend_from_slice(bytes);
    key
}

fn wallet_key(id: &Id) -> Vec<u8> {
    prefixed(WALLET_PREFIX, id.as_bytes())
}

fn user_index_key(user_id: &Id) -> Vec<u8> {
    prefixed(USER_INDEX_PREFIX, user_id.as_bytes())
}

fn tx_key(id: &Id) -> Vec<u8> {
    prefixed(TX_PREFIX, id.as_bytes())
}

fn meta_key(id: &Id) -> Vec<u8> {
    prefixed(META_PREFIX, id.as_bytes())
}

// Order index: wallet id + the wallet version the row committed at.
// Versions are strictly monotonic per wallet, so iterating the prefix
// walks the journal in application order.
fn order_key(wallet_id: &Id, version: u64) -> Vec<u8> {
    let mut key = prefixed(ORDER_PREFIX, wallet_id.as_bytes());
    key.extend_from_slice(&version.to_be_bytes());
    key
}

fn idempotency_key(wallet_id: &Id, key: &str) -> Vec<u8> {
    let mut out = prefixed(IDEMPOTENCY_PREFIX, wallet_id.as_bytes());
    out.extend_from_slice(key.as_bytes());
    out
}

// Device duplicate index keyed by the derived offline idempotency key,
// tenant-wide (not wallet-scoped): a device resubmitting the same
// local id against another wallet must still be caught
fn device_key(derived_key: &str) -> Vec<u8> {
    prefixed(DEVICE_PREFIX, derived_key.as_bytes())
}

fn batch_key(id: &Id) -> Vec<u8> {
    prefixed(BATCH_PREFIX, id.as_bytes())
}

fn device_batch_key(device_id: &str, batch_id: &Id) -> Vec<u8> {
    let mut key = prefixed(DEVICE_BATCH_PREFIX, device_id.as_bytes());
    key.push(0);
    key.extend_from_slice(batch_id.as_bytes());
    key
}

fn timestamped_key(timestamp: u64, id: &Id) -> Vec<u8> {
    let mut key = Vec::with_capacity(8 + 16);
    key.extend_from_slice(&timestamp.to_be_bytes());
    key.extend_from_slice(id.as_bytes());
    key
}

// Shared storage handle: tenant registry plus the cross-tenant trees
pub struct SledStorage {
    db: sled::Db,
    tenants: Tree,
    dead_letters: Tree,
    security_events: Tree,
}

impl SledStorage {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let db = sled::open(path)?;
        Ok(Self {
            tenants: db.open_tree("tenants")?,
            dead_letters: db.open_tree("dead_letters")?,
            security_events: db.open_tree("security_events")?,
            db,
        })
    }

    // Open the tenant-scoped handle. All trees carry the namespace in
    // their name: no key of another tenant is reachable through it.
    pub fn tenant_store(&self, namespace: &str) -> Result<TenantStore, StorageError> {
        Ok(TenantStore {
            namespace: namespace.to_string(),
            wallets: self.db.open_tree(format!("{}!wallets", namespace))?,
            transactions: self.db.open_tree(format!("{}!transactions", namespace))?,
            transactions_cold: self
                .db
                .open_tree(format!("{}!transactions_cold", namespace))?,
            sync: self.db.open_tree(format!("{}!sync", namespace))?,
            audit: self.db.open_tree(format!("{}!audit", namespace))?,
        })
    }

    pub async fn flush(&self) -> Result<(), StorageError> {
        self.db.flush_async().await?;
        Ok(())
    }
}

#[async_trait]
impl TenantProvider for SledStorage {
    async fn get_tenant(&self, id: &Id) -> Result<Tenant, StorageError> {
        let bytes = self.tenants.get(id.as_bytes())?.ok_or(StorageError::NotFound)?;
        Ok(Tenant::from_bytes(&bytes)?)
    }

    async fn save_tenant(&self, tenant: &Tenant) -> Result<(), StorageError> {
        self.tenants
            .insert(tenant.get_id().as_bytes(), tenant.to_bytes())?;
        Ok(())
    }

    async fn list_tenants(&self) -> Result<Vec<Tenant>, StorageError> {
        let mut tenants = Vec::new();
        for entry in self.tenants.iter() {
            let (_, bytes) = entry?;
            tenants.push(Tenant::from_bytes(&bytes)?);
        }
        Ok(tenants)
    }
}

#[async_trait]
impl SecurityEventProvider for SledStorage {
    async fn append_security_event(&self, event: &SecurityEvent) -> Result<(), StorageError> {
        self.security_events
            .insert(timestamped_key(event.timestamp, &event.id), event.to_bytes())?;
        Ok(())
    }

    async fn query_security_events(
        &self,
        filter: SecurityEventFilter,
    ) -> Result<Vec<SecurityEvent>, StorageError> {
        let start = filter.range.min_ts.unwrap_or(0).to_be_bytes().to_vec();
        let end = match filter.range.max_ts {
            // Exclusive upper bound one millisecond past the range
            Some(max) => (max + 1).to_be_bytes().to_vec(),
            None => u64::MAX.to_be_bytes().to_vec(),
        };

        let limit = filter.limit.unwrap_or(usize::MAX);
        let mut events = Vec::new();
        for entry in self.security_events.range(start..end) {
            if events.len() >= limit {
                break;
            }

            let (_, bytes) = entry?;
            let event = SecurityEvent::from_bytes(&bytes)?;

            if let Some(kind) = filter.kind {
                if event.kind != kind {
                    continue;
                }
            }
            if let Some(actor) = &filter.actor {
                if event.actor.as_deref() != Some(actor.as_str()) {
                    continue;
                }
            }
            if let Some(ip) = &filter.ip {
                if event.ip.as_deref() != Some(ip.as_str()) {
                    continue;
                }
            }

            events.push(event);
        }
        Ok(events)
    }
}

#[async_trait]
impl DeadLetterProvider for SledStorage {
    async fn append_dead_letter(&self, entry: &DeadLetter) -> Result<(), StorageError> {
        self.dead_letters
            .insert(entry.task_id.as_bytes(), entry.to_bytes())?;
        Ok(())
    }

    async fn list_dead_letters(&self, paging: Paging) -> Result<Vec<DeadLetter>, StorageError> {
        let mut entries = Vec::new();
        for entry in self.dead_letters.iter() {
            let (_, bytes) = entry?;
            entries.push(DeadLetter::from_bytes(&bytes)?);
        }
        entries.sort_by_key(|entry| entry.processed_at);

        let limit = paging.limit.unwrap_or(usize::MAX);
        Ok(entries.into_iter().skip(paging.skip).take(limit).collect())
    }

    async fn take_dead_letter(&self, task_id: &Id) -> Result<Option<DeadLetter>, StorageError> {
        match self.dead_letters.remove(task_id.as_bytes())? {
            Some(bytes) => Ok(Some(DeadLetter::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }
}

// Tenant-scoped persistence handle
pub struct TenantStore {
    namespace: String,
    wallets: Tree,
    transactions: Tree,
    // Archived journal rows; append-only like the hot journal
    transactions_cold: Tree,
    sync: Tree,
    audit: Tree,
}

impl TenantStorage for TenantStore {
    fn namespace(&self) -> &str {
        &self.namespace
    }
}

#[async_trait]
impl WalletProvider for TenantStore {
    async fn has_wallet(&self, id: &Id) -> Result<bool, StorageError> {
        Ok(self.wallets.contains_key(wallet_key(id))?)
    }

    async fn get_wallet(&self, id: &Id) -> Result<Wallet, StorageError> {
        let bytes = self
            .wallets
            .get(wallet_key(id))?
            .ok_or(StorageError::NotFound)?;
        Ok(Wallet::from_bytes(&bytes)?)
    }

    async fn get_wallet_by_user(&self, user_id: &Id) -> Result<Option<Wallet>, StorageError> {
        let Some(id_bytes) = self.wallets.get(user_index_key(user_id))? else {
            return Ok(None);
        };
        let id = Id::from_bytes(&id_bytes)?;
        Ok(Some(self.get_wallet(&id).await?))
    }

    async fn save_wallet(&self, wallet: &Wallet) -> Result<(), StorageError> {
        self.wallets
            .insert(wallet_key(wallet.get_id()), wallet.to_bytes())?;
        self.wallets.insert(
            user_index_key(wallet.get_user_id()),
            wallet.get_id().as_bytes().to_vec(),
        )?;
        Ok(())
    }

    async fn list_wallets(&self) -> Result<Vec<Wallet>, StorageError> {
        let mut wallets = Vec::new();
        for entry in self.wallets.scan_prefix([WALLET_PREFIX, b':']) {
            let (_, bytes) = entry?;
            wallets.push(Wallet::from_bytes(&bytes)?);
        }
        Ok(wallets)
    }
}

#[async_trait]
impl TransactionProvider for TenantStore {
    async fn get_transaction(&self, id: &Id) -> Result<Transaction, StorageError> {
        if let Some(bytes) = self.transactions.get(tx_key(id))? {
            return Ok(Transaction::from_bytes(&bytes)?);
        }

        // Archived rows stay readable through the cold namespace
        let bytes = self
            .transactions_cold
            .get(tx_key(id))?
            .ok_or(StorageError::NotFound)?;
        Ok(Transaction::from_bytes(&bytes)?)
    }

    async fn get_transaction_by_idempotency(
        &self,
        wallet_id: &Id,
        key: &str,
    ) -> Result<Option<Transaction>, StorageError> {
        let Some(id_bytes) = self.transactions.get(idempotency_key(wallet_id, key))? else {
            return Ok(None);
        };
        let id = Id::from_bytes(&id_bytes)?;
        Ok(Some(self.get_transaction(&id).await?))
    }

    async fn find_offline_duplicate(
        &self,
        device_id: &str,
        local_id: &str,
    ) -> Result<Option<Id>, StorageError> {
        let derived = format!(
            "{}:{}:{}",
            festa_common::config::OFFLINE_IDEMPOTENCY_PREFIX,
            device_id,
            local_id
        );
        match self.transactions.get(device_key(&derived))? {
            Some(id_bytes) => Ok(Some(Id::from_bytes(&id_bytes)?)),
            None => Ok(None),
        }
    }

    async fn list_transactions(
        &self,
        wallet_id: &Id,
        range: TimeRange,
        paging: Paging,
    ) -> Result<Vec<Transaction>, StorageError> {
        let limit = paging.limit.unwrap_or(usize::MAX);
        let mut transactions = Vec::new();
        let mut skipped = 0;

        for entry in self.transactions.scan_prefix(prefixed(ORDER_PREFIX, wallet_id.as_bytes())) {
            if transactions.len() >= limit {
                break;
            }

            let (_, id_bytes) = entry?;
            let id = Id::from_bytes(&id_bytes)?;
            let tx = self.get_transaction(&id).await?;

            if !range.contains(tx.get_created_at()) {
                continue;
            }
            if skipped < paging.skip {
                skipped += 1;
                continue;
            }

            transactions.push(tx);
        }
        Ok(transactions)
    }

    async fn sum_wallet_amounts(&self, wallet_id: &Id) -> Result<i64, StorageError> {
        let mut sum: i64 = 0;
        for entry in self.transactions.scan_prefix(prefixed(ORDER_PREFIX, wallet_id.as_bytes())) {
            let (_, id_bytes) = entry?;
            let id = Id::from_bytes(&id_bytes)?;
            let tx = self.get_transaction(&id).await?;
            sum += tx.get_amount();
        }
        Ok(sum)
    }

    async fn get_transaction_meta(&self, id: &Id) -> Result<TransactionMeta, StorageError> {
        match self.transactions.get(meta_key(id))? {
            Some(bytes) => Ok(TransactionMeta::from_bytes(&bytes)?),
            None => Ok(TransactionMeta::default()),
        }
    }

    async fn commit_mutation(
        &self,
        wallet: &Wallet,
        expected_version: u64,
        tx: &Transaction,
        meta_update: Option<(Id, TransactionMeta)>,
    ) -> Result<(), StorageError> {
        let result = (&self.wallets, &self.transactions).transaction(|(wallets, txs)| {
            let key = wallet_key(wallet.get_id());
            let current = wallets
                .get(&key)?
                .ok_or(ConflictableTransactionError::Abort(
                    AbortReason::WalletMissing,
                ))?;
            let current = Wallet::from_bytes(&current)
                .map_err(|_| ConflictableTransactionError::Abort(AbortReason::Corrupted))?;

            // The optimistic concurrency check: another writer got here
            // first if the version moved
            if current.get_version() != expected_version {
                return Err(ConflictableTransactionError::Abort(
                    AbortReason::VersionConflict,
                ));
            }

            let idem = idempotency_key(wallet.get_id(), tx.get_idempotency_key());
            if txs.get(&idem)?.is_some() {
                return Err(ConflictableTransactionError::Abort(
                    AbortReason::DuplicateIdempotencyKey,
                ));
            }

            wallets.insert(key, wallet.to_bytes())?;
            txs.insert(tx_key(tx.get_id()), tx.to_bytes())?;
            txs.insert(
                order_key(wallet.get_id(), wallet.get_version()),
                tx.get_id().as_bytes().to_vec(),
            )?;
            txs.insert(idem, tx.get_id().as_bytes().to_vec())?;

            if tx.is_offline_created() {
                txs.insert(
                    device_key(tx.get_idempotency_key()),
                    tx.get_id().as_bytes().to_vec(),
                )?;
            }

            if let Some((original_id, meta)) = &meta_update {
                txs.insert(meta_key(original_id), meta.to_bytes())?;
            }

            Ok(())
        });

        match result {
            Ok(()) => Ok(()),
            Err(TransactionError::Abort(reason)) => Err(reason.into()),
            Err(TransactionError::Storage(err)) => Err(StorageError::Sled(err)),
        }
    }

    async fn archive_transactions(
        &self,
        wallet_id: &Id,
        before: festa_common::time::TimestampMillis,
    ) -> Result<usize, StorageError> {
        // Rows are walked in application order; created_at is monotone
        // per wallet, so the first row at or past the cutoff ends the scan
        let mut candidates = Vec::new();
        for entry in self
            .transactions
            .scan_prefix(prefixed(ORDER_PREFIX, wallet_id.as_bytes()))
        {
            let (order_key_bytes, id_bytes) = entry?;
            let id = Id::from_bytes(&id_bytes)?;
            let tx = self.get_transaction(&id).await?;
            if tx.get_created_at() >= before {
                break;
            }
            candidates.push((order_key_bytes.to_vec(), id, tx));
        }

        if candidates.is_empty() {
            return Ok(0);
        }

        let moved = candidates.len();
        let result: Result<(), TransactionError<()>> = (&self.transactions, &self.transactions_cold)
            .transaction(|(hot, cold)| {
                for (order_key_bytes, id, tx) in &candidates {
                    cold.insert(tx_key(id), tx.to_bytes())?;
                    hot.remove(tx_key(id))?;
                    hot.remove(order_key_bytes.clone())?;
                }
                Ok(())
            });

        match result {
            Ok(()) => Ok(moved),
            Err(TransactionError::Abort(())) => {
                Err(StorageError::Aborted("archival aborted".to_string()))
            }
            Err(TransactionError::Storage(err)) => Err(StorageError::Sled(err)),
        }
    }
}

#[async_trait]
impl SyncProvider for TenantStore {
    async fn get_sync_batch(&self, id: &Id) -> Result<Option<SyncBatch>, StorageError> {
        match self.sync.get(batch_key(id))? {
            Some(bytes) => Ok(Some(SyncBatch::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn save_sync_batch(&self, batch: &SyncBatch) -> Result<(), StorageError> {
        self.sync
            .insert(batch_key(batch.get_id()), batch.to_bytes())?;
        self.sync.insert(
            device_batch_key(batch.get_device_id(), batch.get_id()),
            vec![batch.get_status() as u8],
        )?;
        Ok(())
    }

    async fn has_processing_batch(
        &self,
        device_id: &str,
        exclude: &Id,
    ) -> Result<bool, StorageError> {
        let mut prefix = prefixed(DEVICE_BATCH_PREFIX, device_id.as_bytes());
        prefix.push(0);

        for entry in self.sync.scan_prefix(&prefix) {
            let (key, status) = entry?;
            let batch_id = Id::from_bytes(&key[prefix.len()..])?;
            if batch_id == *exclude {
                continue;
            }
            if status.first() == Some(&(SyncStatus::Processing as u8)) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn list_device_batches(&self, device_id: &str) -> Result<Vec<SyncBatch>, StorageError> {
        let mut prefix = prefixed(DEVICE_BATCH_PREFIX, device_id.as_bytes());
        prefix.push(0);

        let mut batches = Vec::new();
        for entry in self.sync.scan_prefix(&prefix) {
            let (key, _) = entry?;
            let batch_id = Id::from_bytes(&key[prefix.len()..])?;
            if let Some(batch) = self.get_sync_batch(&batch_id).await? {
                batches.push(batch);
            }
        }
        batches.sort_by_key(|batch| batch.get_received_at());
        Ok(batches)
    }
}

#[async_trait]
impl AuditProvider for TenantStore {
    async fn append_audit(&self, record: &AuditRecord) -> Result<(), StorageError> {
        self.audit
            .insert(timestamped_key(record.created_at, &record.id), record.to_bytes())?;
        Ok(())
    }

    async fn list_audit(
        &self,
        range: TimeRange,
        paging: Paging,
    ) -> Result<Vec<AuditRecord>, StorageError> {
        let start = range.min_ts.unwrap_or(0).to_be_bytes().to_vec();
        let end = match range.max_ts {
            Some(max) => (max + 1).to_be_bytes().to_vec(),
            None => u64::MAX.to_be_bytes().to_vec(),
        };

        let limit = paging.limit.unwrap_or(usize::MAX);
        let mut records = Vec::new();
        for entry in self.audit.range(start..end).skip(paging.skip) {
            if records.len() >= limit {
                break;
            }
            let (_, bytes) = entry?;
            records.push(AuditRecord::from_bytes(&bytes)?);
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use festa_common::transaction::{TransactionKind, TransactionSource};

    fn open_store() -> (tempfile::TempDir, SledStorage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = SledStorage::open(dir.path()).unwrap();
        (dir, storage)
    }

    fn make_wallet() -> Wallet {
        Wallet::new(
            Id::random(),
            Id::random(),
            Id::random(),
            "token".to_string(),
            1000,
            1,
        )
    }

    fn make_tx(wallet: &Wallet, amount: i64, balance_after: u64, idem: &str) -> Transaction {
        make_tx_at(wallet, amount, balance_after, idem, 2)
    }

    fn make_tx_at(
        wallet: &Wallet,
        amount: i64,
        balance_after: u64,
        idem: &str,
        created_at: u64,
    ) -> Transaction {
        Transaction::new(
            Id::random(),
            *wallet.get_id(),
            TransactionKind::Payment,
            amount,
            balance_after,
            "ref".to_string(),
            idem.to_string(),
            TransactionSource::default(),
            None,
            created_at,
        )
    }

    #[tokio::test]
    async fn test_wallet_roundtrip() {
        let (_dir, storage) = open_store();
        let store = storage.tenant_store("fest").unwrap();

        let wallet = make_wallet();
        store.save_wallet(&wallet).await.unwrap();

        assert!(store.has_wallet(wallet.get_id()).await.unwrap());
        let loaded = store.get_wallet(wallet.get_id()).await.unwrap();
        assert_eq!(loaded.get_balance(), 0);

        let by_user = store
            .get_wallet_by_user(wallet.get_user_id())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_user.get_id(), wallet.get_id());
    }

    #[tokio::test]
    async fn test_commit_mutation_version_conflict() {
        let (_dir, storage) = open_store();
        let store = storage.tenant_store("fest").unwrap();

        let mut wallet = make_wallet();
        store.save_wallet(&wallet).await.unwrap();

        wallet.apply(700, 2);
        let tx = make_tx(&wallet, 700, 700, "a");
        // Wrong expected version
        let result = store.commit_mutation(&wallet, 5, &tx, None).await;
        assert!(matches!(result, Err(StorageError::VersionConflict)));

        // Correct expected version commits
        store.commit_mutation(&wallet, 0, &tx, None).await.unwrap();
        let loaded = store.get_wallet(wallet.get_id()).await.unwrap();
        assert_eq!(loaded.get_balance(), 700);
        assert_eq!(loaded.get_version(), 1);
    }

    #[tokio::test]
    async fn test_commit_mutation_duplicate_idempotency() {
        let (_dir, storage) = open_store();
        let store = storage.tenant_store("fest").unwrap();

        let mut wallet = make_wallet();
        store.save_wallet(&wallet).await.unwrap();

        wallet.apply(500, 2);
        let tx = make_tx(&wallet, 500, 500, "a");
        store.commit_mutation(&wallet, 0, &tx, None).await.unwrap();

        let mut wallet2 = store.get_wallet(wallet.get_id()).await.unwrap();
        wallet2.apply(900, 3);
        let tx2 = make_tx(&wallet2, 400, 900, "a");
        let result = store.commit_mutation(&wallet2, 1, &tx2, None).await;
        assert!(matches!(result, Err(StorageError::VersionConflict)));

        let stored = store
            .get_transaction_by_idempotency(wallet.get_id(), "a")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.get_id(), tx.get_id());
    }

    #[tokio::test]
    async fn test_namespace_isolation() {
        let (_dir, storage) = open_store();
        let store_a = storage.tenant_store("fest-a").unwrap();
        let store_b = storage.tenant_store("fest-b").unwrap();

        let wallet = make_wallet();
        store_a.save_wallet(&wallet).await.unwrap();

        assert!(store_a.has_wallet(wallet.get_id()).await.unwrap());
        assert!(!store_b.has_wallet(wallet.get_id()).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_transactions_in_order() {
        let (_dir, storage) = open_store();
        let store = storage.tenant_store("fest").unwrap();

        let mut wallet = make_wallet();
        store.save_wallet(&wallet).await.unwrap();

        for i in 0..5u64 {
            let expected = wallet.get_version();
            wallet.apply((i + 1) * 100, 10 + i);
            let tx = make_tx(&wallet, 100, (i + 1) * 100, &format!("k{}", i));
            store
                .commit_mutation(&wallet, expected, &tx, None)
                .await
                .unwrap();
        }

        let all = store
            .list_transactions(wallet.get_id(), TimeRange::default(), Paging::default())
            .await
            .unwrap();
        assert_eq!(all.len(), 5);
        for (i, tx) in all.iter().enumerate() {
            assert_eq!(tx.get_balance_after(), (i as u64 + 1) * 100);
        }

        let sum = store.sum_wallet_amounts(wallet.get_id()).await.unwrap();
        assert_eq!(sum, 500);

        let paged = store
            .list_transactions(
                wallet.get_id(),
                TimeRange::default(),
                Paging {
                    skip: 2,
                    limit: Some(2),
                },
            )
            .await
            .unwrap();
        assert_eq!(paged.len(), 2);
        assert_eq!(paged[0].get_balance_after(), 300);
    }

    #[tokio::test]
    async fn test_archive_moves_old_rows_to_cold() {
        let (_dir, storage) = open_store();
        let store = storage.tenant_store("fest").unwrap();

        let mut wallet = make_wallet();
        store.save_wallet(&wallet).await.unwrap();

        let mut ids = Vec::new();
        for (i, created_at) in [10u64, 20, 30].iter().enumerate() {
            let expected = wallet.get_version();
            wallet.apply((i as u64 + 1) * 100, *created_at);
            let tx = make_tx_at(
                &wallet,
                100,
                (i as u64 + 1) * 100,
                &format!("k{}", i),
                *created_at,
            );
            ids.push(*tx.get_id());
            store
                .commit_mutation(&wallet, expected, &tx, None)
                .await
                .unwrap();
        }

        let moved = store
            .archive_transactions(wallet.get_id(), 25)
            .await
            .unwrap();
        assert_eq!(moved, 2);

        // Hot journal keeps only the newest row
        let hot = store
            .list_transactions(wallet.get_id(), TimeRange::default(), Paging::default())
            .await
            .unwrap();
        assert_eq!(hot.len(), 1);
        assert_eq!(hot[0].get_id(), &ids[2]);

        // Archived rows stay readable and the duplicate indexes survive
        let archived = store.get_transaction(&ids[0]).await.unwrap();
        assert_eq!(archived.get_created_at(), 10);
        let by_key = store
            .get_transaction_by_idempotency(wallet.get_id(), "k0")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_key.get_id(), &ids[0]);

        // Archival is idempotent
        let again = store
            .archive_transactions(wallet.get_id(), 25)
            .await
            .unwrap();
        assert_eq!(again, 0);
    }
}
