mod sled;

pub use self::sled::{SledStorage, TenantStore};

use async_trait::async_trait;
use festa_common::{
    api::{Paging, TimeRange},
    audit::{AuditRecord, SecurityEvent, SecurityEventKind},
    crypto::Id,
    serializer::{Reader, ReaderError, Serializer, Writer},
    sync::SyncBatch,
    tenant::Tenant,
    time::TimestampMillis,
    transaction::Transaction,
    wallet::Wallet,
};
use thiserror::Error;

use crate::jobs::task::DeadLetter;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    Sled(#[from] ::sled::Error),

    #[error(transparent)]
    Reader(#[from] ReaderError),

    #[error("Entry was not found")]
    NotFound,

    #[error("Wallet version conflict")]
    VersionConflict,

    #[error("Storage transaction aborted: {0}")]
    Aborted(String),
}

// Bookkeeping attached to a journal row after the fact: how much of it
// has been refunded, and whether it was cancelled. The journal row
// itself is immutable.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransactionMeta {
    pub refunded_total: u64,
    pub cancelled: bool,
}

impl Serializer for TransactionMeta {
    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(Self {
            refunded_total: reader.read_u64()?,
            cancelled: reader.read_bool()?,
        })
    }

    fn write(&self, writer: &mut Writer) {
        writer.write_u64(&self.refunded_total);
        writer.write_bool(self.cancelled);
    }

    fn size(&self) -> usize {
        9
    }
}

#[async_trait]
pub trait WalletProvider {
    async fn has_wallet(&self, id: &Id) -> Result<bool, StorageError>;

    async fn get_wallet(&self, id: &Id) -> Result<Wallet, StorageError>;

    async fn get_wallet_by_user(&self, user_id: &Id) -> Result<Option<Wallet>, StorageError>;

    // Unconditional write, used for creation and status changes.
    // Balance mutations go through commit_mutation instead.
    async fn save_wallet(&self, wallet: &Wallet) -> Result<(), StorageError>;

    async fn list_wallets(&self) -> Result<Vec<Wallet>, StorageError>;
}

#[async_trait]
pub trait TransactionProvider {
    async fn get_transaction(&self, id: &Id) -> Result<Transaction, StorageError>;

    // The at-most-once lookup: idempotency keys are scoped per wallet
    async fn get_transaction_by_idempotency(
        &self,
        wallet_id: &Id,
        key: &str,
    ) -> Result<Option<Transaction>, StorageError>;

    // Duplicate detection for offline transactions by (device, local id)
    async fn find_offline_duplicate(
        &self,
        device_id: &str,
        local_id: &str,
    ) -> Result<Option<Id>, StorageError>;

    async fn list_transactions(
        &self,
        wallet_id: &Id,
        range: TimeRange,
        paging: Paging,
    ) -> Result<Vec<Transaction>, StorageError>;

    // Sum of all journal amounts for a wallet, in application order.
    // Used by the invariant sweep.
    async fn sum_wallet_amounts(&self, wallet_id: &Id) -> Result<i64, StorageError>;

    async fn get_transaction_meta(&self, id: &Id) -> Result<TransactionMeta, StorageError>;

    // The serial-section commit: appends the journal row, updates the
    // wallet under a version compare-and-set, maintains the idempotency
    // and device indexes, and optionally updates a prior row's meta.
    // All of it lands atomically or not at all.
    async fn commit_mutation(
        &self,
        wallet: &Wallet,
        expected_version: u64,
        tx: &Transaction,
        meta_update: Option<(Id, TransactionMeta)>,
    ) -> Result<(), StorageError>;

    // Move journal rows older than the cutoff into the cold namespace.
    // The only sanctioned way a row ever leaves the hot journal; the
    // idempotency and device indexes stay behind so duplicate detection
    // keeps working. Returns how many rows moved.
    async fn archive_transactions(
        &self,
        wallet_id: &Id,
        before: TimestampMillis,
    ) -> Result<usize, StorageError>;
}

#[async_trait]
pub trait SyncProvider {
    async fn get_sync_batch(&self, id: &Id) -> Result<Option<SyncBatch>, StorageError>;

    async fn save_sync_batch(&self, batch: &SyncBatch) -> Result<(), StorageError>;

    // A device may only have one batch in flight at a time
    async fn has_processing_batch(
        &self,
        device_id: &str,
        exclude: &Id,
    ) -> Result<bool, StorageError>;

    async fn list_device_batches(&self, device_id: &str) -> Result<Vec<SyncBatch>, StorageError>;
}

#[async_trait]
pub trait AuditProvider {
    async fn append_audit(&self, record: &AuditRecord) -> Result<(), StorageError>;

    async fn list_audit(
        &self,
        range: TimeRange,
        paging: Paging,
    ) -> Result<Vec<AuditRecord>, StorageError>;
}

// Everything a tenant-scoped request needs; by construction the handle
// only sees trees of its own namespace
pub trait TenantStorage:
    WalletProvider + TransactionProvider + SyncProvider + AuditProvider + Send + Sync
{
    fn namespace(&self) -> &str;
}

#[async_trait]
pub trait TenantProvider {
    async fn get_tenant(&self, id: &Id) -> Result<Tenant, StorageError>;

    async fn save_tenant(&self, tenant: &Tenant) -> Result<(), StorageError>;

    async fn list_tenants(&self) -> Result<Vec<Tenant>, StorageError>;
}

#[derive(Debug, Clone, Default)]
pub struct SecurityEventFilter {
    pub kind: Option<SecurityEventKind>,
    pub actor: Option<String>,
    pub ip: Option<String>,
    pub range: TimeRange,
    pub limit: Option<usize>,
}

#[async_trait]
pub trait SecurityEventProvider {
    async fn append_security_event(&self, event: &SecurityEvent) -> Result<(), StorageError>;

    async fn query_security_events(
        &self,
        filter: SecurityEventFilter,
    ) -> Result<Vec<SecurityEvent>, StorageError>;
}

#[async_trait]
pub trait DeadLetterProvider {
    async fn append_dead_letter(&self, entry: &DeadLetter) -> Result<(), StorageError>;

    async fn list_dead_letters(&self, paging: Paging) -> Result<Vec<DeadLetter>, StorageError>;

    // Remove and return an entry for manual replay
    async fn take_dead_letter(&self, task_id: &Id) -> Result<Option<DeadLetter>, StorageError>;
}
