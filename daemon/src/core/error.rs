use super::storage::StorageError;
use festa_common::{crypto::Id, error::BalanceError, wallet::WalletStatus};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Wallet {0} was not found")]
    WalletNotFound(Id),

    #[error("Wallet {id} is not active ({status})")]
    WalletInactive { id: Id, status: WalletStatus },

    #[error("A wallet already exists for user {0}")]
    WalletExists(Id),

    #[error("Insufficient balance: need {need}, have {have}")]
    InsufficientBalance { need: u64, have: u64 },

    #[error("Amount must be strictly positive")]
    InvalidAmount,

    #[error("Balance overflow")]
    BalanceOverflow,

    #[error("Reference exceeds {0} bytes")]
    ReferenceTooLong(usize),

    #[error("Idempotency key is empty or exceeds {0} bytes")]
    InvalidIdempotencyKey(usize),

    #[error("Idempotency key reused with a different payload")]
    IdempotencyConflict,

    #[error("Transaction {0} was not found")]
    TransactionNotFound(Id),

    #[error("Transaction {0} is already cancelled")]
    AlreadyCancelled(Id),

    #[error("Transaction {0} cannot be cancelled")]
    NotCancellable(Id),

    #[error("Cancellation window of {0} seconds has passed")]
    CancellationWindowExpired(u64),

    #[error("Transaction {0} is already fully refunded")]
    AlreadyRefunded(Id),

    #[error("Transaction {0} cannot be refunded")]
    NotRefundable(Id),

    #[error("Refund exceeds remaining amount: requested {requested}, remaining {remaining}")]
    ExceedsRemaining { requested: u64, remaining: u64 },

    #[error("Ledger invariant violated for wallet {0}")]
    InvariantViolation(Id),

    #[error("Too many concurrent commits for wallet {0}")]
    TooManyConflicts(Id),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<BalanceError> for LedgerError {
    fn from(err: BalanceError) -> Self {
        match err {
            BalanceError::Insufficient { need, have } => {
                LedgerError::InsufficientBalance { need, have }
            }
            BalanceError::Overflow => LedgerError::BalanceOverflow,
            BalanceError::ZeroAmount => LedgerError::InvalidAmount,
        }
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Batch exceeds the maximum of {0} transactions")]
    BatchTooLarge(usize),

    #[error("Batch is empty")]
    EmptyBatch,

    #[error("Device id is empty or exceeds {0} bytes")]
    InvalidDeviceId(usize),

    #[error("Device {0} already has a batch being processed")]
    DeviceBusy(String),

    #[error("Batch processing was cancelled")]
    Cancelled,

    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Authentication required")]
    MissingCredential,

    // Unknown and foreign tenants surface identically: existence of a
    // tenant is not leaked to unauthorized callers
    #[error("Authentication failed")]
    Unauthorized,

    #[error("Credential expired")]
    Expired,

    #[error("Tenant is suspended")]
    TenantSuspended,

    #[error(transparent)]
    Storage(#[from] StorageError),
}
