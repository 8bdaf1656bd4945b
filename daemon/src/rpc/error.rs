use crate::{
    core::error::{AuthError, LedgerError, SyncError},
    core::storage::StorageError,
    jobs::worker::EnqueueError,
};
use actix_web::{http::header, HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

// The wire error surface. User-visible messages are stable strings
// keyed to these kinds; internal diagnostics stay in logs.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Authentication failed")]
    Unauthorized,

    #[error("Access forbidden")]
    Forbidden,

    #[error("Tenant is suspended")]
    TenantSuspended,

    #[error("Resource was not found")]
    NotFound,

    #[error("{0}")]
    Conflict(String),

    #[error("Insufficient balance")]
    InsufficientBalance,

    #[error("Service temporarily unavailable, retry shortly")]
    Transient,

    #[error("Internal error")]
    Internal,
}

impl ApiError {
    fn kind(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "validation",
            ApiError::Unauthorized => "unauthorized",
            ApiError::Forbidden => "forbidden",
            ApiError::TenantSuspended => "tenant_suspended",
            ApiError::NotFound => "not_found",
            ApiError::Conflict(_) => "conflict",
            ApiError::InsufficientBalance => "insufficient_balance",
            ApiError::Transient => "transient",
            ApiError::Internal => "internal",
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        use actix_web::http::StatusCode;
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden | ApiError::TenantSuspended => StatusCode::FORBIDDEN,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) | ApiError::InsufficientBalance => StatusCode::CONFLICT,
            ApiError::Transient => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let mut builder = HttpResponse::build(self.status_code());
        if matches!(self, ApiError::Transient) {
            builder.insert_header((header::RETRY_AFTER, "1"));
        }
        builder.json(json!({
            "error": self.kind(),
            "message": self.to_string(),
        }))
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound => ApiError::NotFound,
            StorageError::VersionConflict => ApiError::Transient,
            other => {
                error!("Storage error surfaced to API: {:#}", other);
                ApiError::Internal
            }
        }
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::WalletNotFound(_) | LedgerError::TransactionNotFound(_) => {
                ApiError::NotFound
            }
            LedgerError::InsufficientBalance { .. } => ApiError::InsufficientBalance,
            LedgerError::InvalidAmount
            | LedgerError::BalanceOverflow
            | LedgerError::ReferenceTooLong(_)
            | LedgerError::InvalidIdempotencyKey(_) => {
                ApiError::Validation(err.to_string())
            }
            LedgerError::WalletInactive { .. }
            | LedgerError::WalletExists(_)
            | LedgerError::IdempotencyConflict
            | LedgerError::AlreadyCancelled(_)
            | LedgerError::NotCancellable(_)
            | LedgerError::CancellationWindowExpired(_)
            | LedgerError::AlreadyRefunded(_)
            | LedgerError::NotRefundable(_)
            | LedgerError::ExceedsRemaining { .. } => ApiError::Conflict(err.to_string()),
            LedgerError::TooManyConflicts(_) => ApiError::Transient,
            LedgerError::InvariantViolation(wallet) => {
                error!("CRITICAL: invariant violation surfaced for wallet {}", wallet);
                ApiError::Internal
            }
            LedgerError::Storage(err) => err.into(),
        }
    }
}

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::BatchTooLarge(_) | SyncError::EmptyBatch | SyncError::InvalidDeviceId(_) => {
                ApiError::Validation(err.to_string())
            }
            SyncError::DeviceBusy(_) | SyncError::Cancelled => ApiError::Transient,
            SyncError::Storage(err) => err.into(),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingCredential | AuthError::Unauthorized | AuthError::Expired => {
                ApiError::Unauthorized
            }
            AuthError::TenantSuspended => ApiError::TenantSuspended,
            AuthError::Storage(err) => err.into(),
        }
    }
}

impl From<EnqueueError> for ApiError {
    fn from(err: EnqueueError) -> Self {
        match err {
            EnqueueError::UnknownKind(_) => ApiError::Validation(err.to_string()),
            EnqueueError::Duplicate(_) => ApiError::Conflict(err.to_string()),
            EnqueueError::Broker(broker) => {
                warn!("Broker unavailable during enqueue: {:#}", broker);
                ApiError::Transient
            }
            EnqueueError::Storage(err) => err.into(),
        }
    }
}
