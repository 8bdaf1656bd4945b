// External collaborator ports. The core calls out through these; none
// of them ever calls back into the hot path.

mod dev;

pub use dev::{DevIdentityProvider, LogMailer, LogPaymentProvider, LogSmsGateway, MemoryObjectStore};

use async_trait::async_trait;
use festa_common::{crypto::Id, time::TimestampSeconds};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct Claims {
    pub subject: String,
    pub tenant_id: Id,
    pub roles: Vec<String>,
    pub expires_at: TimestampSeconds,
}

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Invalid bearer token")]
    Invalid,

    #[error("Bearer token expired")]
    Expired,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn verify_bearer(&self, token: &str) -> Result<Claims, IdentityError>;
}

// Downstream failures split into two worlds: transient ones the job
// fleet retries with backoff, permanent ones that will keep failing
// no matter how often we retry
#[derive(Debug, Error)]
pub enum SendError {
    #[error("Transient provider failure: {0}")]
    Transient(String),

    #[error("Permanent provider failure ({code}): {message}")]
    Permanent { code: String, message: String },
}

// The defined permanent-failure code set for SMS delivery
pub const SMS_PERMANENT_CODES: [&str; 3] = ["unroutable", "unreachable_handset", "blocked_carrier"];

#[derive(Debug, Clone)]
pub struct OutgoingMail {
    pub to: Vec<String>,
    pub subject: String,
    pub html: Option<String>,
    pub text: String,
    pub attachments: Vec<(String, Vec<u8>)>,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    // Returns the provider-side message id
    async fn send(&self, mail: &OutgoingMail) -> Result<String, SendError>;
}

#[async_trait]
pub trait SmsGateway: Send + Sync {
    async fn send(&self, to: &str, text: &str) -> Result<String, SendError>;
}

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("Object {0} was not found")]
    NotFound(String),

    #[error("Object store failure: {0}")]
    Other(String),
}

// Report artifacts and archives
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str)
        -> Result<(), ObjectStoreError>;

    async fn get(&self, key: &str) -> Result<Vec<u8>, ObjectStoreError>;

    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError>;

    async fn list(&self, prefix: &str) -> Result<Vec<String>, ObjectStoreError>;
}

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("Payment provider rejected the request: {0}")]
    Rejected(String),

    #[error("Payment provider unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    // Returns an opaque intent reference; confirmation arrives later
    // through the webhook ingress and enqueues a top-up task
    async fn create_payment_intent(
        &self,
        amount: u64,
        currency: &str,
        destination_account: &str,
        metadata: Value,
    ) -> Result<String, PaymentError>;
}
