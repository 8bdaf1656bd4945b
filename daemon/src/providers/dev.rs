// Development and test implementations of the provider ports.
// The daemon wires these when no real provider is configured, so a
// local instance runs end to end without external services.

use super::{
    Claims, IdentityError, IdentityProvider, Mailer, ObjectStore, ObjectStoreError, OutgoingMail,
    PaymentError, PaymentProvider, SendError, SmsGateway,
};
use async_trait::async_trait;
use festa_common::{crypto::Id, time::get_current_time_in_seconds};
use serde_json::Value;
use std::{collections::HashMap, str::FromStr, sync::Mutex};

// Parses "dev:{subject}:{tenant_id_hex}:{role,role}" bearer tokens.
// Strictly a development credential format.
pub struct DevIdentityProvider;

#[async_trait]
impl IdentityProvider for DevIdentityProvider {
    async fn verify_bearer(&self, token: &str) -> Result<Claims, IdentityError> {
        let mut parts = token.splitn(4, ':');
        if parts.next() != Some("dev") {
            return Err(IdentityError::Invalid);
        }

        let subject = parts.next().ok_or(IdentityError::Invalid)?;
        let tenant_hex = parts.next().ok_or(IdentityError::Invalid)?;
        let roles = parts.next().unwrap_or("user");

        let tenant_id = Id::from_str(tenant_hex).map_err(|_| IdentityError::Invalid)?;

        Ok(Claims {
            subject: subject.to_string(),
            tenant_id,
            roles: roles.split(',').map(str::to_string).collect(),
            expires_at: get_current_time_in_seconds() + 3600,
        })
    }
}

// Logs outgoing mail instead of sending it
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, mail: &OutgoingMail) -> Result<String, SendError> {
        info!(
            "[dev mailer] to={:?} subject={:?} ({} attachments)",
            mail.to,
            mail.subject,
            mail.attachments.len()
        );
        Ok(format!("dev-mail-{}", Id::random()))
    }
}

// Logs outgoing SMS; numbers starting with "+0" are treated as
// unroutable to exercise the permanent-failure path
pub struct LogSmsGateway;

#[async_trait]
impl SmsGateway for LogSmsGateway {
    async fn send(&self, to: &str, text: &str) -> Result<String, SendError> {
        if to.starts_with("+0") {
            return Err(SendError::Permanent {
                code: "unroutable".to_string(),
                message: format!("no route to {}", to),
            });
        }

        info!("[dev sms] to={} len={}", to, text.len());
        Ok(format!("dev-sms-{}", Id::random()))
    }
}

// In-memory object store
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        _content_type: &str,
    ) -> Result<(), ObjectStoreError> {
        self.objects
            .lock()
            .expect("object store lock poisoned")
            .insert(key.to_string(), bytes);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, ObjectStoreError> {
        self.objects
            .lock()
            .expect("object store lock poisoned")
            .get(key)
            .cloned()
            .ok_or_else(|| ObjectStoreError::NotFound(key.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError> {
        self.objects
            .lock()
            .expect("object store lock poisoned")
            .remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, ObjectStoreError> {
        Ok(self
            .objects
            .lock()
            .expect("object store lock poisoned")
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }
}

// Mints fake intent references and logs them
pub struct LogPaymentProvider;

#[async_trait]
impl PaymentProvider for LogPaymentProvider {
    async fn create_payment_intent(
        &self,
        amount: u64,
        currency: &str,
        destination_account: &str,
        _metadata: Value,
    ) -> Result<String, PaymentError> {
        let intent = format!("dev-intent-{}", Id::random());
        info!(
            "[dev payments] intent {} for {} {} to {}",
            intent, amount, currency, destination_account
        );
        Ok(intent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dev_identity_roundtrip() {
        let tenant = Id::random();
        let provider = DevIdentityProvider;
        let claims = provider
            .verify_bearer(&format!("dev:alice:{}:user,staff", tenant))
            .await
            .unwrap();
        assert_eq!(claims.subject, "alice");
        assert_eq!(claims.tenant_id, tenant);
        assert_eq!(claims.roles, vec!["user", "staff"]);
    }

    #[tokio::test]
    async fn test_dev_identity_rejects_garbage() {
        let provider = DevIdentityProvider;
        assert!(provider.verify_bearer("not-a-token").await.is_err());
        assert!(provider.verify_bearer("dev:alice").await.is_err());
        assert!(provider.verify_bearer("dev:alice:nothex:user").await.is_err());
    }

    #[tokio::test]
    async fn test_unroutable_sms_is_permanent() {
        let gateway = LogSmsGateway;
        match gateway.send("+0123", "hello").await {
            Err(SendError::Permanent { code, .. }) => assert_eq!(code, "unroutable"),
            other => panic!("expected permanent failure, got {:?}", other),
        }
    }
}
