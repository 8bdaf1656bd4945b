use festa_common::{
    crypto::{verify_signature, Id},
    sync::OfflineTransaction,
    tenant::Tenant,
    time::TimestampMillis,
};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VerifyError {
    #[error("Offline transaction signature mismatch")]
    BadSignature,

    #[error("Offline transaction is too old")]
    Expired,

    #[error("Offline transaction was signed for another tenant")]
    WrongTenant,
}

// Validates offline transaction signatures with the per-tenant key.
// Devices sign the canonical encoding while offline; the server
// recomputes and compares in constant time.
pub struct OfflineVerifier {
    // Capture timestamps older than this are rejected; sized so devices
    // returning after the festival (end + 72h) can still reconcile
    freshness_millis: u64,
}

impl OfflineVerifier {
    pub fn new(freshness_secs: u64) -> Self {
        Self {
            freshness_millis: freshness_secs * 1000,
        }
    }

    pub fn verify(
        &self,
        tx: &OfflineTransaction,
        tenant: &Tenant,
        claimed_tenant_id: &Id,
        now: TimestampMillis,
    ) -> Result<(), VerifyError> {
        if claimed_tenant_id != tenant.get_id() {
            return Err(VerifyError::WrongTenant);
        }

        if now.saturating_sub(tx.timestamp) > self.freshness_millis {
            return Err(VerifyError::Expired);
        }

        let payload = tx.signing_payload(tenant.get_id());
        if !verify_signature(tenant.get_signing_key(), &payload, &tx.signature) {
            return Err(VerifyError::BadSignature);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use festa_common::{
        crypto::{sign, Signature, SigningKey},
        transaction::TransactionKind,
    };

    fn make_tenant() -> Tenant {
        Tenant::new(
            Id::random(),
            "Fest".to_string(),
            "fest".to_string(),
            SigningKey::random(),
            0,
        )
    }

    fn signed_tx(tenant: &Tenant, timestamp: u64) -> OfflineTransaction {
        let mut tx = OfflineTransaction {
            local_id: "t1".to_string(),
            wallet_id: Id::random(),
            amount: 200,
            kind: TransactionKind::Payment,
            stand_id: None,
            staff_id: None,
            product_ids: Vec::new(),
            signature: Signature::zero(),
            timestamp,
            device_id: "pos-07".to_string(),
        };
        tx.signature = sign(
            tenant.get_signing_key(),
            &tx.signing_payload(tenant.get_id()),
        );
        tx
    }

    #[test]
    fn test_valid_signature() {
        let tenant = make_tenant();
        let verifier = OfflineVerifier::new(3600);
        let tx = signed_tx(&tenant, 1_000_000);

        assert_eq!(
            verifier.verify(&tx, &tenant, tenant.get_id(), 1_000_500),
            Ok(())
        );
    }

    #[test]
    fn test_tampered_amount_rejected() {
        let tenant = make_tenant();
        let verifier = OfflineVerifier::new(3600);
        let mut tx = signed_tx(&tenant, 1_000_000);
        tx.amount += 1;

        assert_eq!(
            verifier.verify(&tx, &tenant, tenant.get_id(), 1_000_500),
            Err(VerifyError::BadSignature)
        );
    }

    #[test]
    fn test_expired() {
        let tenant = make_tenant();
        let verifier = OfflineVerifier::new(3600);
        let tx = signed_tx(&tenant, 1_000_000);

        // One hour plus a millisecond later
        assert_eq!(
            verifier.verify(&tx, &tenant, tenant.get_id(), 1_000_000 + 3600 * 1000 + 1),
            Err(VerifyError::Expired)
        );
    }

    #[test]
    fn test_wrong_tenant() {
        let tenant = make_tenant();
        let verifier = OfflineVerifier::new(3600);
        let tx = signed_tx(&tenant, 1_000_000);

        let other = Id::random();
        assert_eq!(
            verifier.verify(&tx, &tenant, &other, 1_000_500),
            Err(VerifyError::WrongTenant)
        );
    }

    #[test]
    fn test_key_from_other_tenant_rejected() {
        let tenant = make_tenant();
        let other = make_tenant();
        let verifier = OfflineVerifier::new(3600);
        let tx = signed_tx(&other, 1_000_000);

        // Signed with the other tenant's key over the other tenant's id
        assert_eq!(
            verifier.verify(&tx, &tenant, tenant.get_id(), 1_000_500),
            Err(VerifyError::BadSignature)
        );
    }
}
