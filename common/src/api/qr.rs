// QR payloads for tickets and wallets.
// The JSON shape is a compatibility surface: devices in the field scan
// and verify these offline. Field order and the signed message format
// must not change.

use crate::{
    crypto::{sign, Id, Signature, SigningKey},
    time::TimestampSeconds,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QrError {
    #[error("QR payload signature mismatch")]
    BadSignature,

    #[error("QR payload expired")]
    Expired,

    #[error("Invalid base64 signature")]
    InvalidEncoding,
}

// Canonical wire shape: {"t": .., "w": .., "f": .., "exp": .., "sig": ..}
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QrPayload {
    // Ticket id
    pub t: Id,
    // Wallet id, present once the ticket holder has a wallet
    #[serde(skip_serializing_if = "Option::is_none")]
    pub w: Option<Id>,
    // Tenant (festival) id
    pub f: Id,
    // Expiry, unix seconds; mandatory
    pub exp: TimestampSeconds,
    // base64(hmac-sha256(key, "t|w|f|exp"))
    pub sig: String,
}

impl QrPayload {
    // The signed message: hex ids joined with '|', empty slot when the
    // wallet is absent
    fn message(t: &Id, w: &Option<Id>, f: &Id, exp: TimestampSeconds) -> String {
        format!(
            "{}|{}|{}|{}",
            t.to_hex(),
            w.as_ref().map(Id::to_hex).unwrap_or_default(),
            f.to_hex(),
            exp
        )
    }

    pub fn create(
        key: &SigningKey,
        ticket_id: Id,
        wallet_id: Option<Id>,
        tenant_id: Id,
        expires_at: TimestampSeconds,
    ) -> Self {
        let message = Self::message(&ticket_id, &wallet_id, &tenant_id, expires_at);
        let signature = sign(key, message.as_bytes());
        Self {
            t: ticket_id,
            w: wallet_id,
            f: tenant_id,
            exp: expires_at,
            sig: BASE64.encode(signature.as_bytes()),
        }
    }

    // Constant-time verification; expiry checked first so stale codes
    // never reach the comparison
    pub fn verify(&self, key: &SigningKey, now: TimestampSeconds) -> Result<(), QrError> {
        if now > self.exp {
            return Err(QrError::Expired);
        }

        let decoded = BASE64
            .decode(&self.sig)
            .map_err(|_| QrError::InvalidEncoding)?;
        let provided: [u8; 32] = decoded
            .try_into()
            .map_err(|_| QrError::InvalidEncoding)?;

        let message = Self::message(&self.t, &self.w, &self.f, self.exp);
        let expected = sign(key, message.as_bytes());

        if bool::from(expected.as_bytes().ct_eq(&provided)) {
            Ok(())
        } else {
            Err(QrError::BadSignature)
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("QR payload serialization cannot fail")
    }

    pub fn signature(&self) -> Result<Signature, QrError> {
        let decoded = BASE64
            .decode(&self.sig)
            .map_err(|_| QrError::InvalidEncoding)?;
        let bytes: [u8; 32] = decoded
            .try_into()
            .map_err(|_| QrError::InvalidEncoding)?;
        Ok(Signature::new(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_verify() {
        let key = SigningKey::random();
        let payload = QrPayload::create(&key, Id::random(), Some(Id::random()), Id::random(), 2_000_000_000);

        assert!(payload.verify(&key, 1_900_000_000).is_ok());
    }

    #[test]
    fn test_expired() {
        let key = SigningKey::random();
        let payload = QrPayload::create(&key, Id::random(), None, Id::random(), 1_000);

        assert_eq!(payload.verify(&key, 2_000), Err(QrError::Expired));
    }

    #[test]
    fn test_wrong_key() {
        let key = SigningKey::random();
        let payload = QrPayload::create(&key, Id::random(), None, Id::random(), 2_000_000_000);

        let other = SigningKey::random();
        assert_eq!(
            payload.verify(&other, 1_900_000_000),
            Err(QrError::BadSignature)
        );
    }

    #[test]
    fn test_tampered_expiry_rejected() {
        let key = SigningKey::random();
        let mut payload = QrPayload::create(&key, Id::random(), None, Id::random(), 2_000_000_000);
        payload.exp += 3600;

        assert_eq!(
            payload.verify(&key, 1_900_000_000),
            Err(QrError::BadSignature)
        );
    }

    #[test]
    fn test_wire_shape() {
        let key = SigningKey::new([1u8; 32]);
        let payload = QrPayload::create(
            &key,
            Id::new([2u8; 16]),
            None,
            Id::new([3u8; 16]),
            1_800_000_000,
        );

        let json = payload.to_json();
        // Field order is part of the contract
        assert!(json.starts_with("{\"t\":\""));
        assert!(json.contains("\"f\":\""));
        assert!(json.contains("\"exp\":1800000000"));
        assert!(json.contains("\"sig\":\""));
        // Absent wallet is omitted entirely
        assert!(!json.contains("\"w\""));
    }
}
