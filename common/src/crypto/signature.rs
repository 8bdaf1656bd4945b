use crate::serializer::{Reader, ReaderError, Serializer, Writer};
use hmac::{Hmac, Mac};
use serde::de::Error as SerdeError;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt::{Display, Error, Formatter};
use std::str::FromStr;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

// HMAC-SHA256 type alias
type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_SIZE: usize = 32;
pub const SIGNING_KEY_SIZE: usize = 32;

// Deterministic HMAC-SHA256 signature over a canonical byte encoding.
// Devices compute these while offline; the server recomputes and compares
// in constant time.
#[derive(Eq, PartialEq, Clone, Debug)]
pub struct Signature([u8; SIGNATURE_SIZE]);

impl Signature {
    pub const fn new(bytes: [u8; SIGNATURE_SIZE]) -> Self {
        Signature(bytes)
    }

    pub const fn zero() -> Self {
        Signature::new([0; SIGNATURE_SIZE])
    }

    pub fn as_bytes(&self) -> &[u8; SIGNATURE_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    // Constant-time comparison to prevent timing attacks
    pub fn constant_time_eq(&self, other: &Signature) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl FromStr for Signature {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| "Invalid hex string")?;
        let bytes: [u8; SIGNATURE_SIZE] = bytes.try_into().map_err(|_| "Invalid signature")?;
        Ok(Signature::new(bytes))
    }
}

impl Display for Signature {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        write!(f, "{}", &self.to_hex())
    }
}

impl Serializer for Signature {
    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(Signature::new(reader.read_array()?))
    }

    fn write(&self, writer: &mut Writer) {
        writer.write_bytes(&self.0);
    }

    fn size(&self) -> usize {
        SIGNATURE_SIZE
    }
}

impl Serialize for Signature {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'a> Deserialize<'a> for Signature {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'a>,
    {
        let hex = String::deserialize(deserializer)?;
        if hex.len() != SIGNATURE_SIZE * 2 {
            return Err(SerdeError::custom("Invalid hex length"));
        }

        Signature::from_str(&hex).map_err(SerdeError::custom)
    }
}

// Per-tenant symmetric key shared with the tenant's devices.
// Zeroized on drop; never serialized onto the wire.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SigningKey([u8; SIGNING_KEY_SIZE]);

impl SigningKey {
    pub const fn new(bytes: [u8; SIGNING_KEY_SIZE]) -> Self {
        SigningKey(bytes)
    }

    pub fn random() -> Self {
        use rand::{rngs::OsRng, RngCore};
        let mut bytes = [0u8; SIGNING_KEY_SIZE];
        OsRng.fill_bytes(&mut bytes);
        SigningKey(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SIGNING_KEY_SIZE] {
        &self.0
    }

    pub fn from_hex(s: &str) -> Result<Self, &'static str> {
        let bytes = hex::decode(s).map_err(|_| "Invalid hex string")?;
        let bytes: [u8; SIGNING_KEY_SIZE] = bytes.try_into().map_err(|_| "Invalid key size")?;
        Ok(SigningKey(bytes))
    }
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        // Key material never reaches logs
        write!(f, "SigningKey(..)")
    }
}

impl Serializer for SigningKey {
    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(SigningKey::new(reader.read_array()?))
    }

    fn write(&self, writer: &mut Writer) {
        writer.write_bytes(&self.0);
    }

    fn size(&self) -> usize {
        SIGNING_KEY_SIZE
    }
}

// Compute the HMAC-SHA256 signature of a canonical byte encoding
pub fn sign(key: &SigningKey, data: &[u8]) -> Signature {
    let mut mac = HmacSha256::new_from_slice(key.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(data);
    let result: [u8; SIGNATURE_SIZE] = mac.finalize().into_bytes().into();
    Signature::new(result)
}

// Recompute and compare in constant time
pub fn verify_signature(key: &SigningKey, data: &[u8], signature: &Signature) -> bool {
    sign(key, data).constant_time_eq(signature)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_verify() {
        let key = SigningKey::random();
        let data = b"offline transaction preimage";

        let signature = sign(&key, data);
        assert!(verify_signature(&key, data, &signature));
    }

    #[test]
    fn test_wrong_key_rejected() {
        let key = SigningKey::random();
        let other = SigningKey::random();
        let data = b"offline transaction preimage";

        let signature = sign(&key, data);
        assert!(!verify_signature(&other, data, &signature));
    }

    #[test]
    fn test_single_bit_mutation_rejected() {
        let key = SigningKey::random();
        let data = b"offline transaction preimage".to_vec();
        let signature = sign(&key, &data);

        // Flip each bit of the input in turn: all must fail verification
        for byte in 0..data.len() {
            for bit in 0..8 {
                let mut mutated = data.clone();
                mutated[byte] ^= 1 << bit;
                assert!(!verify_signature(&key, &mutated, &signature));
            }
        }
    }

    #[test]
    fn test_deterministic() {
        let key = SigningKey::new([7u8; SIGNING_KEY_SIZE]);
        let a = sign(&key, b"payload");
        let b = sign(&key, b"payload");
        assert_eq!(a, b);
    }

    #[test]
    fn test_signature_hex_roundtrip() {
        let key = SigningKey::random();
        let signature = sign(&key, b"payload");
        let parsed = Signature::from_str(&signature.to_hex()).unwrap();
        assert!(signature.constant_time_eq(&parsed));
    }
}
