mod signature;

pub use signature::{sign, verify_signature, Signature, SigningKey, SIGNATURE_SIZE};

use crate::serializer::{Reader, ReaderError, Serializer, Writer};
use blake3::hash as blake3_hash;
use rand::{rngs::OsRng, RngCore};
use serde::de::Error as SerdeError;
use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Error, Formatter},
    str::FromStr,
};

pub const HASH_SIZE: usize = 32; // 32 bytes / 256 bits
pub const ID_SIZE: usize = 16; // 128-bit entity ids

#[derive(Eq, PartialEq, PartialOrd, Ord, Clone, Debug, Hash)]
pub struct Hash([u8; HASH_SIZE]);

impl Hash {
    pub const fn new(bytes: [u8; HASH_SIZE]) -> Self {
        Hash(bytes)
    }

    pub const fn zero() -> Self {
        Hash::new([0; HASH_SIZE])
    }

    pub fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }

    pub fn to_bytes(self) -> [u8; HASH_SIZE] {
        self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl FromStr for Hash {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| "Invalid hex string")?;
        let bytes: [u8; HASH_SIZE] = bytes.try_into().map_err(|_| "Invalid hash")?;
        Ok(Hash::new(bytes))
    }
}

// Hash a byte array using the blake3 algorithm
#[inline(always)]
pub fn hash(value: &[u8]) -> Hash {
    let result: [u8; HASH_SIZE] = blake3_hash(value).into();
    Hash(result)
}

impl Serializer for Hash {
    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(Hash::new(reader.read_array()?))
    }

    fn write(&self, writer: &mut Writer) {
        writer.write_bytes(&self.0);
    }

    fn size(&self) -> usize {
        HASH_SIZE
    }
}

impl Display for Hash {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        write!(f, "{}", &self.to_hex())
    }
}

impl Serialize for Hash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'a> Deserialize<'a> for Hash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'a>,
    {
        let hex = String::deserialize(deserializer)?;
        if hex.len() != HASH_SIZE * 2 {
            return Err(SerdeError::custom("Invalid hex length"));
        }

        Hash::from_str(&hex).map_err(SerdeError::custom)
    }
}

// Unique 128-bit identifier for every entity: tenants, wallets,
// transactions, batches, tasks. Random rather than sequential so ids
// minted by the server and ids minted on offline devices cannot collide.
#[derive(Eq, PartialEq, PartialOrd, Ord, Clone, Copy, Debug, Hash)]
pub struct Id([u8; ID_SIZE]);

impl Id {
    pub const fn new(bytes: [u8; ID_SIZE]) -> Self {
        Id(bytes)
    }

    pub const fn zero() -> Self {
        Id::new([0; ID_SIZE])
    }

    pub fn random() -> Self {
        let mut bytes = [0u8; ID_SIZE];
        OsRng.fill_bytes(&mut bytes);
        Id(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ID_SIZE] {
        &self.0
    }

    pub fn to_bytes(self) -> [u8; ID_SIZE] {
        self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl FromStr for Id {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| "Invalid hex string")?;
        let bytes: [u8; ID_SIZE] = bytes.try_into().map_err(|_| "Invalid id")?;
        Ok(Id::new(bytes))
    }
}

impl Serializer for Id {
    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(Id::new(reader.read_array()?))
    }

    fn write(&self, writer: &mut Writer) {
        writer.write_bytes(&self.0);
    }

    fn size(&self) -> usize {
        ID_SIZE
    }
}

impl Display for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        write!(f, "{}", &self.to_hex())
    }
}

impl Serialize for Id {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'a> Deserialize<'a> for Id {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'a>,
    {
        let hex = String::deserialize(deserializer)?;
        if hex.len() != ID_SIZE * 2 {
            return Err(SerdeError::custom("Invalid hex length"));
        }

        Id::from_str(&hex).map_err(SerdeError::custom)
    }
}
