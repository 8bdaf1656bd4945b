use crate::{
    crypto::Id,
    serializer::{Reader, ReaderError, Serializer, Writer},
    time::TimestampMillis,
};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

// One immutable journal row: the only way a balance ever changes.
// The binary layout is bit-exact and must not change, devices in the
// field reconcile against it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    id: Id,
    wallet_id: Id,
    kind: TransactionKind,
    // Signed minor units: positive credits, negative debits
    amount: i64,
    // Wallet balance after this row was applied
    balance_after: u64,
    // Free-form caller reference, 255 bytes max
    reference: String,
    stand_id: Option<Id>,
    operator_id: Option<Id>,
    // Unique within the tenant; the at-most-once guarantee
    idempotency_key: String,
    // True when captured on a device without server contact
    offline_created: bool,
    device_id: Option<String>,
    synced_at: Option<TimestampMillis>,
    created_at: TimestampMillis,
}

// Wire encoding: RECHARGE=1, PAYMENT=2, REFUND=3, CANCEL=4
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Recharge,
    Payment,
    Refund,
    Cancel,
}

// Where a mutation came from: stand, operator, capture device
#[derive(Debug, Clone, Default)]
pub struct TransactionSource {
    pub stand_id: Option<Id>,
    pub operator_id: Option<Id>,
    pub device_id: Option<String>,
    pub offline_created: bool,
}

impl TransactionKind {
    pub fn as_u8(&self) -> u8 {
        match self {
            TransactionKind::Recharge => 1,
            TransactionKind::Payment => 2,
            TransactionKind::Refund => 3,
            TransactionKind::Cancel => 4,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(TransactionKind::Recharge),
            2 => Some(TransactionKind::Payment),
            3 => Some(TransactionKind::Refund),
            4 => Some(TransactionKind::Cancel),
            _ => None,
        }
    }

    // Only recharges credit the wallet among the device-originated kinds
    pub fn is_credit(&self) -> bool {
        matches!(self, TransactionKind::Recharge | TransactionKind::Refund)
    }
}

impl Display for TransactionKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionKind::Recharge => write!(f, "recharge"),
            TransactionKind::Payment => write!(f, "payment"),
            TransactionKind::Refund => write!(f, "refund"),
            TransactionKind::Cancel => write!(f, "cancel"),
        }
    }
}

impl Serializer for TransactionKind {
    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        TransactionKind::from_u8(reader.read_u8()?).ok_or(ReaderError::InvalidValue)
    }

    fn write(&self, writer: &mut Writer) {
        writer.write_u8(self.as_u8());
    }

    fn size(&self) -> usize {
        1
    }
}

impl Transaction {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: Id,
        wallet_id: Id,
        kind: TransactionKind,
        amount: i64,
        balance_after: u64,
        reference: String,
        idempotency_key: String,
        source: TransactionSource,
        synced_at: Option<TimestampMillis>,
        created_at: TimestampMillis,
    ) -> Self {
        Self {
            id,
            wallet_id,
            kind,
            amount,
            balance_after,
            reference,
            stand_id: source.stand_id,
            operator_id: source.operator_id,
            idempotency_key,
            offline_created: source.offline_created,
            device_id: source.device_id,
            synced_at,
            created_at,
        }
    }

    pub fn get_id(&self) -> &Id {
        &self.id
    }

    pub fn get_wallet_id(&self) -> &Id {
        &self.wallet_id
    }

    pub fn get_kind(&self) -> TransactionKind {
        self.kind
    }

    pub fn get_amount(&self) -> i64 {
        self.amount
    }

    pub fn get_balance_after(&self) -> u64 {
        self.balance_after
    }

    pub fn get_reference(&self) -> &str {
        &self.reference
    }

    pub fn get_stand_id(&self) -> &Option<Id> {
        &self.stand_id
    }

    pub fn get_operator_id(&self) -> &Option<Id> {
        &self.operator_id
    }

    pub fn get_idempotency_key(&self) -> &str {
        &self.idempotency_key
    }

    pub fn is_offline_created(&self) -> bool {
        self.offline_created
    }

    pub fn get_device_id(&self) -> &Option<String> {
        &self.device_id
    }

    pub fn get_synced_at(&self) -> Option<TimestampMillis> {
        self.synced_at
    }

    pub fn get_created_at(&self) -> TimestampMillis {
        self.created_at
    }

    // Payments and recharges can be compensated; compensations cannot
    pub fn is_cancellable(&self) -> bool {
        matches!(
            self.kind,
            TransactionKind::Payment | TransactionKind::Recharge
        )
    }

    pub fn is_refundable(&self) -> bool {
        self.kind == TransactionKind::Payment
    }
}

impl Serializer for Transaction {
    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(Self {
            id: Id::read(reader)?,
            wallet_id: Id::read(reader)?,
            kind: TransactionKind::read(reader)?,
            amount: reader.read_i64()?,
            balance_after: reader.read_u64()?,
            reference: reader.read_string()?,
            stand_id: Option::read(reader)?,
            operator_id: Option::read(reader)?,
            idempotency_key: reader.read_string()?,
            offline_created: reader.read_bool()?,
            device_id: Option::read(reader)?,
            synced_at: Option::read(reader)?,
            created_at: reader.read_u64()?,
        })
    }

    fn write(&self, writer: &mut Writer) {
        self.id.write(writer);
        self.wallet_id.write(writer);
        self.kind.write(writer);
        writer.write_i64(&self.amount);
        writer.write_u64(&self.balance_after);
        writer.write_string(&self.reference);
        self.stand_id.write(writer);
        self.operator_id.write(writer);
        writer.write_string(&self.idempotency_key);
        writer.write_bool(self.offline_created);
        self.device_id.write(writer);
        self.synced_at.write(writer);
        writer.write_u64(&self.created_at);
    }

    fn size(&self) -> usize {
        self.id.size()
            + self.wallet_id.size()
            + self.kind.size()
            + self.amount.size()
            + self.balance_after.size()
            + self.reference.size()
            + self.stand_id.size()
            + self.operator_id.size()
            + self.idempotency_key.size()
            + self.offline_created.size()
            + self.device_id.size()
            + self.synced_at.size()
            + self.created_at.size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tx() -> Transaction {
        Transaction::new(
            Id::new([1u8; 16]),
            Id::new([2u8; 16]),
            TransactionKind::Payment,
            -300,
            700,
            "bar1".to_string(),
            "a".to_string(),
            TransactionSource {
                stand_id: Some(Id::new([3u8; 16])),
                operator_id: None,
                device_id: Some("pos-07".to_string()),
                offline_created: true,
            },
            Some(1_750_000_100_000),
            1_750_000_000_000,
        )
    }

    #[test]
    fn test_roundtrip() {
        let tx = sample_tx();
        let decoded = Transaction::from_bytes(&tx.to_bytes()).unwrap();
        assert_eq!(decoded.get_id(), tx.get_id());
        assert_eq!(decoded.get_kind(), TransactionKind::Payment);
        assert_eq!(decoded.get_amount(), -300);
        assert_eq!(decoded.get_balance_after(), 700);
        assert_eq!(decoded.get_reference(), "bar1");
        assert_eq!(decoded.get_idempotency_key(), "a");
        assert!(decoded.is_offline_created());
        assert_eq!(decoded.get_device_id().as_deref(), Some("pos-07"));
        assert_eq!(decoded.get_synced_at(), Some(1_750_000_100_000));
    }

    // The journal layout is a compatibility surface: pin the exact bytes
    #[test]
    fn test_bit_exact_layout() {
        let tx = sample_tx();
        let bytes = tx.to_bytes();

        // id
        assert_eq!(&bytes[0..16], &[1u8; 16]);
        // wallet_id
        assert_eq!(&bytes[16..32], &[2u8; 16]);
        // kind: PAYMENT=2
        assert_eq!(bytes[32], 2);
        // amount: -300 big-endian two's complement
        assert_eq!(&bytes[33..41], &(-300i64).to_be_bytes());
        // balance_after
        assert_eq!(&bytes[41..49], &700u64.to_be_bytes());
        // reference: len prefix + "bar1"
        assert_eq!(bytes[49], 4);
        assert_eq!(&bytes[50..54], b"bar1");
        // stand_id present flag + bytes
        assert_eq!(bytes[54], 1);
        assert_eq!(&bytes[55..71], &[3u8; 16]);
        // operator_id absent
        assert_eq!(bytes[71], 0);
        // idempotency_key
        assert_eq!(bytes[72], 1);
        assert_eq!(bytes[73], b'a');
        // offline_created
        assert_eq!(bytes[74], 1);
        // device_id present + len + "pos-07"
        assert_eq!(bytes[75], 1);
        assert_eq!(bytes[76], 6);
        assert_eq!(&bytes[77..83], b"pos-07");
        // synced_at present + millis
        assert_eq!(bytes[83], 1);
        assert_eq!(&bytes[84..92], &1_750_000_100_000u64.to_be_bytes());
        // created_at
        assert_eq!(&bytes[92..100], &1_750_000_000_000u64.to_be_bytes());
        assert_eq!(bytes.len(), 100);
    }

    #[test]
    fn test_kind_codes() {
        assert_eq!(TransactionKind::Recharge.as_u8(), 1);
        assert_eq!(TransactionKind::Payment.as_u8(), 2);
        assert_eq!(TransactionKind::Refund.as_u8(), 3);
        assert_eq!(TransactionKind::Cancel.as_u8(), 4);
        assert_eq!(TransactionKind::from_u8(5), None);
    }
}
