use crate::{
    crypto::Id,
    error::BalanceError,
    serializer::{Reader, ReaderError, Serializer, Writer},
    time::TimestampMillis,
};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

// A user's balance record within one tenant.
// The balance is a plain u64 of minor units: it cannot go negative by
// construction, and debits are checked before committing. The version
// counter increases on every mutation and backs the optimistic
// concurrency check at commit time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wallet {
    id: Id,
    user_id: Id,
    tenant_id: Id,
    // Balance in minor units, always >= 0
    balance: u64,
    // Display label for the festival currency ("token", "jeton", ...)
    currency_label: String,
    // Minor units per EUR, times 1000 (1500 = 1.5 tokens per EUR)
    exchange_rate_milli: u64,
    // Bumped on every committed mutation
    version: u64,
    status: WalletStatus,
    created_at: TimestampMillis,
    updated_at: TimestampMillis,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletStatus {
    Active,
    Frozen,
    Closed,
}

impl Wallet {
    pub fn new(
        id: Id,
        user_id: Id,
        tenant_id: Id,
        currency_label: String,
        exchange_rate_milli: u64,
        created_at: TimestampMillis,
    ) -> Self {
        Self {
            id,
            user_id,
            tenant_id,
            balance: 0,
            currency_label,
            exchange_rate_milli,
            version: 0,
            status: WalletStatus::Active,
            created_at,
            updated_at: created_at,
        }
    }

    pub fn get_id(&self) -> &Id {
        &self.id
    }

    pub fn get_user_id(&self) -> &Id {
        &self.user_id
    }

    pub fn get_tenant_id(&self) -> &Id {
        &self.tenant_id
    }

    pub fn get_balance(&self) -> u64 {
        self.balance
    }

    pub fn get_currency_label(&self) -> &str {
        &self.currency_label
    }

    pub fn get_exchange_rate_milli(&self) -> u64 {
        self.exchange_rate_milli
    }

    pub fn get_version(&self) -> u64 {
        self.version
    }

    pub fn get_status(&self) -> WalletStatus {
        self.status
    }

    pub fn get_created_at(&self) -> TimestampMillis {
        self.created_at
    }

    pub fn get_updated_at(&self) -> TimestampMillis {
        self.updated_at
    }

    pub fn is_active(&self) -> bool {
        self.status == WalletStatus::Active
    }

    pub fn set_status(&mut self, status: WalletStatus) {
        self.status = status;
    }

    // Compute the balance after applying a signed amount, without
    // mutating the wallet. Debits that would go negative are rejected.
    pub fn balance_after(&self, amount: i64) -> Result<u64, BalanceError> {
        if amount == 0 {
            return Err(BalanceError::ZeroAmount);
        }

        if amount > 0 {
            self.balance
                .checked_add(amount as u64)
                .ok_or(BalanceError::Overflow)
        } else {
            let need = amount.unsigned_abs();
            self.balance
                .checked_sub(need)
                .ok_or(BalanceError::Insufficient {
                    need,
                    have: self.balance,
                })
        }
    }

    // Commit a mutation: set the new balance, bump the version
    pub fn apply(&mut self, balance_after: u64, now: TimestampMillis) {
        self.balance = balance_after;
        self.version += 1;
        self.updated_at = now;
    }
}

impl Display for WalletStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            WalletStatus::Active => write!(f, "active"),
            WalletStatus::Frozen => write!(f, "frozen"),
            WalletStatus::Closed => write!(f, "closed"),
        }
    }
}

impl Serializer for WalletStatus {
    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        match reader.read_u8()? {
            0 => Ok(WalletStatus::Active),
            1 => Ok(WalletStatus::Frozen),
            2 => Ok(WalletStatus::Closed),
            _ => Err(ReaderError::InvalidValue),
        }
    }

    fn write(&self, writer: &mut Writer) {
        writer.write_u8(match self {
            WalletStatus::Active => 0,
            WalletStatus::Frozen => 1,
            WalletStatus::Closed => 2,
        });
    }

    fn size(&self) -> usize {
        1
    }
}

impl Serializer for Wallet {
    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(Self {
            id: Id::read(reader)?,
            user_id: Id::read(reader)?,
            tenant_id: Id::read(reader)?,
            balance: reader.read_u64()?,
            currency_label: reader.read_string()?,
            exchange_rate_milli: reader.read_u64()?,
            version: reader.read_u64()?,
            status: WalletStatus::read(reader)?,
            created_at: reader.read_u64()?,
            updated_at: reader.read_u64()?,
        })
    }

    fn write(&self, writer: &mut Writer) {
        self.id.write(writer);
        self.user_id.write(writer);
        self.tenant_id.write(writer);
        writer.write_u64(&self.balance);
        writer.write_string(&self.currency_label);
        writer.write_u64(&self.exchange_rate_milli);
        writer.write_u64(&self.version);
        self.status.write(writer);
        writer.write_u64(&self.created_at);
        writer.write_u64(&self.updated_at);
    }

    fn size(&self) -> usize {
        self.id.size()
            + self.user_id.size()
            + self.tenant_id.size()
            + self.balance.size()
            + self.currency_label.size()
            + self.exchange_rate_milli.size()
            + self.version.size()
            + self.status.size()
            + self.created_at.size()
            + self.updated_at.size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_wallet(balance: u64) -> Wallet {
        let mut wallet = Wallet::new(
            Id::random(),
            Id::random(),
            Id::random(),
            "token".to_string(),
            1000,
            1_750_000_000_000,
        );
        if balance > 0 {
            wallet.apply(balance, 1_750_000_000_001);
        }
        wallet
    }

    #[test]
    fn test_balance_after_credit() {
        let wallet = test_wallet(1000);
        assert_eq!(wallet.balance_after(300).unwrap(), 1300);
    }

    #[test]
    fn test_balance_after_debit() {
        let wallet = test_wallet(1000);
        assert_eq!(wallet.balance_after(-300).unwrap(), 700);
    }

    #[test]
    fn test_debit_below_zero_rejected() {
        let wallet = test_wallet(100);
        assert!(matches!(
            wallet.balance_after(-500),
            Err(BalanceError::Insufficient { need: 500, have: 100 })
        ));
    }

    #[test]
    fn test_zero_amount_rejected() {
        let wallet = test_wallet(100);
        assert!(matches!(
            wallet.balance_after(0),
            Err(BalanceError::ZeroAmount)
        ));
    }

    #[test]
    fn test_overflow_rejected() {
        let wallet = test_wallet(u64::MAX);
        assert!(matches!(
            wallet.balance_after(1),
            Err(BalanceError::Overflow)
        ));
    }

    #[test]
    fn test_apply_bumps_version() {
        let mut wallet = test_wallet(0);
        let version = wallet.get_version();
        wallet.apply(500, 1_750_000_000_002);
        assert_eq!(wallet.get_balance(), 500);
        assert_eq!(wallet.get_version(), version + 1);
    }

    #[test]
    fn test_wallet_roundtrip() {
        let wallet = test_wallet(1234);
        let decoded = Wallet::from_bytes(&wallet.to_bytes()).unwrap();
        assert_eq!(decoded.get_id(), wallet.get_id());
        assert_eq!(decoded.get_balance(), 1234);
        assert_eq!(decoded.get_version(), wallet.get_version());
        assert_eq!(decoded.get_currency_label(), "token");
    }
}
