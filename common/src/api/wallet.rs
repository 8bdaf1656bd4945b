use crate::{crypto::Id, transaction::Transaction, wallet::Wallet};
use serde::{Deserialize, Serialize};

// Wire shape of a wallet, without internal bookkeeping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletResponse {
    pub id: Id,
    pub user_id: Id,
    pub balance: u64,
    pub currency_label: String,
    pub exchange_rate_milli: u64,
    pub status: String,
    pub version: u64,
}

impl From<&Wallet> for WalletResponse {
    fn from(wallet: &Wallet) -> Self {
        Self {
            id: *wallet.get_id(),
            user_id: *wallet.get_user_id(),
            balance: wallet.get_balance(),
            currency_label: wallet.get_currency_label().to_string(),
            exchange_rate_milli: wallet.get_exchange_rate_milli(),
            status: wallet.get_status().to_string(),
            version: wallet.get_version(),
        }
    }
}

// Parameters shared by credit and debit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutationParams {
    pub amount: u64,
    pub reference: String,
    pub idempotency_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stand_id: Option<Id>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundParams {
    pub amount: u64,
    pub reason: String,
    pub idempotency_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelParams {
    pub reason: String,
    pub idempotency_key: String,
    // Admins may cancel outside the window; always audited
    #[serde(default)]
    pub admin_override: bool,
}

// Wire shape of a journal row. The idempotency key stays server-side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionResponse {
    pub id: Id,
    pub wallet_id: Id,
    #[serde(rename = "type")]
    pub kind: String,
    pub amount: i64,
    pub balance_after: u64,
    pub reference: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stand_id: Option<Id>,
    pub offline_created: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    pub created_at: u64,
}

impl From<&Transaction> for TransactionResponse {
    fn from(tx: &Transaction) -> Self {
        Self {
            id: *tx.get_id(),
            wallet_id: *tx.get_wallet_id(),
            kind: tx.get_kind().to_string(),
            amount: tx.get_amount(),
            balance_after: tx.get_balance_after(),
            reference: tx.get_reference().to_string(),
            stand_id: *tx.get_stand_id(),
            offline_created: tx.is_offline_created(),
            device_id: tx.get_device_id().clone(),
            created_at: tx.get_created_at(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionListResponse {
    pub transactions: Vec<TransactionResponse>,
    pub total: usize,
}
