use thiserror::Error;

#[derive(Debug, Error)]
pub enum BalanceError {
    #[error("Balance overflow")]
    Overflow,

    #[error("Insufficient balance: need {need}, have {have}")]
    Insufficient { need: u64, have: u64 },

    #[error("Amount must be strictly positive")]
    ZeroAmount,
}
