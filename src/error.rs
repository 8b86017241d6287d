use crate::domain::transaction::TransactionStatus;
use crate::domain::wallet::AccountId;
use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Insufficient balance: available {available}, requested {requested}")]
    InsufficientBalance {
        available: Decimal,
        requested: Decimal,
    },
    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),
    #[error("Wallet not found for account {0}")]
    WalletNotFound(AccountId),
    #[error("Wallet already exists for account {0}")]
    WalletExists(AccountId),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Illegal transition for {id}: {from} -> {to}")]
    IllegalTransition {
        id: String,
        from: TransactionStatus,
        to: TransactionStatus,
    },
    #[error("Transient network failure: {0}")]
    TransientNetworkFailure(String),
    #[error("Configuration unavailable: {0}")]
    ConfigurationUnavailable(String),
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),
    #[cfg(feature = "storage-rocksdb")]
    #[error("Storage error: {0}")]
    StorageError(#[from] rocksdb::Error),
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),
}

impl EngineError {
    /// True for errors that mean the transaction already left the state the
    /// caller expected, as opposed to a storage or programming failure.
    pub fn is_stale_transition(&self) -> bool {
        matches!(self, EngineError::IllegalTransition { .. })
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
