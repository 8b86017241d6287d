use super::events::LifecycleEvent;
use super::transaction::{LedgerEffect, StatusUpdate, Transaction, TransactionKind};
use super::wallet::{AccountId, Amount, Balance, Wallet};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Balance bookkeeping, one wallet per account.
///
/// Every mutation of a single wallet is serialized with every other
/// mutation of that wallet. Nothing outside an implementation of this trait
/// reads a balance and writes it back.
#[async_trait]
pub trait WalletLedger: Send + Sync {
    async fn open(&self, wallet: Wallet) -> Result<Wallet>;
    async fn wallet(&self, account: AccountId) -> Result<Wallet>;
    async fn credit(&self, account: AccountId, amount: Amount) -> Result<Balance>;
    async fn debit(&self, account: AccountId, amount: Amount) -> Result<Balance>;
    async fn balance(&self, account: AccountId) -> Result<Balance>;
    async fn all_wallets(&self) -> Result<Vec<Wallet>>;
}

/// Transaction records and their lifecycle.
///
/// `create` and `update_status` commit the record together with the
/// optional ledger effect: either both are visible to readers or neither is.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    async fn create(&self, tx: Transaction, effect: Option<LedgerEffect>) -> Result<()>;
    async fn get(&self, id: &str) -> Result<Transaction>;
    async fn update_status(&self, id: &str, update: StatusUpdate) -> Result<Transaction>;
    async fn mark_approved(&self, id: &str) -> Result<Transaction>;
    async fn list_for_account(
        &self,
        account: AccountId,
        kind: Option<TransactionKind>,
    ) -> Result<Vec<Transaction>>;
    async fn list_unsettled(&self) -> Result<Vec<Transaction>>;
}

/// Fire-and-forget delivery of lifecycle events to external listeners.
pub trait NotificationPort: Send + Sync {
    fn publish(&self, event: LifecycleEvent);
}

pub type WalletLedgerRef = Arc<dyn WalletLedger>;
pub type TransactionStoreRef = Arc<dyn TransactionStore>;
pub type NotificationPortRef = Arc<dyn NotificationPort>;
