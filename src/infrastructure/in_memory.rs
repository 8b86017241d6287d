use crate::domain::ports::{TransactionStore, WalletLedger};
use crate::domain::transaction::{LedgerEffect, StatusUpdate, Transaction, TransactionKind};
use crate::domain::wallet::{AccountId, Amount, Balance, Wallet};
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

type Slot<T> = Arc<Mutex<T>>;

/// A thread-safe in-memory persistence substrate.
///
/// Implements both [`WalletLedger`] and [`TransactionStore`] over shared
/// maps of individually locked records, so mutations of one wallet are
/// serialized without blocking other wallets. Map locks are only held long
/// enough to look up a slot; record locks are taken transaction first, then
/// wallet.
///
/// `Clone` shares the underlying maps.
#[derive(Default, Clone)]
pub struct InMemoryStore {
    wallets: Arc<RwLock<HashMap<AccountId, Slot<Wallet>>>>,
    transactions: Arc<RwLock<HashMap<String, Slot<Transaction>>>>,
}

impl InMemoryStore {
    /// Creates a new, empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    async fn wallet_slot(&self, account: AccountId) -> Result<Slot<Wallet>> {
        let wallets = self.wallets.read().await;
        wallets
            .get(&account)
            .cloned()
            .ok_or(EngineError::WalletNotFound(account))
    }

    async fn transaction_slot(&self, id: &str) -> Result<Slot<Transaction>> {
        let transactions = self.transactions.read().await;
        transactions
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::TransactionNotFound(id.to_string()))
    }

    async fn snapshot(&self) -> Vec<Transaction> {
        let slots: Vec<Slot<Transaction>> =
            self.transactions.read().await.values().cloned().collect();
        let mut out = Vec::with_capacity(slots.len());
        for slot in slots {
            out.push(slot.lock().await.clone());
        }
        out
    }
}

fn apply_effect(wallet: &mut Wallet, effect: LedgerEffect) -> Result<()> {
    match effect {
        LedgerEffect::Credit(_, amount) => {
            wallet.credit(amount);
            Ok(())
        }
        LedgerEffect::Debit(_, amount) => wallet.debit(amount).map(|_| ()),
    }
}

#[async_trait]
impl WalletLedger for InMemoryStore {
    async fn open(&self, wallet: Wallet) -> Result<Wallet> {
        let mut wallets = self.wallets.write().await;
        if wallets.contains_key(&wallet.account) {
            return Err(EngineError::WalletExists(wallet.account));
        }
        wallets.insert(wallet.account, Arc::new(Mutex::new(wallet.clone())));
        Ok(wallet)
    }

    async fn wallet(&self, account: AccountId) -> Result<Wallet> {
        let slot = self.wallet_slot(account).await?;
        let wallet = slot.lock().await;
        Ok(wallet.clone())
    }

    async fn credit(&self, account: AccountId, amount: Amount) -> Result<Balance> {
        let slot = self.wallet_slot(account).await?;
        let mut wallet = slot.lock().await;
        Ok(wallet.credit(amount))
    }

    async fn debit(&self, account: AccountId, amount: Amount) -> Result<Balance> {
        let slot = self.wallet_slot(account).await?;
        let mut wallet = slot.lock().await;
        wallet.debit(amount)
    }

    async fn balance(&self, account: AccountId) -> Result<Balance> {
        let slot = self.wallet_slot(account).await?;
        let wallet = slot.lock().await;
        Ok(wallet.balance)
    }

    async fn all_wallets(&self) -> Result<Vec<Wallet>> {
        let slots: Vec<Slot<Wallet>> = self.wallets.read().await.values().cloned().collect();
        let mut wallets = Vec::with_capacity(slots.len());
        for slot in slots {
            wallets.push(slot.lock().await.clone());
        }
        wallets.sort_by_key(|w| w.account);
        Ok(wallets)
    }
}

#[async_trait]
impl TransactionStore for InMemoryStore {
    async fn create(&self, tx: Transaction, effect: Option<LedgerEffect>) -> Result<()> {
        // The wallet stays locked until the record is visible, so no reader
        // sees the debit without the transaction or the other way round.
        let wallet_slot = match effect {
            Some(effect) => Some(self.wallet_slot(effect.account()).await?),
            None => None,
        };
        let mut wallet_guard = match &wallet_slot {
            Some(slot) => Some(slot.lock().await),
            None => None,
        };

        let mut transactions = self.transactions.write().await;
        if transactions.contains_key(&tx.id) {
            return Err(EngineError::ValidationError(format!(
                "duplicate transaction id {}",
                tx.id
            )));
        }

        if let (Some(wallet), Some(effect)) = (wallet_guard.as_deref_mut(), effect) {
            apply_effect(wallet, effect)?;
        }
        transactions.insert(tx.id.clone(), Arc::new(Mutex::new(tx)));
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Transaction> {
        let slot = self.transaction_slot(id).await?;
        let tx = slot.lock().await;
        Ok(tx.clone())
    }

    async fn update_status(&self, id: &str, update: StatusUpdate) -> Result<Transaction> {
        let slot = self.transaction_slot(id).await?;
        let mut tx = slot.lock().await;

        let mut next = tx.clone();
        next.apply(&update)?;

        if let Some(effect) = update.effect {
            let wallet_slot = self.wallet_slot(effect.account()).await?;
            let mut wallet = wallet_slot.lock().await;
            apply_effect(&mut wallet, effect)?;
        }
        *tx = next.clone();
        Ok(next)
    }

    async fn mark_approved(&self, id: &str) -> Result<Transaction> {
        let slot = self.transaction_slot(id).await?;
        let mut tx = slot.lock().await;
        if !tx.awaiting_approval() {
            return Err(EngineError::ValidationError(format!(
                "transaction {} is not awaiting approval",
                id
            )));
        }
        tx.approved_at = Some(chrono::Utc::now());
        tx.updated_at = chrono::Utc::now();
        Ok(tx.clone())
    }

    async fn list_for_account(
        &self,
        account: AccountId,
        kind: Option<TransactionKind>,
    ) -> Result<Vec<Transaction>> {
        let mut txs: Vec<Transaction> = self
            .snapshot()
            .await
            .into_iter()
            .filter(|tx| tx.account == account && kind.is_none_or(|k| tx.kind == k))
            .collect();
        txs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(txs)
    }

    async fn list_unsettled(&self) -> Result<Vec<Transaction>> {
        let mut txs: Vec<Transaction> = self
            .snapshot()
            .await
            .into_iter()
            .filter(|tx| !tx.status.is_terminal())
            .collect();
        txs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(txs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::transaction::TransactionStatus;
    use rust_decimal_macros::dec;

    fn amount(value: rust_decimal::Decimal) -> Amount {
        Amount::new(value).unwrap()
    }

    async fn store_with_wallet(balance: rust_decimal::Decimal) -> InMemoryStore {
        let store = InMemoryStore::new();
        let mut wallet = Wallet::new(1, "bc1qone".to_string());
        wallet.balance = Balance::new(balance);
        store.open(wallet).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_open_twice_fails() {
        let store = store_with_wallet(dec!(0)).await;
        let result = store.open(Wallet::new(1, "bc1qother".to_string())).await;
        assert!(matches!(result, Err(EngineError::WalletExists(1))));
    }

    #[tokio::test]
    async fn test_credit_and_debit() {
        let store = store_with_wallet(dec!(1.0)).await;

        store.credit(1, amount(dec!(0.5))).await.unwrap();
        let balance = store.debit(1, amount(dec!(1.2))).await.unwrap();
        assert_eq!(balance, Balance::new(dec!(0.3)));

        let result = store.debit(1, amount(dec!(0.4))).await;
        assert!(matches!(
            result,
            Err(EngineError::InsufficientBalance { .. })
        ));
        assert_eq!(store.balance(1).await.unwrap(), Balance::new(dec!(0.3)));
    }

    #[tokio::test]
    async fn test_unknown_wallet() {
        let store = InMemoryStore::new();
        assert!(matches!(
            store.balance(9).await,
            Err(EngineError::WalletNotFound(9))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_debits_never_overdraw() {
        let store = store_with_wallet(dec!(1.0)).await;

        let handles: Vec<_> = (0..20)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.debit(1, amount(dec!(0.1))).await })
            })
            .collect();

        let mut succeeded = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                succeeded += 1;
            }
        }

        assert_eq!(succeeded, 10);
        assert_eq!(store.balance(1).await.unwrap(), Balance::ZERO);
    }

    #[tokio::test]
    async fn test_create_with_debit_is_all_or_nothing() {
        let store = store_with_wallet(dec!(0.5)).await;
        let tx = Transaction::new(
            "w-1".to_string(),
            1,
            TransactionKind::Withdrawal,
            amount(dec!(0.6)),
        );

        let result = store
            .create(tx, Some(LedgerEffect::Debit(1, amount(dec!(0.6)))))
            .await;
        assert!(matches!(
            result,
            Err(EngineError::InsufficientBalance { .. })
        ));
        assert!(matches!(
            store.get("w-1").await,
            Err(EngineError::TransactionNotFound(_))
        ));
        assert_eq!(store.balance(1).await.unwrap(), Balance::new(dec!(0.5)));
    }

    #[tokio::test]
    async fn test_update_status_applies_credit_with_transition() {
        let store = store_with_wallet(dec!(0)).await;
        let tx = Transaction::new(
            "d-1".to_string(),
            1,
            TransactionKind::Deposit,
            amount(dec!(0.5)),
        );
        store.create(tx, None).await.unwrap();

        store
            .update_status("d-1", StatusUpdate::to(TransactionStatus::Broadcasting))
            .await
            .unwrap();
        let completed = store
            .update_status(
                "d-1",
                StatusUpdate::to(TransactionStatus::Completed)
                    .with_confirmations(1)
                    .with_effect(LedgerEffect::Credit(1, amount(dec!(0.5)))),
            )
            .await
            .unwrap();

        assert_eq!(completed.status, TransactionStatus::Completed);
        assert_eq!(store.balance(1).await.unwrap(), Balance::new(dec!(0.5)));

        // A second completion is illegal and must not credit again.
        let again = store
            .update_status(
                "d-1",
                StatusUpdate::to(TransactionStatus::Completed)
                    .with_effect(LedgerEffect::Credit(1, amount(dec!(0.5)))),
            )
            .await;
        assert!(matches!(again, Err(EngineError::IllegalTransition { .. })));
        assert_eq!(store.balance(1).await.unwrap(), Balance::new(dec!(0.5)));
    }

    #[tokio::test]
    async fn test_failed_effect_leaves_status_unchanged() {
        let store = store_with_wallet(dec!(0)).await;
        let tx = Transaction::new(
            "w-2".to_string(),
            1,
            TransactionKind::Withdrawal,
            amount(dec!(1.0)),
        );
        store.create(tx, None).await.unwrap();

        let result = store
            .update_status(
                "w-2",
                StatusUpdate::to(TransactionStatus::Broadcasting)
                    .with_effect(LedgerEffect::Debit(1, amount(dec!(1.0)))),
            )
            .await;
        assert!(result.is_err());
        assert_eq!(
            store.get("w-2").await.unwrap().status,
            TransactionStatus::Requested
        );
    }

    #[tokio::test]
    async fn test_list_filters() {
        let store = store_with_wallet(dec!(5)).await;
        let deposit = Transaction::new(
            "d-1".to_string(),
            1,
            TransactionKind::Deposit,
            amount(dec!(1)),
        );
        let withdrawal = Transaction::new(
            "w-1".to_string(),
            1,
            TransactionKind::Withdrawal,
            amount(dec!(1)),
        );
        let other = Transaction::new(
            "d-2".to_string(),
            2,
            TransactionKind::Deposit,
            amount(dec!(1)),
        );
        store.create(deposit, None).await.unwrap();
        store.create(withdrawal, None).await.unwrap();
        store.create(other, None).await.unwrap();

        assert_eq!(store.list_for_account(1, None).await.unwrap().len(), 2);
        let deposits = store
            .list_for_account(1, Some(TransactionKind::Deposit))
            .await
            .unwrap();
        assert_eq!(deposits.len(), 1);
        assert_eq!(deposits[0].id, "d-1");

        store
            .update_status("d-1", StatusUpdate::to(TransactionStatus::Failed))
            .await
            .unwrap();
        let unsettled = store.list_unsettled().await.unwrap();
        assert_eq!(unsettled.len(), 2);
        assert!(unsettled.iter().all(|tx| tx.id != "d-1"));
    }

    #[tokio::test]
    async fn test_mark_approved_only_when_awaiting() {
        let store = store_with_wallet(dec!(5)).await;
        let mut tx = Transaction::new(
            "w-1".to_string(),
            1,
            TransactionKind::Withdrawal,
            amount(dec!(2)),
        );
        tx.requires_approval = true;
        store.create(tx, None).await.unwrap();

        let approved = store.mark_approved("w-1").await.unwrap();
        assert!(approved.approved_at.is_some());
        assert!(store.mark_approved("w-1").await.is_err());
    }
}
