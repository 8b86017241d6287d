use crate::domain::ports::{TransactionStore, WalletLedger};
use crate::domain::transaction::{LedgerEffect, StatusUpdate, Transaction, TransactionKind};
use crate::domain::wallet::{AccountId, Amount, Balance, Wallet};
use crate::error::{EngineError, Result};
use ::rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, IteratorMode, Options, WriteBatch};
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Column Family for storing wallets.
pub const CF_WALLETS: &str = "wallets";
/// Column Family for storing transaction records.
pub const CF_TRANSACTIONS: &str = "transactions";

/// A persistent substrate using RocksDB.
///
/// Wallets and transactions live in separate Column Families. Every
/// read-modify-write goes through a single writer lock and commits through
/// one `WriteBatch`, so a status transition and its balance change land
/// atomically.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    writer: Arc<Mutex<()>>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path.
    ///
    /// Ensures that the required column families ("wallets" and "transactions") exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_wallets = ColumnFamilyDescriptor::new(CF_WALLETS, Options::default());
        let cf_transactions = ColumnFamilyDescriptor::new(CF_TRANSACTIONS, Options::default());

        let db = DB::open_cf_descriptors(&opts, path, vec![cf_wallets, cf_transactions])?;

        Ok(Self {
            db: Arc::new(db),
            writer: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| EngineError::StorageUnavailable(format!("missing column family {}", name)))
    }

    fn read<T: DeserializeOwned>(&self, cf: &str, key: &[u8]) -> Result<Option<T>> {
        let handle = self.cf(cf)?;
        match self.db.get_cf(handle, key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn scan<T: DeserializeOwned>(&self, cf: &str) -> Result<Vec<T>> {
        let handle = self.cf(cf)?;
        let mut out = Vec::new();
        for item in self.db.iterator_cf(handle, IteratorMode::Start) {
            let (_key, value) = item?;
            out.push(serde_json::from_slice(&value)?);
        }
        Ok(out)
    }

    fn stage<T: Serialize>(
        &self,
        batch: &mut WriteBatch,
        cf: &str,
        key: &[u8],
        value: &T,
    ) -> Result<()> {
        let handle = self.cf(cf)?;
        batch.put_cf(handle, key, serde_json::to_vec(value)?);
        Ok(())
    }

    fn load_wallet(&self, account: AccountId) -> Result<Wallet> {
        self.read(CF_WALLETS, &account.to_be_bytes())?
            .ok_or(EngineError::WalletNotFound(account))
    }

    fn load_transaction(&self, id: &str) -> Result<Transaction> {
        self.read(CF_TRANSACTIONS, id.as_bytes())?
            .ok_or_else(|| EngineError::TransactionNotFound(id.to_string()))
    }

    /// Stages the wallet touched by `effect` after applying it.
    fn stage_effect(&self, batch: &mut WriteBatch, effect: LedgerEffect) -> Result<()> {
        let mut wallet = self.load_wallet(effect.account())?;
        match effect {
            LedgerEffect::Credit(_, amount) => {
                wallet.credit(amount);
            }
            LedgerEffect::Debit(_, amount) => {
                wallet.debit(amount)?;
            }
        }
        self.stage(batch, CF_WALLETS, &wallet.account.to_be_bytes(), &wallet)
    }

    fn commit_wallet(&self, wallet: &Wallet) -> Result<()> {
        let mut batch = WriteBatch::default();
        self.stage(&mut batch, CF_WALLETS, &wallet.account.to_be_bytes(), wallet)?;
        self.db.write(batch)?;
        Ok(())
    }
}

#[async_trait]
impl WalletLedger for RocksDBStore {
    async fn open(&self, wallet: Wallet) -> Result<Wallet> {
        let _guard = self.writer.lock().await;
        if self
            .read::<Wallet>(CF_WALLETS, &wallet.account.to_be_bytes())?
            .is_some()
        {
            return Err(EngineError::WalletExists(wallet.account));
        }
        self.commit_wallet(&wallet)?;
        Ok(wallet)
    }

    async fn wallet(&self, account: AccountId) -> Result<Wallet> {
        self.load_wallet(account)
    }

    async fn credit(&self, account: AccountId, amount: Amount) -> Result<Balance> {
        let _guard = self.writer.lock().await;
        let mut wallet = self.load_wallet(account)?;
        let balance = wallet.credit(amount);
        self.commit_wallet(&wallet)?;
        Ok(balance)
    }

    async fn debit(&self, account: AccountId, amount: Amount) -> Result<Balance> {
        let _guard = self.writer.lock().await;
        let mut wallet = self.load_wallet(account)?;
        let balance = wallet.debit(amount)?;
        self.commit_wallet(&wallet)?;
        Ok(balance)
    }

    async fn balance(&self, account: AccountId) -> Result<Balance> {
        Ok(self.load_wallet(account)?.balance)
    }

    async fn all_wallets(&self) -> Result<Vec<Wallet>> {
        // Keys are big-endian account ids, so iteration order is account order.
        self.scan(CF_WALLETS)
    }
}

#[async_trait]
impl TransactionStore for RocksDBStore {
    async fn create(&self, tx: Transaction, effect: Option<LedgerEffect>) -> Result<()> {
        let _guard = self.writer.lock().await;
        if self
            .read::<Transaction>(CF_TRANSACTIONS, tx.id.as_bytes())?
            .is_some()
        {
            return Err(EngineError::ValidationError(format!(
                "duplicate transaction id {}",
                tx.id
            )));
        }

        let mut batch = WriteBatch::default();
        if let Some(effect) = effect {
            self.stage_effect(&mut batch, effect)?;
        }
        self.stage(&mut batch, CF_TRANSACTIONS, tx.id.as_bytes(), &tx)?;
        self.db.write(batch)?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Transaction> {
        self.load_transaction(id)
    }

    async fn update_status(&self, id: &str, update: StatusUpdate) -> Result<Transaction> {
        let _guard = self.writer.lock().await;
        let mut tx = self.load_transaction(id)?;
        tx.apply(&update)?;

        let mut batch = WriteBatch::default();
        if let Some(effect) = update.effect {
            self.stage_effect(&mut batch, effect)?;
        }
        self.stage(&mut batch, CF_TRANSACTIONS, tx.id.as_bytes(), &tx)?;
        self.db.write(batch)?;
        Ok(tx)
    }

    async fn mark_approved(&self, id: &str) -> Result<Transaction> {
        let _guard = self.writer.lock().await;
        let mut tx = self.load_transaction(id)?;
        if !tx.awaiting_approval() {
            return Err(EngineError::ValidationError(format!(
                "transaction {} is not awaiting approval",
                id
            )));
        }
        tx.approved_at = Some(chrono::Utc::now());
        tx.updated_at = chrono::Utc::now();

        let mut batch = WriteBatch::default();
        self.stage(&mut batch, CF_TRANSACTIONS, tx.id.as_bytes(), &tx)?;
        self.db.write(batch)?;
        Ok(tx)
    }

    async fn list_for_account(
        &self,
        account: AccountId,
        kind: Option<TransactionKind>,
    ) -> Result<Vec<Transaction>> {
        let mut txs: Vec<Transaction> = self
            .scan::<Transaction>(CF_TRANSACTIONS)?
            .into_iter()
            .filter(|tx| tx.account == account && kind.is_none_or(|k| tx.kind == k))
            .collect();
        txs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(txs)
    }

    async fn list_unsettled(&self) -> Result<Vec<Transaction>> {
        let mut txs: Vec<Transaction> = self
            .scan::<Transaction>(CF_TRANSACTIONS)?
            .into_iter()
            .filter(|tx| !tx.status.is_terminal())
            .collect();
        txs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(txs)
    }
}
