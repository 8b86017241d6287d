use crate::domain::transaction::{Transaction, TransactionKind, TransactionStatus};
use crate::domain::wallet::{AccountId, Wallet};
use crate::error::Result;
use rust_decimal::Decimal;
use serde::Serialize;
use std::io::Write;

#[derive(Serialize)]
struct WalletRow<'a> {
    account: AccountId,
    address: &'a str,
    balance: Decimal,
}

#[derive(Serialize)]
struct TransactionRow<'a> {
    id: &'a str,
    account: AccountId,
    r#type: TransactionKind,
    amount: Decimal,
    fee: Decimal,
    status: TransactionStatus,
    confirmations: u32,
    tx_hash: &'a str,
}

/// Writes final wallet balances as `account,address,balance`.
pub struct WalletWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> WalletWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_wallets(&mut self, wallets: Vec<Wallet>) -> Result<()> {
        for wallet in &wallets {
            self.writer.serialize(WalletRow {
                account: wallet.account,
                address: &wallet.address,
                balance: wallet.balance.value().normalize(),
            })?;
        }
        self.writer.flush()?;
        Ok(())
    }
}

/// Writes one line per transaction.
pub struct TransactionReportWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> TransactionReportWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_transactions(&mut self, transactions: &[Transaction]) -> Result<usize> {
        for tx in transactions {
            self.writer.serialize(TransactionRow {
                id: &tx.id,
                account: tx.account,
                r#type: tx.kind,
                amount: tx.amount.value().normalize(),
                fee: tx.fee.normalize(),
                status: tx.status,
                confirmations: tx.confirmations,
                tx_hash: tx.tx_hash.as_deref().unwrap_or_default(),
            })?;
        }
        self.writer.flush()?;
        Ok(transactions.len())
    }
}
