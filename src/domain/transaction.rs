use super::wallet::{AccountId, Amount};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const DEFAULT_CURRENCY: &str = "BTC";

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Hash, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Deposit,
    Withdrawal,
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionKind::Deposit => f.write_str("deposit"),
            TransactionKind::Withdrawal => f.write_str("withdrawal"),
        }
    }
}

/// Lifecycle states shared by deposits and withdrawals.
///
/// Which transitions are legal depends on the [`TransactionKind`]; see
/// [`TransactionStatus::can_transition`].
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Hash, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Initiated,
    Requested,
    Broadcasting,
    Pending,
    Completed,
    Failed,
    Rejected,
}

impl TransactionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Completed | TransactionStatus::Failed | TransactionStatus::Rejected
        )
    }

    /// The state a freshly created transaction of `kind` starts in.
    pub fn initial(kind: TransactionKind) -> Self {
        match kind {
            TransactionKind::Deposit => TransactionStatus::Initiated,
            TransactionKind::Withdrawal => TransactionStatus::Requested,
        }
    }

    /// Transition table.
    ///
    /// `Pending -> Pending` is the only self-transition and carries a
    /// confirmation count bump. `Broadcasting -> Completed` covers a
    /// deposit whose threshold is a single confirmation.
    pub fn can_transition(kind: TransactionKind, from: Self, to: Self) -> bool {
        use TransactionKind::*;
        use TransactionStatus::*;

        match (kind, from, to) {
            (Deposit, Initiated, Broadcasting | Failed) => true,
            (Deposit, Broadcasting, Pending | Completed | Failed) => true,
            (Deposit, Pending, Pending | Completed | Failed) => true,
            (Withdrawal, Requested, Broadcasting | Rejected) => true,
            (Withdrawal, Broadcasting, Completed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionStatus::Initiated => "initiated",
            TransactionStatus::Requested => "requested",
            TransactionStatus::Broadcasting => "broadcasting",
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Rejected => "rejected",
        };
        f.write_str(name)
    }
}

/// A simulated on-chain transaction and its lifecycle state.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Transaction {
    pub id: String,
    pub account: AccountId,
    pub kind: TransactionKind,
    pub amount: Amount,
    pub currency: String,
    pub status: TransactionStatus,
    pub from_address: Option<String>,
    pub to_address: Option<String>,
    pub tx_hash: Option<String>,
    pub confirmations: u32,
    pub fee: Decimal,
    /// Set when the amount exceeded the approval threshold at request time.
    pub requires_approval: bool,
    pub approved_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    pub fn new(id: String, account: AccountId, kind: TransactionKind, amount: Amount) -> Self {
        let now = Utc::now();
        Self {
            id,
            account,
            kind,
            amount,
            currency: DEFAULT_CURRENCY.to_string(),
            status: TransactionStatus::initial(kind),
            from_address: None,
            to_address: None,
            tx_hash: None,
            confirmations: 0,
            fee: Decimal::ZERO,
            requires_approval: false,
            approved_at: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether a withdrawal is still waiting for an administrator.
    pub fn awaiting_approval(&self) -> bool {
        self.requires_approval
            && self.approved_at.is_none()
            && self.status == TransactionStatus::Requested
    }

    /// Applies `update` after checking it against the transition table.
    ///
    /// The record is left untouched when the update is rejected.
    pub fn apply(&mut self, update: &StatusUpdate) -> crate::error::Result<()> {
        let legal = TransactionStatus::can_transition(self.kind, self.status, update.status);
        let regresses = update
            .confirmations
            .is_some_and(|count| count < self.confirmations);
        if !legal || regresses {
            return Err(crate::error::EngineError::IllegalTransition {
                id: self.id.clone(),
                from: self.status,
                to: update.status,
            });
        }

        self.status = update.status;
        if let Some(count) = update.confirmations {
            self.confirmations = count;
        }
        if let Some(hash) = &update.tx_hash {
            self.tx_hash = Some(hash.clone());
        }
        if let Some(reason) = &update.reason {
            self.failure_reason = Some(reason.clone());
        }
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// A balance mutation committed together with a status transition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LedgerEffect {
    Credit(AccountId, Amount),
    Debit(AccountId, Amount),
}

impl LedgerEffect {
    pub fn account(&self) -> AccountId {
        match self {
            LedgerEffect::Credit(account, _) | LedgerEffect::Debit(account, _) => *account,
        }
    }
}

/// A requested status transition plus whatever it implies.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub status: TransactionStatus,
    pub confirmations: Option<u32>,
    pub tx_hash: Option<String>,
    pub reason: Option<String>,
    pub effect: Option<LedgerEffect>,
}

impl StatusUpdate {
    pub fn to(status: TransactionStatus) -> Self {
        Self {
            status,
            confirmations: None,
            tx_hash: None,
            reason: None,
            effect: None,
        }
    }

    pub fn with_confirmations(mut self, confirmations: u32) -> Self {
        self.confirmations = Some(confirmations);
        self
    }

    pub fn with_hash(mut self, hash: String) -> Self {
        self.tx_hash = Some(hash);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_effect(mut self, effect: LedgerEffect) -> Self {
        self.effect = Some(effect);
        self
    }
}

/// Snapshot returned to pollers.
#[derive(Debug, Serialize, PartialEq, Clone)]
pub struct StatusReport {
    pub id: String,
    pub kind: TransactionKind,
    pub status: TransactionStatus,
    pub confirmations: u32,
    pub amount: Amount,
    pub fee: Decimal,
    pub tx_hash: Option<String>,
    pub awaiting_approval: bool,
}

impl From<&Transaction> for StatusReport {
    fn from(tx: &Transaction) -> Self {
        Self {
            id: tx.id.clone(),
            kind: tx.kind,
            status: tx.status,
            confirmations: tx.confirmations,
            amount: tx.amount,
            fee: tx.fee,
            tx_hash: tx.tx_hash.clone(),
            awaiting_approval: tx.awaiting_approval(),
        }
    }
}
