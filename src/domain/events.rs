use super::transaction::{Transaction, TransactionKind, TransactionStatus};
use super::wallet::AccountId;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Events handed to the notification port.
#[derive(Debug, Serialize, PartialEq, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LifecycleEvent {
    StatusChanged {
        transaction_id: String,
        account: AccountId,
        kind: TransactionKind,
        status: TransactionStatus,
        confirmations: u32,
        at: DateTime<Utc>,
    },
    RiskAlert {
        account: AccountId,
        risk_score: u8,
        reason: String,
        at: DateTime<Utc>,
    },
    ReportReady {
        report_id: String,
        status: String,
        at: DateTime<Utc>,
    },
}

impl LifecycleEvent {
    pub fn status_changed(tx: &Transaction) -> Self {
        LifecycleEvent::StatusChanged {
            transaction_id: tx.id.clone(),
            account: tx.account,
            kind: tx.kind,
            status: tx.status,
            confirmations: tx.confirmations,
            at: tx.updated_at,
        }
    }

    pub fn risk_alert(account: AccountId, risk_score: u8, reason: impl Into<String>) -> Self {
        LifecycleEvent::RiskAlert {
            account,
            risk_score,
            reason: reason.into(),
            at: Utc::now(),
        }
    }

    pub fn report_ready(report_id: impl Into<String>, status: impl Into<String>) -> Self {
        LifecycleEvent::ReportReady {
            report_id: report_id.into(),
            status: status.into(),
            at: Utc::now(),
        }
    }
}
