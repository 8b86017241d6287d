use crate::error::EngineError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};

/// Identifier of an already-authenticated platform account.
pub type AccountId = u32;

/// Represents a non-negative wallet balance.
///
/// Wraps `rust_decimal::Decimal` so that balance arithmetic only happens
/// through the checked operations on [`Wallet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Balance(pub Decimal);

/// Represents a strictly positive amount of currency moved by a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Amount(Decimal);

impl Amount {
    pub fn new(value: Decimal) -> Result<Self, EngineError> {
        if value > Decimal::ZERO {
            Ok(Self(value))
        } else {
            Err(EngineError::ValidationError(
                "Amount must be positive".to_string(),
            ))
        }
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = EngineError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl From<Amount> for Balance {
    fn from(amount: Amount) -> Self {
        Self(amount.0)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.normalize())
    }
}

impl Balance {
    pub const ZERO: Self = Self(Decimal::ZERO);

    pub fn new(amount: Decimal) -> Self {
        Self(amount)
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl fmt::Display for Balance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.normalize())
    }
}

impl Add<Amount> for Balance {
    type Output = Self;
    fn add(self, rhs: Amount) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub<Amount> for Balance {
    type Output = Option<Self>;
    fn sub(self, rhs: Amount) -> Self::Output {
        let remaining = self.0 - rhs.0;
        (remaining >= Decimal::ZERO).then_some(Self(remaining))
    }
}

/// One account's wallet: a unique receive address and its balance.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Wallet {
    pub account: AccountId,
    pub address: String,
    pub balance: Balance,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    pub fn new(account: AccountId, address: String) -> Self {
        let now = Utc::now();
        Self {
            account,
            address,
            balance: Balance::ZERO,
            created_at: now,
            updated_at: now,
        }
    }

    /// Adds funds to the balance.
    pub fn credit(&mut self, amount: Amount) -> Balance {
        self.balance = self.balance + amount;
        self.updated_at = Utc::now();
        self.balance
    }

    /// Removes funds if the balance covers them; leaves the wallet untouched otherwise.
    pub fn debit(&mut self, amount: Amount) -> Result<Balance, EngineError> {
        match self.balance - amount {
            Some(remaining) => {
                self.balance = remaining;
                self.updated_at = Utc::now();
                Ok(remaining)
            }
            None => Err(EngineError::InsufficientBalance {
                available: self.balance.value(),
                requested: amount.value(),
            }),
        }
    }
}
