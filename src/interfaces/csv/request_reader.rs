use crate::domain::wallet::AccountId;
use crate::error::{EngineError, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Read;

#[derive(Debug, Deserialize, PartialEq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum RequestType {
    Open,
    Deposit,
    Withdrawal,
    Wait,
}

/// One row of a request script.
///
/// `account` is required for every type except `wait`; `amount` for
/// deposits and withdrawals; `address` for withdrawals.
#[derive(Debug, Deserialize, PartialEq, Clone)]
pub struct Request {
    pub r#type: RequestType,
    pub account: Option<AccountId>,
    pub amount: Option<Decimal>,
    pub address: Option<String>,
}

impl Request {
    pub fn require_account(&self) -> Result<AccountId> {
        self.account.ok_or_else(|| {
            EngineError::ValidationError(format!("{:?} request missing account", self.r#type))
        })
    }

    pub fn require_amount(&self) -> Result<Decimal> {
        self.amount.ok_or_else(|| {
            EngineError::ValidationError(format!("{:?} request missing amount", self.r#type))
        })
    }
}

/// Reads requests from a CSV source.
///
/// This reader wraps `csv::Reader` and provides an iterator over `Result<Request>`.
/// It handles whitespace trimming and flexible record lengths automatically.
pub struct RequestReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> RequestReader<R> {
    /// Creates a new `RequestReader` from any `Read` source (e.g., File, Stdin).
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Returns an iterator that lazily reads and deserializes requests.
    pub fn requests(self) -> impl Iterator<Item = Result<Request>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(EngineError::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_reader_valid_stream() {
        let data = "type, account, amount, address\n\
                    open, 1, ,\n\
                    deposit, 1, 0.5,\n\
                    wait, , ,\n\
                    withdrawal, 1, 0.2, bc1qdest";
        let reader = RequestReader::new(data.as_bytes());
        let results: Vec<Result<Request>> = reader.requests().collect();

        assert_eq!(results.len(), 4);
        let deposit = results[1].as_ref().unwrap();
        assert_eq!(deposit.r#type, RequestType::Deposit);
        assert_eq!(deposit.amount, Some(dec!(0.5)));
        assert_eq!(deposit.address, None);

        let wait = results[2].as_ref().unwrap();
        assert_eq!(wait.r#type, RequestType::Wait);
        assert!(wait.require_account().is_err());

        let withdrawal = results[3].as_ref().unwrap();
        assert_eq!(withdrawal.address.as_deref(), Some("bc1qdest"));
        assert_eq!(withdrawal.require_amount().unwrap(), dec!(0.2));
    }

    #[test]
    fn test_reader_short_rows() {
        let data = "type, account, amount, address\nwait\nopen, 3";
        let reader = RequestReader::new(data.as_bytes());
        let results: Vec<Result<Request>> = reader.requests().collect();

        assert_eq!(results[0].as_ref().unwrap().r#type, RequestType::Wait);
        assert_eq!(results[1].as_ref().unwrap().account, Some(3));
    }

    #[test]
    fn test_reader_malformed_line() {
        let data = "type, account, amount, address\ntransfer, 1, 1.0,";
        let reader = RequestReader::new(data.as_bytes());
        let results: Vec<Result<Request>> = reader.requests().collect();

        assert!(results[0].is_err());
    }
}
