//! Application layer containing the transaction-confirmation core.
//!
//! This module defines the `ConfirmationEngine`, which accepts deposit and
//! withdrawal requests and advances each transaction through its lifecycle
//! in a supervised `tokio` task, plus the identifier generator and the
//! failure/latency model those tasks draw from.

pub mod engine;
pub mod generator;
pub mod network;
