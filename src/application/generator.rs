//! Opaque identifiers for addresses, network hashes and transaction ids.
//!
//! Addresses and hashes are SHA-256 digests over a caller-provided seed,
//! the current time in nanoseconds and a fresh random salt. They only need
//! to be unique, not valid on any real network.

use crate::domain::wallet::AccountId;
use chrono::Utc;
use rand::RngCore;
use sha2::{Digest, Sha256};
use uuid::Uuid;

const ADDRESS_PREFIX: &str = "bc1q";
const ADDRESS_BODY_LEN: usize = 38;

fn digest(seed: &[u8]) -> [u8; 32] {
    let mut salt = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut salt);
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();

    let mut hasher = Sha256::new();
    hasher.update(seed);
    hasher.update(nanos.to_be_bytes());
    hasher.update(salt);
    hasher.finalize().into()
}

/// A `bc1q`-prefixed receive address for `account`.
pub fn new_address(account: AccountId) -> String {
    let body = hex::encode(digest(&account.to_be_bytes()));
    format!("{}{}", ADDRESS_PREFIX, &body[..ADDRESS_BODY_LEN])
}

/// A 64 hex character network hash.
pub fn new_tx_hash() -> String {
    hex::encode(digest(b"tx"))
}

pub fn new_transaction_id() -> String {
    Uuid::new_v4().to_string()
}
