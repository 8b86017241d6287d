//! Failure and latency model for the simulated network.
//!
//! Each sampling function draws from the calling thread's own RNG, so no
//! random state is shared between confirmation tasks.

use rand::Rng;
use rand::distributions::{Distribution, WeightedIndex};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

#[derive(Debug, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum NetworkStatus {
    Online,
    Slow,
    Congested,
}

const STATUSES: [NetworkStatus; 3] = [
    NetworkStatus::Online,
    NetworkStatus::Slow,
    NetworkStatus::Congested,
];
const STATUS_WEIGHTS: [u32; 3] = [80, 15, 5];

impl NetworkStatus {
    pub fn fee_multiplier(&self) -> Decimal {
        match self {
            NetworkStatus::Online => dec!(1.0),
            NetworkStatus::Slow => dec!(1.5),
            NetworkStatus::Congested => dec!(2.0),
        }
    }
}

impl fmt::Display for NetworkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkStatus::Online => f.write_str("online"),
            NetworkStatus::Slow => f.write_str("slow"),
            NetworkStatus::Congested => f.write_str("congested"),
        }
    }
}

/// 80% online, 15% slow, 5% congested.
pub fn sample_network_status() -> NetworkStatus {
    let mut rng = rand::thread_rng();
    match WeightedIndex::new(STATUS_WEIGHTS) {
        Ok(dist) => STATUSES[dist.sample(&mut rng)],
        Err(_) => NetworkStatus::Online,
    }
}

/// Uniform in `[min, max]`; `min` when the range is empty or inverted.
pub fn sample_delay(min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    let millis = rand::thread_rng().gen_range(min.as_millis()..=max.as_millis());
    Duration::from_millis(u64::try_from(millis).unwrap_or(u64::MAX))
}

/// One Bernoulli draw with probability `failure_rate_percent / 100`.
pub fn should_fail(failure_rate_percent: u8) -> bool {
    let p = f64::from(failure_rate_percent.min(100)) / 100.0;
    rand::thread_rng().gen_bool(p)
}

/// `min(base_fee * multiplier[status], amount * cap_fraction)`.
pub fn compute_fee(
    amount: Decimal,
    status: NetworkStatus,
    base_fee: Decimal,
    cap_fraction: Decimal,
) -> Decimal {
    let fee = base_fee * status.fee_multiplier();
    fee.min(amount * cap_fraction)
}
