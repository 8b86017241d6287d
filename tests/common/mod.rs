#![allow(dead_code)]

use chaingate::application::engine::ConfirmationEngine;
use chaingate::config::EngineConfig;
use chaingate::domain::ports::WalletLedger;
use chaingate::domain::wallet::Amount;
use chaingate::infrastructure::in_memory::InMemoryStore;
use chaingate::infrastructure::notifier::BroadcastNotifier;
use rust_decimal::Decimal;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

/// Millisecond-scale delays so full lifecycles finish quickly.
pub fn fast_config(failure_rate_percent: u8) -> EngineConfig {
    EngineConfig {
        confirmation_threshold: 3,
        confirmation_interval_min_ms: 2,
        confirmation_interval_max_ms: 6,
        withdrawal_broadcast_delay_ms: 3,
        failure_rate_percent,
        ..Default::default()
    }
}

pub struct Harness {
    pub engine: Arc<ConfirmationEngine>,
    pub store: InMemoryStore,
    pub notifier: BroadcastNotifier,
}

pub fn harness(config: EngineConfig) -> Harness {
    let store = InMemoryStore::new();
    let notifier = BroadcastNotifier::new();
    let engine = ConfirmationEngine::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(notifier.clone()),
        config,
    )
    .expect("valid config");
    Harness {
        engine: Arc::new(engine),
        store,
        notifier,
    }
}

impl Harness {
    /// Opens a wallet for `account` and credits it directly through the ledger.
    pub async fn funded_wallet(&self, account: u32, balance: Decimal) {
        self.engine.open_wallet(account).await.unwrap();
        if balance > Decimal::ZERO {
            self.store
                .credit(account, Amount::new(balance).unwrap())
                .await
                .unwrap();
        }
    }
}

pub fn write_config(path: &Path, failure_rate_percent: u8) {
    let mut file = std::fs::File::create(path).unwrap();
    write!(
        file,
        r#"{{
            "confirmation_threshold": 3,
            "confirmation_interval_min_ms": 1,
            "confirmation_interval_max_ms": 4,
            "withdrawal_broadcast_delay_ms": 2,
            "failure_rate_percent": {}
        }}"#,
        failure_rate_percent
    )
    .unwrap();
}
