use chaingate::config::EngineConfig;
use chaingate::domain::transaction::{TransactionKind, TransactionStatus};
use chaingate::domain::wallet::Balance;
use chaingate::error::EngineError;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

mod common;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_withdrawals_never_overdraw() {
    let h = common::harness(common::fast_config(0));
    h.funded_wallet(1, dec!(1.0)).await;

    let first = {
        let engine = h.engine.clone();
        tokio::spawn(async move { engine.request_withdrawal(1, "bc1qfirst", dec!(0.6)).await })
    };
    let second = {
        let engine = h.engine.clone();
        tokio::spawn(async move { engine.request_withdrawal(1, "bc1qsecond", dec!(0.6)).await })
    };
    let results = [first.await.unwrap(), second.await.unwrap()];

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results.iter().any(|r| matches!(
        r,
        Err(EngineError::InsufficientBalance { .. })
    )));

    h.engine.wait_idle().await;
    assert_eq!(h.engine.balance(1).await.unwrap(), Balance::new(dec!(0.4)));
    assert_eq!(
        h.engine
            .transactions(1, Some(TransactionKind::Withdrawal))
            .await
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_small_withdrawals_drain_exactly() {
    let h = common::harness(common::fast_config(0));
    h.funded_wallet(1, dec!(1.0)).await;

    let mut handles = Vec::new();
    for _ in 0..25 {
        let engine = h.engine.clone();
        handles.push(tokio::spawn(async move {
            engine.request_withdrawal(1, "bc1qdest", dec!(0.1)).await
        }));
    }
    let mut accepted = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            accepted += 1;
        }
    }

    assert_eq!(accepted, 10);
    h.engine.wait_idle().await;
    assert_eq!(h.engine.balance(1).await.unwrap(), Balance::ZERO);
}

#[tokio::test]
async fn test_reserved_funds_plus_balance_is_conserved() {
    let h = common::harness(EngineConfig {
        withdrawal_broadcast_delay_ms: 10_000,
        ..common::fast_config(0)
    });
    h.funded_wallet(1, dec!(1.0)).await;

    h.engine
        .request_withdrawal(1, "bc1qdest", dec!(0.25))
        .await
        .unwrap();
    h.engine
        .request_withdrawal(1, "3J98t1WpEZ73CNmQviecrnyiWrnqRhWNLy", dec!(0.35))
        .await
        .unwrap();

    let reserved: Decimal = h
        .engine
        .transactions(1, Some(TransactionKind::Withdrawal))
        .await
        .unwrap()
        .iter()
        .filter(|tx| !tx.status.is_terminal())
        .map(|tx| tx.amount.value())
        .sum();
    let balance = h.engine.balance(1).await.unwrap();

    assert_eq!(balance, Balance::new(dec!(0.4)));
    assert_eq!(balance.value() + reserved, dec!(1.0));
    h.engine.shutdown().await;
}

#[tokio::test]
async fn test_over_balance_request_creates_no_record() {
    let h = common::harness(common::fast_config(0));
    h.funded_wallet(1, dec!(0.5)).await;

    let result = h.engine.request_withdrawal(1, "bc1qdest", dec!(0.50001)).await;
    assert!(matches!(
        result,
        Err(EngineError::InsufficientBalance { available, requested })
            if available == dec!(0.5) && requested == dec!(0.50001)
    ));
    assert!(h.engine.transactions(1, None).await.unwrap().is_empty());
    assert_eq!(h.engine.balance(1).await.unwrap(), Balance::new(dec!(0.5)));
}

#[tokio::test]
async fn test_withdrawal_of_entire_balance() {
    let h = common::harness(common::fast_config(0));
    h.funded_wallet(1, dec!(0.5)).await;

    let id = h
        .engine
        .request_withdrawal(1, "bc1qdest", dec!(0.5))
        .await
        .unwrap();
    h.engine.wait_idle().await;

    let tx = h.engine.transaction(&id).await.unwrap();
    assert_eq!(tx.status, TransactionStatus::Completed);
    assert_eq!(tx.confirmations, 0);
    assert_eq!(h.engine.balance(1).await.unwrap(), Balance::ZERO);
}

#[tokio::test]
async fn test_invalid_destination_is_rejected_before_reservation() {
    let h = common::harness(common::fast_config(0));
    h.funded_wallet(1, dec!(1.0)).await;

    let result = h.engine.request_withdrawal(1, "0xdeadbeef", dec!(0.1)).await;
    assert!(matches!(result, Err(EngineError::ValidationError(_))));
    assert_eq!(h.engine.balance(1).await.unwrap(), Balance::new(dec!(1.0)));
}

#[tokio::test]
async fn test_rejected_withdrawal_cannot_be_broadcast() {
    let h = common::harness(common::fast_config(0));
    h.funded_wallet(1, dec!(3.0)).await;

    // Above the default approval threshold of 1.0.
    let id = h
        .engine
        .request_withdrawal(1, "bc1qdest", dec!(1.5))
        .await
        .unwrap();
    assert!(h.engine.status(&id).await.unwrap().awaiting_approval);
    assert_eq!(h.engine.balance(1).await.unwrap(), Balance::new(dec!(1.5)));

    let report = h.engine.reject_withdrawal(&id, "address flagged").await.unwrap();
    assert_eq!(report.status, TransactionStatus::Rejected);
    assert_eq!(h.engine.balance(1).await.unwrap(), Balance::new(dec!(3.0)));

    assert!(h.engine.approve_withdrawal(&id).await.is_err());
    h.engine.wait_idle().await;
    assert_eq!(
        h.engine.status(&id).await.unwrap().status,
        TransactionStatus::Rejected
    );
}
