//! Synchronizer passes: resolving pending broker orders, reconciling
//! account state, and isolating per-portfolio failures.

mod common;

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sqlx::Row;

use common::{harness, seed_portfolio, seed_user};
use fiducia::domain::repositories::NewTransaction;
use fiducia::domain::trading::portfolio::{AccountSnapshot, BrokerPosition};
use fiducia::domain::trading::types::{
    BrokerOrderStatus, OrderStatusReport, OrderType, TradeSide, TransactionStatus,
};

async fn seed_pending_with_broker_ref(
    h: &common::Harness,
    user_id: &str,
    portfolio_id: &str,
    symbol: &str,
    quantity: Decimal,
    broker_ref: &str,
) -> String {
    h.store
        .create_transaction(&NewTransaction {
            user_id: user_id.to_string(),
            portfolio_id: Some(portfolio_id.to_string()),
            symbol: symbol.to_string(),
            side: TradeSide::Buy,
            quantity,
            price: None,
            total_amount: Decimal::ZERO,
            status: TransactionStatus::Pending,
            order_type: OrderType::Market,
            broker_reference: Some(broker_ref.to_string()),
            notes: "submitted before restart".to_string(),
        })
        .await
        .unwrap()
}

#[tokio::test]
async fn sync_resolves_pending_fill_and_reconciles_portfolio() {
    let h = harness().await;
    seed_user(&h.store, "u1").await;
    let portfolio_id = seed_portfolio(&h.store, "u1", dec!(50000), dec!(40000)).await;
    let tx_id =
        seed_pending_with_broker_ref(&h, "u1", &portfolio_id, "NVDA", dec!(100), "ord-1").await;

    // Broker reports the order filled at $100.
    h.broker
        .stage_order(
            "ord-1",
            OrderStatusReport {
                order_id: "ord-1".to_string(),
                status: BrokerOrderStatus::Filled,
                filled_qty: dec!(100),
                filled_avg_price: Some(dec!(100)),
                submitted_at: Some(Utc::now()),
                filled_at: Some(Utc::now()),
            },
        )
        .await;
    // Authoritative account state after the fill.
    h.broker
        .set_account(AccountSnapshot {
            portfolio_value: dec!(50000),
            cash: dec!(40000),
            buying_power: dec!(80000),
            positions: vec![BrokerPosition {
                symbol: "NVDA".to_string(),
                quantity: dec!(100),
                avg_entry_price: dec!(100),
                current_price: dec!(100),
                market_value: dec!(10000),
            }],
        })
        .await;

    let report = h.synchronizer.run_pass().await;
    assert!(!report.skipped);
    assert_eq!(report.orders_filled, 1);
    assert_eq!(report.errors, 0);

    let tx = h.store.get_transaction(&tx_id).await.unwrap().unwrap();
    assert_eq!(tx.status, TransactionStatus::Executed);
    assert_eq!(tx.price, Some(dec!(100)));
    assert!(tx.execution_date.is_some());

    let positions = h.store.get_portfolio_assets(&portfolio_id).await.unwrap();
    let nvda = positions.iter().find(|p| p.symbol == "NVDA").unwrap();
    assert_eq!(nvda.quantity, dec!(100));
    assert!(nvda.market_value_consistent());

    let portfolio = h.store.get_portfolio(&portfolio_id).await.unwrap().unwrap();
    let positions_value: Decimal = positions.iter().map(|p| p.market_value).sum();
    assert!(portfolio.is_reconciled(positions_value));

    // The pass records an alpaca_sync audit entry for the portfolio.
    let row = sqlx::query(
        "SELECT COUNT(*) AS n FROM audit_trail WHERE action = 'alpaca_sync' AND entity_id = ?",
    )
    .bind(&portfolio_id)
    .fetch_one(&h.pool)
    .await
    .unwrap();
    let n: i64 = row.get("n");
    assert!(n >= 1);
}

#[tokio::test]
async fn sync_applies_broker_cancellations() {
    let h = harness().await;
    seed_user(&h.store, "u1").await;
    let portfolio_id = seed_portfolio(&h.store, "u1", dec!(50000), dec!(50000)).await;
    let tx_id =
        seed_pending_with_broker_ref(&h, "u1", &portfolio_id, "AAPL", dec!(10), "ord-2").await;

    h.broker
        .stage_order(
            "ord-2",
            OrderStatusReport {
                order_id: "ord-2".to_string(),
                status: BrokerOrderStatus::Canceled,
                filled_qty: Decimal::ZERO,
                filled_avg_price: None,
                submitted_at: Some(Utc::now()),
                filled_at: None,
            },
        )
        .await;

    let report = h.synchronizer.run_pass().await;
    assert_eq!(report.orders_closed, 1);

    let tx = h.store.get_transaction(&tx_id).await.unwrap().unwrap();
    assert_eq!(tx.status, TransactionStatus::Cancelled);
}

#[tokio::test]
async fn unknown_broker_reference_leaves_transaction_pending() {
    let h = harness().await;
    seed_user(&h.store, "u1").await;
    let portfolio_id = seed_portfolio(&h.store, "u1", dec!(50000), dec!(50000)).await;
    let tx_id =
        seed_pending_with_broker_ref(&h, "u1", &portfolio_id, "AAPL", dec!(10), "ghost-ref").await;

    let report = h.synchronizer.run_pass().await;
    // A broker lookup failure is isolated; the pass itself succeeds.
    assert_eq!(report.errors, 0);

    let tx = h.store.get_transaction(&tx_id).await.unwrap().unwrap();
    assert_eq!(tx.status, TransactionStatus::Pending);
}

#[tokio::test]
async fn one_bad_portfolio_does_not_stop_the_pass() {
    let h = harness().await;
    seed_user(&h.store, "u1").await;
    seed_user(&h.store, "u2").await;
    let p1 = seed_portfolio(&h.store, "u1", dec!(50000), dec!(50000)).await;
    let p2 = seed_portfolio(&h.store, "u2", dec!(50000), dec!(50000)).await;

    // u1's order reference is unknown to the broker; u2's fills normally.
    seed_pending_with_broker_ref(&h, "u1", &p1, "AAPL", dec!(10), "ghost").await;
    let good_tx = seed_pending_with_broker_ref(&h, "u2", &p2, "MSFT", dec!(5), "ord-good").await;
    h.broker
        .stage_order(
            "ord-good",
            OrderStatusReport {
                order_id: "ord-good".to_string(),
                status: BrokerOrderStatus::Filled,
                filled_qty: dec!(5),
                filled_avg_price: Some(dec!(417.10)),
                submitted_at: Some(Utc::now()),
                filled_at: Some(Utc::now()),
            },
        )
        .await;

    let report = h.synchronizer.run_pass().await;
    assert_eq!(report.portfolios_considered, 2);
    assert_eq!(report.orders_filled, 1);

    let tx = h.store.get_transaction(&good_tx).await.unwrap().unwrap();
    assert_eq!(tx.status, TransactionStatus::Executed);
}

#[tokio::test]
async fn manual_sync_for_unknown_user_is_not_found() {
    let h = harness().await;
    let result = h.synchronizer.sync_user_now("nobody").await;
    assert!(result.is_err());
}

#[tokio::test]
async fn sync_status_reports_phase_and_cadence() {
    let h = harness().await;
    let status = h.synchronizer.status();
    assert!(!status.running);
    assert_eq!(status.next_cadence, status.phase.cadence());
}
