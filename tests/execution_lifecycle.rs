//! Transaction state machine: pending creation, execution, fills, terminal
//! immutability, cancellation and the approval workflow.

mod common;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use common::{harness, seed_portfolio, seed_position, seed_user};
use fiducia::application::execution::TradeRecommendation;
use fiducia::domain::errors::{ExecutionError, StoreError};
use fiducia::domain::repositories::TransactionPatch;
use fiducia::domain::trading::types::{
    BrokerOrderStatus, OrderType, TradeSide, TransactionStatus,
};

fn buy(symbol: &str, quantity: Decimal) -> TradeRecommendation {
    TradeRecommendation {
        symbol: symbol.to_string(),
        action: TradeSide::Buy,
        quantity: Some(quantity),
        order_type: OrderType::Market,
        price: None,
        rationale: "test".to_string(),
    }
}

fn sell(symbol: &str, quantity: Option<Decimal>) -> TradeRecommendation {
    TradeRecommendation {
        symbol: symbol.to_string(),
        action: TradeSide::Sell,
        quantity,
        order_type: OrderType::Market,
        price: None,
        rationale: "test".to_string(),
    }
}

#[tokio::test]
async fn happy_path_buy_fills_and_reconciles_portfolio() {
    let h = harness().await;
    seed_user(&h.store, "u1").await;
    let portfolio_id = seed_portfolio(&h.store, "u1", dec!(50000), dec!(20000)).await;
    h.broker.set_price("MSFT", dec!(400)).await;

    let pending = h.execution.create_pending_trade("u1", &buy("MSFT", dec!(10))).await.unwrap();
    assert_eq!(pending.status, TransactionStatus::Pending);
    assert!(pending.verdict.approved);
    assert_eq!(pending.estimated_price, dec!(400));

    let stored = h.store.get_transaction(&pending.transaction_id).await.unwrap().unwrap();
    assert_eq!(stored.status, TransactionStatus::Pending);

    // Broker fills slightly above the estimate.
    h.broker.set_price("MSFT", dec!(401)).await;
    let outcome = h.execution.execute(&pending.transaction_id).await.unwrap();
    assert_eq!(outcome.status, TransactionStatus::Executed);
    assert_eq!(outcome.filled_qty, dec!(10));
    assert_eq!(outcome.fill_price, Some(dec!(401)));

    let positions = h.store.get_portfolio_assets(&portfolio_id).await.unwrap();
    let msft = positions.iter().find(|p| p.symbol == "MSFT").unwrap();
    assert_eq!(msft.quantity, dec!(10));
    assert_eq!(msft.average_cost, dec!(401));
    assert!(msft.market_value_consistent());

    let portfolio = h.store.get_portfolio(&portfolio_id).await.unwrap().unwrap();
    let positions_value: Decimal = positions.iter().map(|p| p.market_value).sum();
    assert!(
        portfolio.is_reconciled(positions_value),
        "total_value {} != cash {} + positions {}",
        portfolio.total_value,
        portfolio.cash_balance,
        positions_value
    );
}

#[tokio::test]
async fn executed_transaction_cannot_fill_twice() {
    let h = harness().await;
    seed_user(&h.store, "u1").await;
    seed_portfolio(&h.store, "u1", dec!(50000), dec!(20000)).await;

    let pending = h.execution.create_pending_trade("u1", &buy("MSFT", dec!(5))).await.unwrap();
    h.execution.execute(&pending.transaction_id).await.unwrap();

    let second = h.execution.execute(&pending.transaction_id).await;
    assert!(matches!(
        second,
        Err(ExecutionError::Store(StoreError::InvalidStateTransition { .. }))
    ));
}

#[tokio::test]
async fn sell_validations_against_holdings() {
    let h = harness().await;
    seed_user(&h.store, "u1").await;
    let portfolio_id = seed_portfolio(&h.store, "u1", dec!(50000), dec!(5000)).await;
    seed_position(
        &h.store, &portfolio_id, "SPY", dec!(30), dec!(450), dec!(500), dec!(0.30), "Index",
    )
    .await;

    let not_held = h.execution.create_pending_trade("u1", &sell("MSFT", Some(dec!(1)))).await;
    assert!(matches!(not_held, Err(ExecutionError::SymbolNotHeld { .. })));

    let too_many = h.execution.create_pending_trade("u1", &sell("SPY", Some(dec!(40)))).await;
    match too_many {
        Err(ExecutionError::InsufficientShares { requested, held, .. }) => {
            assert_eq!(requested, dec!(40));
            assert_eq!(held, dec!(30));
        }
        other => panic!("expected InsufficientShares, got {other:?}"),
    }

    // "sell all" resolves to the full held quantity.
    let all = h.execution.create_pending_trade("u1", &sell("SPY", None)).await.unwrap();
    assert_eq!(all.quantity, dec!(30));

    // Selling exactly what is held is legal; the position disappears on fill.
    let outcome = h.execution.execute(&all.transaction_id).await.unwrap();
    assert_eq!(outcome.status, TransactionStatus::Executed);
    let positions = h.store.get_portfolio_assets(&portfolio_id).await.unwrap();
    assert!(positions.iter().all(|p| p.symbol != "SPY"));
}

#[tokio::test]
async fn buy_then_sell_returns_position_to_flat() {
    let h = harness().await;
    seed_user(&h.store, "u1").await;
    let portfolio_id = seed_portfolio(&h.store, "u1", dec!(50000), dec!(20000)).await;
    h.broker.set_price("KO", dec!(60)).await;

    let bought = h.execution.create_pending_trade("u1", &buy("KO", dec!(20))).await.unwrap();
    h.execution.execute(&bought.transaction_id).await.unwrap();

    let cash_before = h.store.get_portfolio(&portfolio_id).await.unwrap().unwrap().cash_balance;

    let sold = h.execution.create_pending_trade("u1", &sell("KO", Some(dec!(20)))).await.unwrap();
    h.execution.execute(&sold.transaction_id).await.unwrap();

    let positions = h.store.get_portfolio_assets(&portfolio_id).await.unwrap();
    assert!(positions.iter().all(|p| p.symbol != "KO"), "position must be deleted at zero");
    let cash_after = h.store.get_portfolio(&portfolio_id).await.unwrap().unwrap().cash_balance;
    assert_eq!(cash_before, cash_after, "cash is reconciled by sync, not by fills");
}

#[tokio::test]
async fn compliance_rejection_persists_a_rejected_row() {
    let h = harness().await;
    seed_user(&h.store, "u1").await;
    let portfolio_id = seed_portfolio(&h.store, "u1", dec!(100000), dec!(10000)).await;
    seed_position(
        &h.store, &portfolio_id, "AAPL", dec!(100), dec!(400), dec!(450), dec!(0.45), "Technology",
    )
    .await;
    h.broker.set_price("AAPL", dec!(100)).await;

    // 45,000 existing + 10,000 trade = 55% of the portfolio.
    let outcome = h.execution.create_pending_trade("u1", &buy("AAPL", dec!(100))).await.unwrap();
    assert_eq!(outcome.status, TransactionStatus::Rejected);
    assert!(!outcome.verdict.approved);

    let stored = h.store.get_transaction(&outcome.transaction_id).await.unwrap().unwrap();
    assert_eq!(stored.status, TransactionStatus::Rejected);
    assert!(stored.notes.contains("CONC-001"));

    // Rejected is terminal: execution refuses it.
    let exec = h.execution.execute(&outcome.transaction_id).await;
    assert!(matches!(
        exec,
        Err(ExecutionError::Store(StoreError::InvalidStateTransition { .. }))
    ));
}

#[tokio::test]
async fn broker_submit_failure_marks_transaction_failed() {
    let h = harness().await;
    seed_user(&h.store, "u1").await;
    seed_portfolio(&h.store, "u1", dec!(50000), dec!(20000)).await;
    h.broker.set_reject_orders(true).await;

    let pending = h.execution.create_pending_trade("u1", &buy("MSFT", dec!(5))).await.unwrap();
    let outcome = h.execution.execute(&pending.transaction_id).await.unwrap();

    assert_eq!(outcome.status, TransactionStatus::Failed);
    let stored = h.store.get_transaction(&pending.transaction_id).await.unwrap().unwrap();
    assert_eq!(stored.status, TransactionStatus::Failed);
    assert!(stored.notes.contains("Broker submission failed"));
}

#[tokio::test]
async fn broker_cancel_outcome_becomes_cancelled() {
    let h = harness().await;
    seed_user(&h.store, "u1").await;
    seed_portfolio(&h.store, "u1", dec!(50000), dec!(20000)).await;
    h.broker.set_default_outcome(BrokerOrderStatus::Canceled).await;

    let pending = h.execution.create_pending_trade("u1", &buy("MSFT", dec!(5))).await.unwrap();
    let outcome = h.execution.execute(&pending.transaction_id).await.unwrap();
    assert_eq!(outcome.status, TransactionStatus::Cancelled);
}

#[tokio::test]
async fn terminal_rows_accept_only_notes_updates() {
    let h = harness().await;
    seed_user(&h.store, "u1").await;
    seed_portfolio(&h.store, "u1", dec!(50000), dec!(20000)).await;

    let pending = h.execution.create_pending_trade("u1", &buy("MSFT", dec!(5))).await.unwrap();
    h.execution.execute(&pending.transaction_id).await.unwrap();

    // notes-only update is allowed on a terminal row
    h.store
        .update_transaction(
            &pending.transaction_id,
            &TransactionPatch {
                notes: Some("post-trade annotation".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    // anything else is refused
    let refused = h
        .store
        .update_transaction(
            &pending.transaction_id,
            &TransactionPatch {
                price: Some(dec!(1)),
                ..Default::default()
            },
        )
        .await;
    assert!(matches!(refused, Err(StoreError::InvalidStateTransition { .. })));

    let stored = h.store.get_transaction(&pending.transaction_id).await.unwrap().unwrap();
    assert_eq!(stored.notes, "post-trade annotation");
    assert_eq!(stored.status, TransactionStatus::Executed);
}

#[tokio::test]
async fn cancel_pending_is_only_legal_once() {
    let h = harness().await;
    seed_user(&h.store, "u1").await;
    seed_portfolio(&h.store, "u1", dec!(50000), dec!(20000)).await;

    let pending = h.execution.create_pending_trade("u1", &buy("MSFT", dec!(5))).await.unwrap();
    h.execution.cancel_pending(&pending.transaction_id, "changed my mind").await.unwrap();

    let stored = h.store.get_transaction(&pending.transaction_id).await.unwrap().unwrap();
    assert_eq!(stored.status, TransactionStatus::Cancelled);

    let again = h.execution.cancel_pending(&pending.transaction_id, "again").await;
    assert!(matches!(
        again,
        Err(ExecutionError::Store(StoreError::InvalidStateTransition { .. }))
    ));
}

#[tokio::test]
async fn approve_workflow_picks_most_recent_pending() {
    let h = harness().await;
    seed_user(&h.store, "u1").await;
    seed_portfolio(&h.store, "u1", dec!(50000), dec!(20000)).await;

    let first = h.execution.create_pending_trade("u1", &buy("MSFT", dec!(1))).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let second = h.execution.create_pending_trade("u1", &buy("AAPL", dec!(2))).await.unwrap();

    let approval = h.execution.approve_workflow("u1", None, "approve").await.unwrap();
    assert_eq!(approval.transaction.transaction_id, second.transaction_id);
    assert_eq!(approval.outcome.status, TransactionStatus::Executed);

    // The older trade is untouched and still approvable later.
    let older = h.store.get_transaction(&first.transaction_id).await.unwrap().unwrap();
    assert_eq!(older.status, TransactionStatus::Pending);
}

#[tokio::test]
async fn approve_workflow_without_pending_is_a_domain_error() {
    let h = harness().await;
    seed_user(&h.store, "u1").await;
    seed_portfolio(&h.store, "u1", dec!(50000), dec!(20000)).await;

    let result = h.execution.approve_workflow("u1", None, "approve").await;
    assert!(matches!(result, Err(ExecutionError::NoPendingTrade { .. })));
}

#[tokio::test]
async fn upsert_position_is_idempotent() {
    let h = harness().await;
    seed_user(&h.store, "u1").await;
    let portfolio_id = seed_portfolio(&h.store, "u1", dec!(50000), dec!(20000)).await;

    seed_position(&h.store, &portfolio_id, "VTI", dec!(12), dec!(300), dec!(327.55), dec!(0.08), "Index").await;
    seed_position(&h.store, &portfolio_id, "VTI", dec!(12), dec!(300), dec!(327.55), dec!(0.08), "Index").await;

    let positions = h.store.get_portfolio_assets(&portfolio_id).await.unwrap();
    let vti: Vec<_> = positions.iter().filter(|p| p.symbol == "VTI").collect();
    assert_eq!(vti.len(), 1);
    assert_eq!(vti[0].quantity, dec!(12));
    assert_eq!(vti[0].average_cost, dec!(300));
}
