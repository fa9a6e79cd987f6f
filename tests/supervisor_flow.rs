//! End-to-end supervisor turns over the mock LLM and broker: routing, the
//! concentration pre-guard, pending trades, and the approval fast-path.

mod common;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sqlx::Row;

use common::{collect_chunks, harness, seed_portfolio, seed_position, seed_user};
use fiducia::application::supervisor::TurnRequest;

fn turn(request: &str, user_id: &str, session_id: Option<String>) -> TurnRequest {
    TurnRequest {
        request: request.to_string(),
        user_id: Some(user_id.to_string()),
        session_id,
    }
}

#[tokio::test]
async fn concentration_pre_guard_blocks_without_touching_compliance() {
    let h = harness().await;
    seed_user(&h.store, "u1").await;
    let portfolio_id = seed_portfolio(&h.store, "u1", dec!(100000), dec!(10000)).await;
    seed_position(
        &h.store, &portfolio_id, "AAPL", dec!(100), dec!(400), dec!(450), dec!(0.45), "Technology",
    )
    .await;
    h.broker.set_price("AAPL", dec!(100)).await;

    // 45,000 existing + 100 x $100 = 55% of the portfolio.
    let rx = h.supervisor.process(turn("buy 100 AAPL", "u1", None));
    let (content, finals, errors) = collect_chunks(rx).await;

    assert!(errors.is_empty(), "{errors:?}");
    assert!(content.contains("EXTREME CONCENTRATION"), "{content}");
    assert_eq!(finals.len(), 1);
    assert_eq!(finals[0]["trade_blocked"], "concentration_pre_guard");

    // No transaction row was written and the compliance reviewer never ran.
    assert!(h.store.get_pending_transactions("u1").await.unwrap().is_empty());
    let row = sqlx::query("SELECT COUNT(*) AS n FROM compliance_checks")
        .fetch_one(&h.pool)
        .await
        .unwrap();
    assert_eq!(row.get::<i64, _>("n"), 0);
}

#[tokio::test]
async fn sell_entire_position_trips_the_pre_guard() {
    let h = harness().await;
    seed_user(&h.store, "u1").await;
    let portfolio_id = seed_portfolio(&h.store, "u1", dec!(60000), dec!(15000)).await;
    seed_position(
        &h.store, &portfolio_id, "SPY", dec!(30), dec!(450), dec!(500), dec!(0.25), "Index",
    )
    .await;

    let rx = h.supervisor.process(turn("sell all SPY", "u1", None));
    let (content, finals, _) = collect_chunks(rx).await;

    assert!(content.contains("EXTREME CONCENTRATION"), "{content}");
    assert_eq!(finals[0]["trade_blocked"], "concentration_pre_guard");
    assert!(h.store.get_pending_transactions("u1").await.unwrap().is_empty());

    // The position is untouched.
    let positions = h.store.get_portfolio_assets(&portfolio_id).await.unwrap();
    assert_eq!(positions.iter().find(|p| p.symbol == "SPY").unwrap().quantity, dec!(30));
}

#[tokio::test]
async fn buy_turn_creates_pending_trade_then_approve_executes_it() {
    let h = harness().await;
    seed_user(&h.store, "u1").await;
    let portfolio_id = seed_portfolio(&h.store, "u1", dec!(50000), dec!(20000)).await;
    h.broker.set_price("MSFT", dec!(400)).await;

    // Turn 1: the execution request leaves a pending transaction.
    let rx = h.supervisor.process(turn("buy 10 MSFT", "u1", None));
    let (content, finals, errors) = collect_chunks(rx).await;
    assert!(errors.is_empty(), "{errors:?}");
    assert!(content.contains("Compliance Review"), "{content}");
    assert_eq!(finals.len(), 1);
    assert_eq!(finals[0]["requires_user_approval"], true);
    assert_eq!(finals[0]["compliance_approved"], true);
    let session_id = finals[0]["session_id"].as_str().unwrap().to_string();

    let pending = h.store.get_pending_transactions("u1").await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].symbol, "MSFT");

    // Turn 2: "approve" executes the most recent pending trade.
    h.broker.set_price("MSFT", dec!(401)).await;
    let rx = h
        .supervisor
        .process(turn("approve", "u1", Some(session_id.clone())));
    let (content, finals, errors) = collect_chunks(rx).await;
    assert!(errors.is_empty(), "{errors:?}");
    assert!(content.contains("Trade Executed Successfully"), "{content}");
    assert_eq!(finals[0]["execution"]["status"], "executed");

    let positions = h.store.get_portfolio_assets(&portfolio_id).await.unwrap();
    let msft = positions.iter().find(|p| p.symbol == "MSFT").unwrap();
    assert_eq!(msft.quantity, dec!(10));
    assert_eq!(msft.average_cost, dec!(401));

    let portfolio = h.store.get_portfolio(&portfolio_id).await.unwrap().unwrap();
    let positions_value: Decimal = positions.iter().map(|p| p.market_value).sum();
    assert!(portfolio.is_reconciled(positions_value));

    // Session bookkeeping: the message totals match the stored rows.
    let session = h.sessions.get_session(&session_id).await.unwrap().unwrap();
    let history = h.sessions.get_history(&session_id, 100).await.unwrap();
    assert_eq!(session.total_messages as usize, history.len());
    assert!(history.len() >= 4, "user + advisor messages for two turns");
}

#[tokio::test]
async fn approve_without_pending_routes_normally() {
    let h = harness().await;
    seed_user(&h.store, "u1").await;
    seed_portfolio(&h.store, "u1", dec!(50000), dec!(20000)).await;

    let rx = h.supervisor.process(turn("approve", "u1", None));
    let (_, finals, errors) = collect_chunks(rx).await;
    assert!(errors.is_empty(), "{errors:?}");
    // Falls through to portfolio analysis; no execution payload.
    assert_eq!(finals.len(), 1);
    assert!(finals[0].get("execution").is_none());
}

#[tokio::test]
async fn advisory_question_routes_to_analysis_with_no_side_effects() {
    let h = harness().await;
    seed_user(&h.store, "u1").await;
    let portfolio_id = seed_portfolio(&h.store, "u1", dec!(80000), dec!(20000)).await;
    seed_position(
        &h.store, &portfolio_id, "AAPL", dec!(100), dec!(400), dec!(450), dec!(0.5625), "Technology",
    )
    .await;
    seed_position(
        &h.store, &portfolio_id, "JNJ", dec!(50), dec!(150), dec!(180), dec!(0.1125), "Healthcare",
    )
    .await;

    let rx = h.supervisor.process(turn("Should I buy NVDA?", "u1", None));
    let (content, finals, errors) = collect_chunks(rx).await;

    assert!(errors.is_empty(), "{errors:?}");
    assert!(!content.is_empty());
    let metrics = &finals[0]["analysis_results"]["portfolio_metrics"];
    assert_eq!(metrics["diversification_score"], 4.0);
    assert_eq!(metrics["tech_allocation"], 56.3);

    // Advisory turns must never create transactions.
    assert!(h.store.get_pending_transactions("u1").await.unwrap().is_empty());
    let row = sqlx::query("SELECT COUNT(*) AS n FROM transactions")
        .fetch_one(&h.pool)
        .await
        .unwrap();
    assert_eq!(row.get::<i64, _>("n"), 0);
}

#[tokio::test]
async fn selling_more_than_held_is_reported_conversationally() {
    let h = harness().await;
    seed_user(&h.store, "u1").await;
    let portfolio_id = seed_portfolio(&h.store, "u1", dec!(60000), dec!(15000)).await;
    seed_position(
        &h.store, &portfolio_id, "SPY", dec!(30), dec!(450), dec!(500), dec!(0.25), "Index",
    )
    .await;

    let rx = h.supervisor.process(turn("sell 40 shares of SPY", "u1", None));
    let (content, finals, errors) = collect_chunks(rx).await;

    assert!(errors.is_empty(), "{errors:?}");
    assert!(content.contains("hold only 30"), "{content}");
    assert_eq!(finals.len(), 1);
    assert!(h.store.get_pending_transactions("u1").await.unwrap().is_empty());
}

#[tokio::test]
async fn user_message_is_logged_before_the_response() {
    let h = harness().await;
    seed_user(&h.store, "u1").await;
    seed_portfolio(&h.store, "u1", dec!(50000), dec!(20000)).await;

    let rx = h.supervisor.process(turn("how diversified am I?", "u1", None));
    let (_, finals, _) = collect_chunks(rx).await;
    let session_id = finals[0]["session_id"].as_str().unwrap();

    let history = h.sessions.get_history(session_id, 10).await.unwrap();
    assert!(history.len() >= 2);
    assert_eq!(history[0].agent_type.as_str(), "user");
    assert_eq!(history[0].content, "how diversified am I?");
    assert_eq!(history.last().unwrap().agent_type.as_str(), "advisor");

    let sessions = h.sessions.get_user_sessions("u1", 10).await.unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].session_id, session_id);

    h.sessions.end_session(session_id).await.unwrap();
    let session = h.sessions.get_session(session_id).await.unwrap().unwrap();
    assert_eq!(session.status.as_str(), "completed");
    assert!(session.ended_at.is_some());
}
