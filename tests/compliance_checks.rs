//! Compliance evaluator scenarios: concentration boundaries, wash sale,
//! penny stocks, pattern-day-trader, portfolio-wide checks, and policy
//! reload visibility.

mod common;

use chrono::{Duration, Utc};
use rust_decimal_macros::dec;
use sqlx::Row;

use common::{harness, seed_portfolio, seed_position, seed_user};
use fiducia::application::policy::default_document;
use fiducia::domain::compliance::rules::Severity;
use fiducia::domain::compliance::verdict::{
    AccountType, AssetAllocation, ClientProfile, ClientType, PortfolioCheckInput, TradeCheckInput,
};
use fiducia::domain::repositories::{NewTransaction, TransactionPatch};
use fiducia::domain::trading::portfolio::RiskTolerance;
use fiducia::domain::trading::types::{OrderType, TradeSide, TransactionStatus};

fn trade_input(symbol: &str, quantity: rust_decimal::Decimal, price: rust_decimal::Decimal) -> TradeCheckInput {
    TradeCheckInput {
        trade_type: TradeSide::Buy,
        symbol: symbol.to_string(),
        quantity,
        price: Some(price),
        portfolio_value: dec!(100000),
        client_type: ClientType::Individual,
        account_type: AccountType::Taxable,
        user_id: None,
        portfolio_id: None,
        transaction_id: None,
        recommendation_id: None,
    }
}

#[tokio::test]
async fn concentration_boundary_at_exactly_fifty_percent_warns_only() {
    let h = harness().await;
    seed_user(&h.store, "u1").await;
    let portfolio_id = seed_portfolio(&h.store, "u1", dec!(100000), dec!(10000)).await;
    seed_position(
        &h.store, &portfolio_id, "AAPL", dec!(100), dec!(400), dec!(450), dec!(0.45), "Technology",
    )
    .await;

    // existing 45,000 + trade 5,000 = exactly 50.00%
    let mut input = trade_input("AAPL", dec!(50), dec!(100));
    input.portfolio_id = Some(portfolio_id.clone());
    let verdict = h.evaluator.check_trade(&input).await.unwrap();
    assert!(verdict.approved, "50.00% must not block: {:?}", verdict.violations);
    assert!(
        verdict.warnings.iter().any(|w| w.contains("concentration")),
        "expected a concentration warning at 50%: {:?}",
        verdict.warnings
    );

    // one more cent of exposure crosses the line: 50.01%
    let mut input = trade_input("AAPL", dec!(50.1), dec!(100));
    input.portfolio_id = Some(portfolio_id);
    let verdict = h.evaluator.check_trade(&input).await.unwrap();
    assert!(!verdict.approved);
    let conc = verdict
        .violations
        .iter()
        .find(|v| v.rule_id == "CONC-001")
        .expect("CONC-001 violation");
    assert_eq!(conc.severity, Severity::Major);
}

#[tokio::test]
async fn penny_stock_boundary() {
    let h = harness().await;

    let verdict = h
        .evaluator
        .check_trade(&trade_input("XYZ", dec!(10), dec!(5.00)))
        .await
        .unwrap();
    assert!(
        !verdict.violations.iter().any(|v| v.rule_id == "PENNY-001"),
        "$5.00 is not a penny stock"
    );

    let verdict = h
        .evaluator
        .check_trade(&trade_input("XYZ", dec!(10), dec!(4.99)))
        .await
        .unwrap();
    let penny = verdict
        .violations
        .iter()
        .find(|v| v.rule_id == "PENNY-001")
        .expect("PENNY-001 advisory");
    assert_eq!(penny.severity, Severity::Advisory);
    assert!(verdict.approved, "advisory must not block");
    assert!(verdict.requires_disclosure);
}

#[tokio::test]
async fn wash_sale_blocks_repurchase_and_reports_disallowed_loss() {
    let h = harness().await;
    seed_user(&h.store, "u1").await;
    let portfolio_id = seed_portfolio(&h.store, "u1", dec!(200000), dec!(50000)).await;
    // Position row still carries the cost basis the shares were sold at.
    seed_position(
        &h.store, &portfolio_id, "NVDA", dec!(10), dec!(500), dec!(410), dec!(0.02), "Technology",
    )
    .await;

    // Executed SELL of 50 NVDA at $400, 10 days back.
    let tx_id = h
        .store
        .create_transaction(&NewTransaction {
            user_id: "u1".to_string(),
            portfolio_id: Some(portfolio_id.clone()),
            symbol: "NVDA".to_string(),
            side: TradeSide::Sell,
            quantity: dec!(50),
            price: Some(dec!(400)),
            total_amount: dec!(20000),
            status: TransactionStatus::Pending,
            order_type: OrderType::Market,
            broker_reference: None,
            notes: String::new(),
        })
        .await
        .unwrap();
    h.store
        .update_transaction(
            &tx_id,
            &TransactionPatch {
                status: Some(TransactionStatus::Executed),
                execution_date: Some(Utc::now() - Duration::days(10)),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let mut input = trade_input("NVDA", dec!(50), dec!(410));
    input.user_id = Some("u1".to_string());
    input.portfolio_id = Some(portfolio_id);
    input.portfolio_value = dec!(200000);
    let verdict = h.evaluator.check_trade(&input).await.unwrap();

    assert!(!verdict.approved);
    let wash = verdict
        .violations
        .iter()
        .find(|v| v.rule_id == "TAX-001")
        .expect("TAX-001 violation");
    assert_eq!(wash.severity, Severity::Major);
    // loss/share (500 - 400) x min(50, 50) = 5,000 disallowed
    assert_eq!(wash.metadata["total_disallowed_loss"], serde_json::json!("5000"));
    assert!(wash.recommended_action.contains("31 days"));
}

#[tokio::test]
async fn wash_sale_ignores_tax_advantaged_accounts() {
    let h = harness().await;
    seed_user(&h.store, "u1").await;
    let portfolio_id = seed_portfolio(&h.store, "u1", dec!(200000), dec!(50000)).await;

    let mut input = trade_input("NVDA", dec!(50), dec!(410));
    input.user_id = Some("u1".to_string());
    input.portfolio_id = Some(portfolio_id);
    input.account_type = AccountType::TaxAdvantaged;
    let verdict = h.evaluator.check_trade(&input).await.unwrap();
    assert!(!verdict.violations.iter().any(|v| v.rule_id == "TAX-001"));
}

#[tokio::test]
async fn pattern_day_trader_warning_under_equity_floor() {
    let h = harness().await;
    let mut input = trade_input("AAPL", dec!(5), dec!(100));
    input.portfolio_value = dec!(20000);
    let verdict = h.evaluator.check_trade(&input).await.unwrap();

    let pdt = verdict
        .violations
        .iter()
        .find(|v| v.rule_id == "TRAD-001")
        .expect("TRAD-001 violation");
    assert_eq!(pdt.severity, Severity::Warning);
    assert!(verdict.approved, "PDT warning must not block");
    assert!(verdict.warnings.iter().any(|w| w.contains("$25K")));
}

#[tokio::test]
async fn score_stays_within_bounds_and_matches_approval_rule() {
    let h = harness().await;

    let clean = h
        .evaluator
        .check_trade(&trade_input("AAPL", dec!(1), dec!(100)))
        .await
        .unwrap();
    assert!(clean.score <= 100);
    assert_eq!(
        clean.approved,
        !clean.violations.iter().any(|v| v.severity.blocks_trade())
    );

    // Pile on violations: penny stock + PDT + large trade in a tiny account.
    let mut input = trade_input("XYZ", dec!(5000), dec!(2));
    input.portfolio_value = dec!(11000);
    let messy = h.evaluator.check_trade(&input).await.unwrap();
    assert!(messy.score <= 100);
    assert!(!messy.warnings.is_empty());
    assert_eq!(
        messy.approved,
        !messy.violations.iter().any(|v| v.severity.blocks_trade())
    );
}

#[tokio::test]
async fn portfolio_check_flags_sector_concentration_and_suitability() {
    let h = harness().await;
    let input = PortfolioCheckInput {
        assets: vec![
            AssetAllocation {
                symbol: "AAPL".to_string(),
                sector: "Technology".to_string(),
                allocation: dec!(0.30),
            },
            AssetAllocation {
                symbol: "NVDA".to_string(),
                sector: "Technology".to_string(),
                allocation: dec!(0.15),
            },
            AssetAllocation {
                symbol: "JNJ".to_string(),
                sector: "Healthcare".to_string(),
                allocation: dec!(0.55),
            },
        ],
        portfolio_value: dec!(250000),
        client_profile: ClientProfile {
            client_id: Some("u1".to_string()),
            risk_tolerance: RiskTolerance::Conservative,
            target_risk: RiskTolerance::Aggressive,
            ..Default::default()
        },
    };
    let verdict = h.evaluator.check_portfolio(&input).await.unwrap();

    let sectors: Vec<&str> = verdict
        .violations
        .iter()
        .filter(|v| v.rule_id == "CONC-002")
        .filter_map(|v| v.metadata["sector"].as_str())
        .collect();
    assert_eq!(sectors, vec!["Healthcare"], "only the 55% sector breaches 40%");

    assert!(
        verdict
            .violations
            .iter()
            .any(|v| v.rule_id == "SUIT-001" && v.severity == Severity::Critical),
        "aggressive target vs conservative tolerance must violate SUIT-001"
    );
    assert!(!verdict.compliant);
}

#[tokio::test]
async fn policy_reload_changes_next_verdict_and_leaves_audit_diff() {
    let h = harness().await;
    seed_user(&h.store, "u1").await;
    let portfolio_id = seed_portfolio(&h.store, "u1", dec!(100000), dec!(80000)).await;

    // 20% position: silent under max_position=0.25.
    let mut input = trade_input("MSFT", dec!(50), dec!(400));
    input.portfolio_id = Some(portfolio_id.clone());
    let before = h.evaluator.check_trade(&input).await.unwrap();
    assert!(!before.warnings.iter().any(|w| w.contains("concentration")));

    // Tighten CONC-001 to 0.15 and bump the version.
    let mut doc = default_document();
    doc.version = "v2".to_string();
    if let Some(rule) = doc.rules.get_mut("CONC-001") {
        rule.params.insert(
            "max_position".to_string(),
            serde_json::json!(0.15),
        );
    }
    h.policy.update(doc).await;

    let after = h.evaluator.check_trade(&input).await.unwrap();
    assert!(
        after.warnings.iter().any(|w| w.contains("concentration")),
        "20% must warn once the limit is 15%: {:?}",
        after.warnings
    );

    // The policy change is recorded with a unified diff.
    let row = sqlx::query(
        "SELECT new_values FROM audit_trail WHERE entity_type = 'policy' ORDER BY created_at DESC LIMIT 1",
    )
    .fetch_one(&h.pool)
    .await
    .expect("policy_change audit row");
    let new_values: String = row.get("new_values");
    assert!(new_values.contains("v2"));
    assert!(new_values.contains("max_position"));
}

#[tokio::test]
async fn every_trade_check_lands_in_the_compliance_audit_table() {
    let h = harness().await;
    h.evaluator
        .check_trade(&trade_input("AAPL", dec!(10), dec!(100)))
        .await
        .unwrap();

    let row = sqlx::query("SELECT COUNT(*) AS n FROM compliance_checks")
        .fetch_one(&h.pool)
        .await
        .unwrap();
    let n: i64 = row.get("n");
    assert_eq!(n, 1);
}
