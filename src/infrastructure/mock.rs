//! Deterministic mock services for keyless runs and tests.
//!
//! Mock mode is explicit: the adapters here never mix synthetic data with
//! real broker or LLM behavior.

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use crate::domain::errors::{BrokerError, LlmError};
use crate::domain::ports::{BrokerHealth, BrokerService, LlmService, TokenStream};
use crate::domain::trading::portfolio::AccountSnapshot;
use crate::domain::trading::types::{
    BrokerOrderStatus, OrderStatusReport, OrderTicket, PlacedOrder,
};
use crate::infrastructure::alpaca::common::{mock_price, resolve_symbol_static};

/// Broker adapter returning deterministic synthetic responses. Orders fill
/// immediately at the table price unless a different outcome is staged.
pub struct MockBrokerService {
    prices: RwLock<HashMap<String, Decimal>>,
    orders: RwLock<HashMap<String, OrderStatusReport>>,
    default_outcome: RwLock<BrokerOrderStatus>,
    account: RwLock<AccountSnapshot>,
    reject_orders: RwLock<bool>,
}

impl MockBrokerService {
    pub fn new() -> Self {
        Self {
            prices: RwLock::new(HashMap::new()),
            orders: RwLock::new(HashMap::new()),
            default_outcome: RwLock::new(BrokerOrderStatus::Filled),
            account: RwLock::new(AccountSnapshot {
                portfolio_value: Decimal::from(100_000),
                cash: Decimal::from(100_000),
                buying_power: Decimal::from(200_000),
                positions: Vec::new(),
            }),
            reject_orders: RwLock::new(false),
        }
    }

    pub async fn set_price(&self, symbol: &str, price: Decimal) {
        self.prices
            .write()
            .await
            .insert(symbol.to_ascii_uppercase(), price);
    }

    /// Outcome applied to subsequently placed orders.
    pub async fn set_default_outcome(&self, status: BrokerOrderStatus) {
        *self.default_outcome.write().await = status;
    }

    /// Make `place_order` fail, exercising the `failed` transition.
    pub async fn set_reject_orders(&self, reject: bool) {
        *self.reject_orders.write().await = reject;
    }

    pub async fn set_account(&self, snapshot: AccountSnapshot) {
        *self.account.write().await = snapshot;
    }

    /// Stage a status report for an externally created broker reference,
    /// as the synchronizer sees after a restart.
    pub async fn stage_order(&self, order_id: &str, report: OrderStatusReport) {
        self.orders.write().await.insert(order_id.to_string(), report);
    }

    async fn price_of(&self, symbol: &str) -> Decimal {
        let upper = symbol.to_ascii_uppercase();
        if let Some(price) = self.prices.read().await.get(&upper) {
            return *price;
        }
        mock_price(&upper)
    }
}

impl Default for MockBrokerService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrokerService for MockBrokerService {
    async fn account_snapshot(&self) -> Result<AccountSnapshot, BrokerError> {
        Ok(self.account.read().await.clone())
    }

    async fn get_price(&self, symbol: &str) -> Result<Decimal, BrokerError> {
        Ok(self.price_of(symbol).await)
    }

    async fn place_order(&self, ticket: &OrderTicket) -> Result<PlacedOrder, BrokerError> {
        ticket.validate()?;
        if *self.reject_orders.read().await {
            return Err(BrokerError::Request {
                reason: "mock broker is configured to reject submissions".to_string(),
            });
        }

        let order_id = Uuid::new_v4().to_string();
        let outcome = *self.default_outcome.read().await;
        let price = ticket
            .limit_price
            .unwrap_or(self.price_of(&ticket.symbol).await);
        let report = OrderStatusReport {
            order_id: order_id.clone(),
            status: outcome,
            filled_qty: if outcome == BrokerOrderStatus::Filled {
                ticket.quantity
            } else {
                Decimal::ZERO
            },
            filled_avg_price: (outcome == BrokerOrderStatus::Filled).then_some(price),
            submitted_at: Some(Utc::now()),
            filled_at: (outcome == BrokerOrderStatus::Filled).then(Utc::now),
        };
        self.orders.write().await.insert(order_id.clone(), report);

        Ok(PlacedOrder {
            order_id,
            submitted_at: Utc::now(),
            status: BrokerOrderStatus::Accepted,
        })
    }

    async fn order_status(&self, order_id: &str) -> Result<OrderStatusReport, BrokerError> {
        self.orders
            .read()
            .await
            .get(order_id)
            .cloned()
            .ok_or_else(|| BrokerError::OrderNotFound {
                order_id: order_id.to_string(),
            })
    }

    async fn resolve_symbol(&self, input: &str) -> Option<String> {
        if let Some(symbol) = resolve_symbol_static(input) {
            return Some(symbol);
        }
        let upper = input.trim().to_ascii_uppercase();
        let ticker_like =
            (1..=5).contains(&upper.len()) && upper.chars().all(|c| c.is_ascii_alphabetic());
        ticker_like.then_some(upper)
    }

    async fn health(&self) -> BrokerHealth {
        BrokerHealth {
            connected: true,
            mode: "mock",
            detail: "synthetic data".to_string(),
        }
    }

    fn is_mock(&self) -> bool {
        true
    }
}

/// Rule-based stand-in for the LLM provider. Classification and trade
/// extraction follow simple keyword rules so the full pipeline runs
/// deterministically without an API key.
#[derive(Default)]
pub struct MockLlmService {
    canned_responses: Arc<RwLock<Vec<String>>>,
}

impl MockLlmService {
    /// Queue exact responses returned (FIFO) before rule-based answers.
    pub async fn push_response(&self, response: impl Into<String>) {
        self.canned_responses.write().await.push(response.into());
    }
}

fn extract_user_message(prompt: &str) -> &str {
    // Both the router and extraction prompts quote the request on a
    // USER MESSAGE / USER REQUEST line.
    for marker in ["USER MESSAGE: \"", "USER REQUEST: \""] {
        if let Some(start) = prompt.find(marker) {
            let rest = &prompt[start + marker.len()..];
            if let Some(end) = rest.find('"') {
                return &rest[..end];
            }
        }
    }
    prompt
}

fn classify(request: &str) -> &'static str {
    let lower = request.to_lowercase();
    let has_imperative = lower.starts_with("buy")
        || lower.starts_with("sell")
        || lower.contains("let's buy")
        || lower.contains("let's sell")
        || lower.contains("please buy")
        || lower.contains("please sell")
        || lower.contains("execute");
    if has_imperative && !lower.contains("should") {
        "trade_execution"
    } else if lower.contains("compliance") || lower.contains("is this allowed") {
        "compliance_review"
    } else {
        "portfolio_analysis"
    }
}

fn extract_trade(request: &str) -> String {
    let lower = request.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !c.is_ascii_alphanumeric() && c != '.')
        .filter(|w| !w.is_empty())
        .collect();

    let action_idx = words.iter().position(|w| *w == "buy" || *w == "sell");
    let Some(action_idx) = action_idx else {
        return "null".to_string();
    };
    let action = words[action_idx];

    let mut quantity: Option<String> = None;
    let mut symbol: Option<String> = None;
    for word in &words[action_idx + 1..] {
        if quantity.is_none() && word.parse::<f64>().is_ok() {
            quantity = Some((*word).to_string());
            continue;
        }
        if quantity.is_none() && matches!(*word, "all" | "entire" | "everything") {
            quantity = Some("\"all\"".to_string());
            continue;
        }
        if matches!(*word, "shares" | "share" | "of" | "stock" | "at" | "market") {
            continue;
        }
        if word.chars().all(|c| c.is_ascii_alphabetic()) && word.len() <= 5 {
            symbol = Some(word.to_ascii_uppercase());
            break;
        }
    }

    match (quantity, symbol) {
        (Some(quantity), Some(symbol)) => format!(
            r#"{{"symbol": "{symbol}", "action": "{action}", "quantity": {quantity}, "order_type": "market", "rationale": "Client-requested trade"}}"#
        ),
        _ => "null".to_string(),
    }
}

#[async_trait]
impl LlmService for MockLlmService {
    async fn complete(&self, system: &str, user: &str) -> Result<String, LlmError> {
        {
            let mut canned = self.canned_responses.write().await;
            if !canned.is_empty() {
                return Ok(canned.remove(0));
            }
        }

        if system.contains("routing layer") {
            let message = extract_user_message(user);
            return Ok(format!(
                r#"{{"agent": "{}", "task": "mock_routing"}}"#,
                classify(message)
            ));
        }
        if system.contains("extract structured trade orders") {
            return Ok(extract_trade(extract_user_message(user)));
        }
        Ok("Based on your portfolio, diversification and cash allocation look reasonable. \
            This is synthetic advisory output."
            .to_string())
    }

    async fn stream(&self, system: &str, user: &str) -> Result<TokenStream, LlmError> {
        let response = self.complete(system, user).await?;
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            for word in response.split_inclusive(' ') {
                if tx.send(Ok(word.to_string())).await.is_err() {
                    return;
                }
            }
        });
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_mock_broker_immediate_fill() {
        let broker = MockBrokerService::new();
        let ticket = OrderTicket::market("MSFT", crate::domain::trading::types::TradeSide::Buy, dec!(10));
        let placed = broker.place_order(&ticket).await.unwrap();
        let report = broker.order_status(&placed.order_id).await.unwrap();
        assert_eq!(report.status, BrokerOrderStatus::Filled);
        assert_eq!(report.filled_qty, dec!(10));
        assert_eq!(report.filled_avg_price, Some(dec!(417.10)));
    }

    #[tokio::test]
    async fn test_mock_broker_price_override() {
        let broker = MockBrokerService::new();
        broker.set_price("MSFT", dec!(400)).await;
        assert_eq!(broker.get_price("msft").await.unwrap(), dec!(400));
        assert_eq!(broker.get_price("AAPL").await.unwrap(), dec!(193.50));
    }

    #[test]
    fn test_classify_rules() {
        assert_eq!(classify("buy 10 NVDA"), "trade_execution");
        assert_eq!(classify("Should I buy NVDA?"), "portfolio_analysis");
        assert_eq!(classify("sell all SPY"), "trade_execution");
        assert_eq!(classify("is this allowed by compliance?"), "compliance_review");
        assert_eq!(classify("how risky is my portfolio"), "portfolio_analysis");
    }

    #[test]
    fn test_extract_trade_rules() {
        assert!(extract_trade("buy 10 MSFT").contains("\"MSFT\""));
        assert!(extract_trade("buy 10 MSFT").contains("\"quantity\": 10"));
        assert!(extract_trade("sell all SPY").contains("\"quantity\": \"all\""));
        assert!(extract_trade("sell 100 shares of OKTA").contains("\"OKTA\""));
        assert_eq!(extract_trade("what should I do"), "null");
    }

    #[tokio::test]
    async fn test_canned_responses_take_priority() {
        let llm = MockLlmService::default();
        llm.push_response("CANNED").await;
        assert_eq!(llm.complete("x", "y").await.unwrap(), "CANNED");
        assert_ne!(llm.complete("x", "y").await.unwrap(), "CANNED");
    }
}
