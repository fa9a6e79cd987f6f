//! Order submission and account state against the broker's trading API.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::AlpacaBrokerService;
use super::market_data::parse_decimal;
use crate::domain::errors::BrokerError;
use crate::domain::trading::portfolio::{AccountSnapshot, BrokerPosition};
use crate::domain::trading::types::{
    BrokerOrderStatus, OrderStatusReport, OrderTicket, PlacedOrder,
};

#[derive(Debug, Serialize)]
struct OrderRequest {
    symbol: String,
    qty: String,
    side: String,
    #[serde(rename = "type")]
    order_type: String,
    time_in_force: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    limit_price: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_price: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    id: String,
    status: String,
    submitted_at: Option<String>,
    #[serde(default)]
    filled_qty: Option<String>,
    #[serde(default)]
    filled_avg_price: Option<String>,
    #[serde(default)]
    filled_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AccountResponse {
    cash: String,
    portfolio_value: String,
    buying_power: String,
}

#[derive(Debug, Deserialize)]
struct PositionResponse {
    symbol: String,
    qty: String,
    avg_entry_price: String,
    #[serde(default)]
    current_price: Option<String>,
    #[serde(default)]
    market_value: Option<String>,
}

fn parse_ts(raw: &Option<String>) -> Option<DateTime<Utc>> {
    raw.as_deref()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn order_status(raw: &str) -> BrokerOrderStatus {
    BrokerOrderStatus::from_str(raw).unwrap_or(BrokerOrderStatus::Accepted)
}

impl AlpacaBrokerService {
    pub(super) async fn submit_order(
        &self,
        ticket: &OrderTicket,
    ) -> Result<PlacedOrder, BrokerError> {
        ticket.validate()?;

        let request = OrderRequest {
            symbol: ticket.symbol.clone(),
            qty: ticket.quantity.to_string(),
            side: ticket.side.as_order_side().to_string(),
            order_type: ticket.order_type.as_str().to_string(),
            time_in_force: ticket.time_in_force.as_str().to_string(),
            limit_price: ticket.limit_price.map(|p| p.to_string()),
            stop_price: ticket.stop_price.map(|p| p.to_string()),
        };

        let url = format!("{}/v2/orders", self.base_url);
        let response: OrderResponse = self.post_json(&url, &request).await?;
        Ok(PlacedOrder {
            order_id: response.id,
            submitted_at: parse_ts(&response.submitted_at).unwrap_or_else(Utc::now),
            status: order_status(&response.status),
        })
    }

    pub(super) async fn fetch_order_status(
        &self,
        order_id: &str,
    ) -> Result<OrderStatusReport, BrokerError> {
        let url = format!("{}/v2/orders/{}", self.base_url, order_id);
        let response: OrderResponse = self.get_json(&url).await.map_err(|e| match e {
            BrokerError::Request { reason } if reason.contains("404") => {
                BrokerError::OrderNotFound {
                    order_id: order_id.to_string(),
                }
            }
            other => other,
        })?;

        Ok(OrderStatusReport {
            order_id: response.id,
            status: order_status(&response.status),
            filled_qty: response
                .filled_qty
                .as_deref()
                .map(parse_decimal)
                .unwrap_or(Decimal::ZERO),
            filled_avg_price: response
                .filled_avg_price
                .as_deref()
                .map(parse_decimal)
                .filter(|p| *p > Decimal::ZERO),
            submitted_at: parse_ts(&response.submitted_at),
            filled_at: parse_ts(&response.filled_at),
        })
    }

    pub(super) async fn fetch_account_snapshot(&self) -> Result<AccountSnapshot, BrokerError> {
        let account: AccountResponse = self
            .get_json(&format!("{}/v2/account", self.base_url))
            .await?;
        let positions: Vec<PositionResponse> = self
            .get_json(&format!("{}/v2/positions", self.base_url))
            .await?;

        let positions = positions
            .into_iter()
            .map(|p| {
                let quantity = parse_decimal(&p.qty);
                let current_price = p.current_price.as_deref().map(parse_decimal).unwrap_or_default();
                let market_value = p
                    .market_value
                    .as_deref()
                    .map(parse_decimal)
                    .unwrap_or(quantity * current_price);
                BrokerPosition {
                    symbol: p.symbol,
                    quantity,
                    avg_entry_price: parse_decimal(&p.avg_entry_price),
                    current_price,
                    market_value,
                }
            })
            .collect();

        Ok(AccountSnapshot {
            portfolio_value: parse_decimal(&account.portfolio_value),
            cash: parse_decimal(&account.cash),
            buying_power: parse_decimal(&account.buying_power),
            positions,
        })
    }
}
