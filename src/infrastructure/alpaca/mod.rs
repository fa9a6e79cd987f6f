//! Alpaca-style REST broker adapter.
//!
//! Live mode authenticates with key/secret headers against the trading and
//! market-data APIs. Mock mode lives in [`crate::infrastructure::mock`];
//! this adapter is only constructed when credentials exist.

pub mod common;
mod execution;
mod market_data;

use async_trait::async_trait;
use reqwest_middleware::ClientWithMiddleware;
use rust_decimal::Decimal;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::config::BrokerEnvConfig;
use crate::domain::errors::BrokerError;
use crate::domain::ports::{BrokerHealth, BrokerService};
use crate::domain::trading::portfolio::AccountSnapshot;
use crate::domain::trading::types::{OrderStatusReport, OrderTicket, PlacedOrder};
use crate::infrastructure::core::http_client_factory::HttpClientFactory;

pub struct AlpacaBrokerService {
    client: ClientWithMiddleware,
    api_key: String,
    api_secret: String,
    pub(crate) base_url: String,
    pub(crate) data_url: String,
    paper: bool,
}

impl AlpacaBrokerService {
    pub fn new(config: &BrokerEnvConfig) -> Self {
        Self {
            client: HttpClientFactory::create_client(),
            api_key: config.api_key.clone(),
            api_secret: config.secret_key.clone(),
            base_url: config.base_url.clone(),
            data_url: config.data_url.clone(),
            paper: config.paper_trading,
        }
    }

    pub(crate) async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, BrokerError> {
        let response = self
            .client
            .get(url)
            .header("APCA-API-KEY-ID", &self.api_key)
            .header("APCA-API-SECRET-KEY", &self.api_secret)
            .send()
            .await
            .map_err(|e| BrokerError::Request {
                reason: e.to_string(),
            })?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(BrokerError::Request {
                reason: format!("{} {}: {}", status.as_u16(), url, truncate(&body, 300)),
            });
        }
        serde_json::from_str(&body).map_err(|e| BrokerError::Request {
            reason: format!("decode {url}: {e}"),
        })
    }

    pub(crate) async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<T, BrokerError> {
        let payload = serde_json::to_string(body).map_err(|e| BrokerError::Request {
            reason: format!("encode request: {e}"),
        })?;
        let response = self
            .client
            .post(url)
            .header("APCA-API-KEY-ID", &self.api_key)
            .header("APCA-API-SECRET-KEY", &self.api_secret)
            .header("Content-Type", "application/json")
            .body(payload)
            .send()
            .await
            .map_err(|e| BrokerError::Request {
                reason: e.to_string(),
            })?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(BrokerError::Request {
                reason: format!("{} {}: {}", status.as_u16(), url, truncate(&text, 300)),
            });
        }
        serde_json::from_str(&text).map_err(|e| BrokerError::Request {
            reason: format!("decode {url}: {e}"),
        })
    }
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[async_trait]
impl BrokerService for AlpacaBrokerService {
    async fn account_snapshot(&self) -> Result<AccountSnapshot, BrokerError> {
        self.fetch_account_snapshot().await
    }

    async fn get_price(&self, symbol: &str) -> Result<Decimal, BrokerError> {
        self.fetch_price(symbol).await
    }

    async fn place_order(&self, ticket: &OrderTicket) -> Result<PlacedOrder, BrokerError> {
        self.submit_order(ticket).await
    }

    async fn order_status(&self, order_id: &str) -> Result<OrderStatusReport, BrokerError> {
        self.fetch_order_status(order_id).await
    }

    async fn resolve_symbol(&self, input: &str) -> Option<String> {
        if let Some(symbol) = common::resolve_symbol_static(input) {
            return Some(symbol);
        }
        // Unknown locally: accept plausible tickers the broker recognizes.
        let upper = input.trim().to_ascii_uppercase();
        let ticker_like = (1..=5).contains(&upper.len())
            && upper.chars().all(|c| c.is_ascii_alphabetic());
        if ticker_like && self.asset_exists(&upper).await {
            return Some(upper);
        }
        None
    }

    async fn health(&self) -> BrokerHealth {
        match self.fetch_account_snapshot().await {
            Ok(_) => BrokerHealth {
                connected: true,
                mode: if self.paper { "paper" } else { "live" },
                detail: "account reachable".to_string(),
            },
            Err(e) => BrokerHealth {
                connected: false,
                mode: "error",
                detail: e.to_string(),
            },
        }
    }

    fn is_mock(&self) -> bool {
        false
    }
}
