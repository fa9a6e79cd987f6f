//! Market-data requests against the broker's data API.

use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use tracing::warn;

use super::AlpacaBrokerService;
use super::common::mock_price;
use crate::domain::errors::BrokerError;

#[derive(Debug, Deserialize)]
struct LatestQuoteResponse {
    quote: Option<QuotePayload>,
}

#[derive(Debug, Deserialize)]
struct QuotePayload {
    #[serde(rename = "ap")]
    ask_price: Option<f64>,
    #[serde(rename = "bp")]
    bid_price: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct LatestBarResponse {
    bar: Option<BarPayload>,
}

#[derive(Debug, Deserialize)]
struct BarPayload {
    #[serde(rename = "c")]
    close: f64,
}

impl AlpacaBrokerService {
    /// Latest quote; falls back to the latest bar close, then to the
    /// configured default. Only transport-level failures surface as errors.
    pub(super) async fn fetch_price(&self, symbol: &str) -> Result<Decimal, BrokerError> {
        let quote_url = format!("{}/v2/stocks/{}/quotes/latest", self.data_url, symbol);
        match self.get_json::<LatestQuoteResponse>(&quote_url).await {
            Ok(response) => {
                let price = response
                    .quote
                    .as_ref()
                    .and_then(|q| q.ask_price.filter(|p| *p > 0.0).or(q.bid_price));
                if let Some(price) = price
                    && let Some(decimal) = Decimal::from_f64_retain(price)
                {
                    return Ok(decimal);
                }
            }
            Err(e) => warn!(symbol, "Latest quote unavailable: {e}"),
        }

        let bar_url = format!("{}/v2/stocks/{}/bars/latest", self.data_url, symbol);
        match self.get_json::<LatestBarResponse>(&bar_url).await {
            Ok(response) => {
                if let Some(bar) = response.bar
                    && let Some(decimal) = Decimal::from_f64_retain(bar.close)
                {
                    return Ok(decimal);
                }
            }
            Err(e) => warn!(symbol, "Latest bar unavailable: {e}"),
        }

        warn!(symbol, "No market data available; using fallback price");
        Ok(mock_price(symbol))
    }

    pub(super) async fn asset_exists(&self, symbol: &str) -> bool {
        #[derive(Deserialize)]
        struct Asset {
            tradable: bool,
        }
        let url = format!("{}/v2/assets/{}", self.base_url, symbol);
        matches!(
            self.get_json::<Asset>(&url).await,
            Ok(Asset { tradable: true })
        )
    }
}

pub(super) fn parse_decimal(raw: &str) -> Decimal {
    Decimal::from_str(raw).unwrap_or_default()
}
