//! Broker configuration parsing from environment variables.

use std::env;

/// Broker API configuration (Alpaca-style REST trading + market data).
///
/// Missing credentials are not an error: the adapter drops to mock mode and
/// logs that fact loudly at startup.
#[derive(Debug, Clone, Default)]
pub struct BrokerEnvConfig {
    pub api_key: String,
    pub secret_key: String,
    pub paper_trading: bool,
    pub base_url: String,
    pub data_url: String,
}

impl BrokerEnvConfig {
    pub fn from_env() -> Self {
        Self {
            api_key: env::var("BROKER_API_KEY").unwrap_or_default(),
            secret_key: env::var("BROKER_SECRET").unwrap_or_default(),
            paper_trading: env::var("BROKER_PAPER")
                .map(|v| v != "0" && !v.eq_ignore_ascii_case("false"))
                .unwrap_or(true),
            base_url: env::var("BROKER_BASE_URL")
                .unwrap_or_else(|_| "https://paper-api.alpaca.markets".to_string()),
            data_url: env::var("BROKER_DATA_URL")
                .unwrap_or_else(|_| "https://data.alpaca.markets".to_string()),
        }
    }

    pub fn has_credentials(&self) -> bool {
        !self.api_key.is_empty() && !self.secret_key.is_empty()
    }
}
