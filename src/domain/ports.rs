use crate::domain::errors::{BrokerError, LlmError};
use crate::domain::trading::portfolio::AccountSnapshot;
use crate::domain::trading::types::{OrderStatusReport, OrderTicket, PlacedOrder};
use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::mpsc::Receiver;

/// Broker connectivity report used by the health endpoint.
#[derive(Debug, Clone)]
pub struct BrokerHealth {
    pub connected: bool,
    pub mode: &'static str,
    pub detail: String,
}

/// Abstraction over the external trading/market-data provider.
///
/// Implementations must support an explicit mock mode: when credentials are
/// absent every operation returns deterministic synthetic responses.
#[async_trait]
pub trait BrokerService: Send + Sync {
    async fn account_snapshot(&self) -> Result<AccountSnapshot, BrokerError>;

    /// Most recent quote for the symbol. Implementations fall back to the
    /// latest bar close and then to a configured default; an `Err` here
    /// means the provider is genuinely unreachable.
    async fn get_price(&self, symbol: &str) -> Result<Decimal, BrokerError>;

    async fn place_order(&self, ticket: &OrderTicket) -> Result<PlacedOrder, BrokerError>;

    async fn order_status(&self, order_id: &str) -> Result<OrderStatusReport, BrokerError>;

    /// Maps a human label ("Nutanix") or loose ticker to a canonical
    /// symbol. Returns None when ambiguous.
    async fn resolve_symbol(&self, input: &str) -> Option<String>;

    async fn health(&self) -> BrokerHealth;

    fn is_mock(&self) -> bool;
}

/// Token stream handed out by [`LlmService::stream`].
pub type TokenStream = Receiver<Result<String, LlmError>>;

/// Chat-completion provider behind the router and supervisor.
#[async_trait]
pub trait LlmService: Send + Sync {
    /// One-shot completion; used for routing and structured extraction.
    async fn complete(&self, system: &str, user: &str) -> Result<String, LlmError>;

    /// Streaming completion delivering tokens as they are generated. The
    /// channel closes when the stream ends; dropping the receiver aborts
    /// the upstream request.
    async fn stream(&self, system: &str, user: &str) -> Result<TokenStream, LlmError>;
}
