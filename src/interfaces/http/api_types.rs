//! Request/response DTOs for the HTTP surface.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    #[serde(rename = "firstName")]
    pub first_name: String,
    #[serde(rename = "lastName")]
    pub last_name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct UserPayload {
    pub id: String,
    #[serde(rename = "firstName")]
    pub first_name: String,
    #[serde(rename = "lastName")]
    pub last_name: String,
    pub email: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub user: UserPayload,
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub query: String,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    pub symbol: String,
    pub action: String,
    pub quantity: Decimal,
    pub user_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ExecuteResponse {
    pub status: String,
    pub order_id: Option<String>,
    pub message: String,
    pub details: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub services: ServiceHealth,
}

#[derive(Debug, Serialize)]
pub struct ServiceHealth {
    pub database: String,
    pub broker: String,
    pub ai_agents: String,
}

#[derive(Debug, Serialize)]
pub struct HoldingPayload {
    pub symbol: String,
    pub quantity: Decimal,
    pub average_cost: Decimal,
    pub current_price: Decimal,
    pub market_value: Decimal,
    pub allocation_percent: Decimal,
    pub sector: Option<String>,
    pub unrealized_gain: Decimal,
}

#[derive(Debug, Serialize)]
pub struct PortfolioResponse {
    pub total_value: Decimal,
    pub cash_balance: Decimal,
    pub invested_value: Decimal,
    pub holdings: Vec<HoldingPayload>,
    pub tax_loss_harvesting: Vec<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}
