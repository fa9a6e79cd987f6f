//! HTTP surface: JSON endpoints plus the `/chat` SSE stream.
//!
//! Authenticated endpoints read an opaque bearer token interpreted as the
//! user id; production systems substitute a proper token.

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use chrono::{Duration, Utc};
use futures_util::StreamExt;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use uuid::Uuid;

use crate::application::bootstrap::App;
use crate::application::supervisor::{Chunk, TurnRequest};
use crate::domain::errors::ExecutionError;
use crate::domain::trading::portfolio::{Portfolio, User};
use crate::domain::trading::types::{TradeSide, TransactionStatus};
use crate::application::execution::TradeRecommendation;
use crate::domain::trading::types::OrderType;

use super::api_types::*;

type ApiError = (StatusCode, Json<ErrorBody>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
}

fn internal_error(err: impl std::fmt::Display) -> ApiError {
    tracing::error!("Request failed: {err}");
    api_error(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
}

pub fn build_router(app: Arc<App>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/login", post(login))
        .route("/signup", post(signup))
        .route("/chat", post(chat))
        .route("/portfolio", get(portfolio))
        .route("/execute", post(execute))
        .route("/profile", get(profile))
        .route("/analytics", get(analytics))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(app)
}

/// Bearer token is the opaque user id.
fn bearer_user(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::to_string)
        .filter(|token| !token.is_empty())
}

fn require_user(headers: &HeaderMap) -> Result<String, ApiError> {
    bearer_user(headers).ok_or_else(|| api_error(StatusCode::UNAUTHORIZED, "missing bearer token"))
}

fn password_hash(email: &str, password: &str) -> String {
    hex::encode(Sha256::digest(format!("{email}:{password}").as_bytes()))
}

// ---------------------------------------------------------------------------
// GET /health
// ---------------------------------------------------------------------------

async fn health(State(app): State<Arc<App>>) -> Json<HealthResponse> {
    let pool = app.store.pool_status().await;
    let broker = app.broker.health().await;
    Json(HealthResponse {
        status: "ok".to_string(),
        timestamp: Utc::now().to_rfc3339(),
        services: ServiceHealth {
            database: format!("connected ({}/{} idle)", pool.idle, pool.size),
            broker: format!(
                "{}{}",
                broker.mode,
                if broker.connected { "" } else { " (unreachable)" }
            ),
            ai_agents: "ready".to_string(),
        },
    })
}

// ---------------------------------------------------------------------------
// POST /login, POST /signup
// ---------------------------------------------------------------------------

fn auth_response(user: &User) -> AuthResponse {
    AuthResponse {
        user: UserPayload {
            id: user.user_id.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            email: user.email.clone(),
        },
        token: user.user_id.clone(),
    }
}

async fn login(
    State(app): State<Arc<App>>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let found = app
        .store
        .find_user_by_email(&request.email)
        .await
        .map_err(internal_error)?;
    match found {
        Some((user, hash)) if hash == password_hash(&request.email, &request.password) => {
            Ok(Json(auth_response(&user)))
        }
        _ => Err(api_error(StatusCode::UNAUTHORIZED, "invalid credentials")),
    }
}

async fn signup(
    State(app): State<Arc<App>>,
    Json(request): Json<SignupRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    if request.email.is_empty() || request.password.len() < 8 {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "email and a password of at least 8 characters are required",
        ));
    }
    if app
        .store
        .find_user_by_email(&request.email)
        .await
        .map_err(internal_error)?
        .is_some()
    {
        return Err(api_error(StatusCode::CONFLICT, "email already registered"));
    }

    let user = User {
        user_id: Uuid::new_v4().to_string(),
        email: request.email.clone(),
        first_name: request.first_name,
        last_name: request.last_name,
        risk_tolerance: Default::default(),
        objective: Default::default(),
        date_of_birth: None,
        annual_income: None,
        net_worth: None,
    };
    app.store
        .create_user(&user, &password_hash(&request.email, &request.password))
        .await
        .map_err(internal_error)?;

    let now = Utc::now();
    let portfolio = Portfolio {
        portfolio_id: Uuid::new_v4().to_string(),
        user_id: user.user_id.clone(),
        portfolio_name: "Primary".to_string(),
        portfolio_type: "taxable".to_string(),
        total_value: Decimal::ZERO,
        cash_balance: Decimal::ZERO,
        is_primary: true,
        created_at: now,
        updated_at: now,
    };
    app.store
        .create_portfolio(&portfolio)
        .await
        .map_err(internal_error)?;

    Ok(Json(auth_response(&user)))
}

// ---------------------------------------------------------------------------
// POST /chat  (SSE)
// ---------------------------------------------------------------------------

async fn chat(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
    Json(request): Json<ChatRequest>,
) -> Response {
    let user_id = request.user_id.or_else(|| bearer_user(&headers));
    let rx = app.supervisor.process(TurnRequest {
        request: request.query,
        user_id,
        session_id: request.session_id,
    });

    let events = ReceiverStream::new(rx).map(|chunk| {
        let name = match &chunk {
            Chunk::Content { .. } => "message",
            Chunk::Final { .. } => "final",
            Chunk::Error { .. } => "error",
        };
        let data = serde_json::to_string(&chunk).unwrap_or_else(|_| "{}".to_string());
        Ok::<Event, Infallible>(Event::default().event(name).data(data))
    });

    Sse::new(events).keep_alive(KeepAlive::new()).into_response()
}

// ---------------------------------------------------------------------------
// GET /portfolio
// ---------------------------------------------------------------------------

async fn portfolio(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
) -> Result<Json<PortfolioResponse>, ApiError> {
    let user_id = require_user(&headers)?;
    let portfolio = app
        .store
        .get_primary_portfolio(&user_id)
        .await
        .map_err(internal_error)?
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "no portfolio on file"))?;
    let positions = app
        .store
        .get_portfolio_assets(&portfolio.portfolio_id)
        .await
        .map_err(internal_error)?;

    let invested_value: Decimal = positions.iter().map(|p| p.market_value).sum();
    let holdings: Vec<HoldingPayload> = positions
        .iter()
        .map(|p| HoldingPayload {
            symbol: p.symbol.clone(),
            quantity: p.quantity,
            average_cost: p.average_cost,
            current_price: p.current_price,
            market_value: p.market_value,
            allocation_percent: p.allocation * Decimal::from(100),
            sector: p.sector.clone(),
            unrealized_gain: p.market_value - p.quantity * p.average_cost,
        })
        .collect();

    // Loss positions surfaced for the frontend; harvesting strategy itself
    // is out of scope here.
    let tax_loss_harvesting = positions
        .iter()
        .filter(|p| p.average_cost > p.current_price && p.quantity > Decimal::ZERO)
        .map(|p| {
            json!({
                "symbol": p.symbol,
                "unrealized_loss": (p.average_cost - p.current_price) * p.quantity,
            })
        })
        .collect();

    Ok(Json(PortfolioResponse {
        total_value: portfolio.total_value,
        cash_balance: portfolio.cash_balance,
        invested_value,
        holdings,
        tax_loss_harvesting,
    }))
}

// ---------------------------------------------------------------------------
// POST /execute
// ---------------------------------------------------------------------------

async fn execute(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
    Json(request): Json<ExecuteRequest>,
) -> Result<Json<ExecuteResponse>, ApiError> {
    let user_id = request
        .user_id
        .or_else(|| bearer_user(&headers))
        .ok_or_else(|| api_error(StatusCode::UNAUTHORIZED, "missing user identity"))?;
    let action: TradeSide = request
        .action
        .parse()
        .map_err(|e: String| api_error(StatusCode::BAD_REQUEST, e))?;

    let rec = TradeRecommendation {
        symbol: request.symbol,
        action,
        quantity: Some(request.quantity),
        order_type: OrderType::Market,
        price: None,
        rationale: "Direct execution request".to_string(),
    };

    let pending = match app.execution.create_pending_trade(&user_id, &rec).await {
        Ok(pending) => pending,
        Err(
            e @ (ExecutionError::NoPortfolio { .. }
            | ExecutionError::SymbolNotHeld { .. }
            | ExecutionError::InsufficientShares { .. }
            | ExecutionError::UnknownSymbol { .. }),
        ) => return Err(api_error(StatusCode::UNPROCESSABLE_ENTITY, e.to_string())),
        Err(e) => return Err(internal_error(e)),
    };

    if pending.status == TransactionStatus::Rejected {
        return Ok(Json(ExecuteResponse {
            status: "rejected".to_string(),
            order_id: None,
            message: format!(
                "Trade rejected by compliance: {}",
                pending.verdict.violation_summary()
            ),
            details: serde_json::to_value(&pending.verdict).unwrap_or_default(),
        }));
    }

    let outcome = app
        .execution
        .execute(&pending.transaction_id)
        .await
        .map_err(internal_error)?;
    Ok(Json(ExecuteResponse {
        status: outcome.status.as_str().to_string(),
        order_id: Some(outcome.transaction_id),
        message: outcome.notes,
        details: json!({
            "symbol": pending.symbol,
            "quantity": outcome.filled_qty,
            "fill_price": outcome.fill_price,
            "compliance_score": pending.verdict.score,
        }),
    }))
}

// ---------------------------------------------------------------------------
// GET /profile
// ---------------------------------------------------------------------------

async fn profile(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let user_id = require_user(&headers)?;
    let user = app
        .store
        .get_user(&user_id)
        .await
        .map_err(internal_error)?
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "user not found"))?;
    Ok(Json(json!({
        "id": user.user_id,
        "firstName": user.first_name,
        "lastName": user.last_name,
        "email": user.email,
        "riskTolerance": user.risk_tolerance.as_str(),
        "objective": user.objective.as_str(),
        "dateOfBirth": user.date_of_birth,
        "annualIncome": user.annual_income,
        "netWorth": user.net_worth,
    })))
}

// ---------------------------------------------------------------------------
// GET /analytics
// ---------------------------------------------------------------------------

async fn analytics(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let user_id = require_user(&headers)?;
    let portfolio = app
        .store
        .get_primary_portfolio(&user_id)
        .await
        .map_err(internal_error)?
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "no portfolio on file"))?;

    // Deterministic synthetic series anchored at the current value; real
    // performance history is a frontend/warehouse concern.
    let current = portfolio.total_value.to_f64().unwrap_or(0.0);
    let mut series = Vec::with_capacity(30);
    for day in 0..30 {
        let t = day as f64;
        let drift = 1.0 + (t - 29.0) * 0.001;
        let wiggle = 1.0 + 0.004 * (t * 1.7).sin();
        let date = (Utc::now() - Duration::days(29 - day)).date_naive();
        series.push(json!({
            "date": date,
            "value": (current * drift * wiggle * 100.0).round() / 100.0,
        }));
    }

    let recent = app
        .store
        .get_recent_transactions(Some(&user_id), None, 20)
        .await
        .map_err(internal_error)?;
    let recent: Vec<serde_json::Value> = recent
        .iter()
        .map(|tx| {
            json!({
                "transaction_id": tx.transaction_id,
                "symbol": tx.symbol,
                "side": tx.side.as_order_side(),
                "quantity": tx.quantity,
                "price": tx.price,
                "status": tx.status.as_str(),
                "created_at": tx.created_at,
            })
        })
        .collect();

    Ok(Json(json!({
        "portfolio_id": portfolio.portfolio_id,
        "current_value": portfolio.total_value,
        "series": series,
        "recent_transactions": recent,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_hash_is_stable_and_salted() {
        let a = password_hash("a@x.com", "hunter22");
        assert_eq!(a, password_hash("a@x.com", "hunter22"));
        assert_ne!(a, password_hash("b@x.com", "hunter22"));
        assert_ne!(a, password_hash("a@x.com", "hunter23"));
    }

    #[test]
    fn test_bearer_user_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_user(&headers), None);
        headers.insert(
            axum::http::header::AUTHORIZATION,
            "Bearer user-1".parse().unwrap(),
        );
        assert_eq!(bearer_user(&headers).as_deref(), Some("user-1"));
    }
}
