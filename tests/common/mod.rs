//! Shared wiring for integration tests: in-memory database, deterministic
//! mock broker and LLM, and the full service stack on top.

use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use fiducia::application::audit::AuditLog;
use fiducia::application::compliance::ComplianceEvaluator;
use fiducia::application::execution::ExecutionService;
use fiducia::application::policy::{PolicyStore, default_document};
use fiducia::application::router::AgentRouter;
use fiducia::application::session_log::SessionLog;
use fiducia::application::supervisor::{Chunk, Supervisor};
use fiducia::application::sync::PortfolioSynchronizer;
use fiducia::domain::repositories::{PortfolioStore, SessionStore};
use fiducia::domain::trading::portfolio::{Portfolio, Position, User};
use fiducia::infrastructure::mock::{MockBrokerService, MockLlmService};
use fiducia::infrastructure::persistence::{Database, SqlitePortfolioStore, SqliteSessionStore};

pub struct Harness {
    pub pool: sqlx::SqlitePool,
    pub store: Arc<dyn PortfolioStore>,
    pub sessions: Arc<SessionLog>,
    pub broker: Arc<MockBrokerService>,
    pub llm: Arc<MockLlmService>,
    pub policy: Arc<PolicyStore>,
    pub evaluator: Arc<ComplianceEvaluator>,
    pub execution: Arc<ExecutionService>,
    pub synchronizer: Arc<PortfolioSynchronizer>,
    pub supervisor: Arc<Supervisor>,
}

pub async fn harness() -> Harness {
    let db = Database::in_memory().await.expect("in-memory db");
    let store: Arc<dyn PortfolioStore> = Arc::new(SqlitePortfolioStore::new(db.pool.clone()));
    let session_store: Arc<dyn SessionStore> = Arc::new(SqliteSessionStore::new(db.pool.clone()));
    let sessions = Arc::new(SessionLog::new(session_store));

    let broker = Arc::new(MockBrokerService::new());
    let llm = Arc::new(MockLlmService::default());

    let audit = Arc::new(AuditLog::new(Some(Arc::clone(&store))));
    let policy = Arc::new(PolicyStore::new(Arc::clone(&audit), None));
    policy.update(default_document()).await;

    let evaluator = Arc::new(ComplianceEvaluator::new(
        Arc::clone(&policy),
        Arc::clone(&store),
        broker.clone(),
        Arc::clone(&audit),
    ));
    let execution = Arc::new(ExecutionService::new(
        Arc::clone(&store),
        broker.clone(),
        Arc::clone(&evaluator),
        3,
        Duration::from_millis(5),
    ));
    let synchronizer = Arc::new(PortfolioSynchronizer::new(
        Arc::clone(&store),
        broker.clone(),
    ));
    let router = Arc::new(AgentRouter::new(llm.clone()));
    let supervisor = Arc::new(Supervisor::new(
        llm.clone(),
        router,
        Arc::clone(&execution),
        Arc::clone(&sessions),
        Arc::clone(&store),
        broker.clone(),
        Duration::from_secs(30),
        Duration::from_secs(5),
    ));

    Harness {
        pool: db.pool,
        store,
        sessions,
        broker,
        llm,
        policy,
        evaluator,
        execution,
        synchronizer,
        supervisor,
    }
}

pub async fn seed_user(store: &Arc<dyn PortfolioStore>, user_id: &str) {
    let user = User {
        user_id: user_id.to_string(),
        email: format!("{user_id}@example.com"),
        first_name: "Test".to_string(),
        last_name: "Client".to_string(),
        risk_tolerance: Default::default(),
        objective: Default::default(),
        date_of_birth: None,
        annual_income: None,
        net_worth: None,
    };
    store.create_user(&user, "hash").await.expect("seed user");
}

pub async fn seed_portfolio(
    store: &Arc<dyn PortfolioStore>,
    user_id: &str,
    total_value: Decimal,
    cash_balance: Decimal,
) -> String {
    let now = Utc::now();
    let portfolio = Portfolio {
        portfolio_id: Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        portfolio_name: "Primary".to_string(),
        portfolio_type: "taxable".to_string(),
        total_value,
        cash_balance,
        is_primary: true,
        created_at: now,
        updated_at: now,
    };
    store.create_portfolio(&portfolio).await.expect("seed portfolio");
    portfolio.portfolio_id
}

#[allow(clippy::too_many_arguments)]
pub async fn seed_position(
    store: &Arc<dyn PortfolioStore>,
    portfolio_id: &str,
    symbol: &str,
    quantity: Decimal,
    average_cost: Decimal,
    current_price: Decimal,
    allocation: Decimal,
    sector: &str,
) {
    let position = Position {
        portfolio_id: portfolio_id.to_string(),
        symbol: symbol.to_string(),
        asset_name: symbol.to_string(),
        asset_type: "stock".to_string(),
        sector: Some(sector.to_string()),
        quantity,
        average_cost,
        current_price,
        market_value: quantity * current_price,
        allocation,
        updated_at: Utc::now(),
    };
    store.upsert_position(&position).await.expect("seed position");
}

/// Drain a supervisor turn: (joined content, final results, error chunks).
pub async fn collect_chunks(
    mut rx: tokio::sync::mpsc::Receiver<Chunk>,
) -> (String, Vec<serde_json::Value>, Vec<(String, String)>) {
    let mut content = String::new();
    let mut finals = Vec::new();
    let mut errors = Vec::new();
    while let Some(chunk) = rx.recv().await {
        match chunk {
            Chunk::Content { content: text } => content.push_str(&text),
            Chunk::Final { result } => finals.push(result),
            Chunk::Error { error, message } => errors.push((error, message)),
        }
    }
    (content, finals, errors)
}
