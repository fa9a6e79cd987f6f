use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::domain::chat::{ChatMessage, ChatSession};
use crate::domain::compliance::verdict::{CheckResult, CheckSeverity, CheckType};
use crate::domain::errors::StoreError;
use crate::domain::trading::portfolio::{Portfolio, Position, User};
use crate::domain::trading::types::{
    OrderType, TradeSide, Transaction, TransactionStatus,
};

/// Insert shape for a new transaction row.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub user_id: String,
    pub portfolio_id: Option<String>,
    pub symbol: String,
    pub side: TradeSide,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub total_amount: Decimal,
    pub status: TransactionStatus,
    pub order_type: OrderType,
    pub broker_reference: Option<String>,
    pub notes: String,
}

/// Partial update of a transaction row. Terminal rows accept only `notes`.
#[derive(Debug, Clone, Default)]
pub struct TransactionPatch {
    pub status: Option<TransactionStatus>,
    pub price: Option<Decimal>,
    pub total_amount: Option<Decimal>,
    pub execution_date: Option<DateTime<Utc>>,
    pub broker_reference: Option<String>,
    pub notes: Option<String>,
}

impl TransactionPatch {
    pub fn notes_only(&self) -> bool {
        self.status.is_none()
            && self.price.is_none()
            && self.total_amount.is_none()
            && self.execution_date.is_none()
            && self.broker_reference.is_none()
    }
}

/// Partial update of a portfolio row.
#[derive(Debug, Clone, Default)]
pub struct PortfolioPatch {
    pub total_value: Option<Decimal>,
    pub cash_balance: Option<Decimal>,
}

/// An executed SELL row inside the wash-sale lookback window.
#[derive(Debug, Clone)]
pub struct RecentSale {
    pub transaction_id: String,
    pub symbol: String,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    /// Cost basis at sale time, when the position row still knows it.
    pub average_cost: Option<Decimal>,
    pub created_at: DateTime<Utc>,
}

/// A (user, portfolio) pair due for a reconciliation pass.
#[derive(Debug, Clone)]
pub struct SyncCandidate {
    pub user_id: String,
    pub portfolio_id: String,
}

#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub user_id: String,
    pub entity_type: String,
    pub entity_id: String,
    pub action: String,
    pub old_values: Option<serde_json::Value>,
    pub new_values: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct ComplianceCheckRow {
    pub user_id: Option<String>,
    pub portfolio_id: Option<String>,
    pub transaction_id: Option<String>,
    pub recommendation_id: Option<String>,
    pub check_type: CheckType,
    pub rule_name: String,
    pub rule_description: String,
    pub check_result: CheckResult,
    pub violation_details: serde_json::Value,
    pub severity: CheckSeverity,
}

#[derive(Debug, Clone)]
pub struct NewRecommendation {
    pub user_id: String,
    pub symbol: String,
    pub action: TradeSide,
    pub quantity: Decimal,
    pub rationale: String,
}

#[derive(Debug, Clone)]
pub struct PoolStatus {
    pub size: u32,
    pub idle: u32,
}

/// Persistence façade over users, portfolios, positions, transactions and
/// the audit tables.
#[async_trait]
pub trait PortfolioStore: Send + Sync {
    async fn get_user(&self, user_id: &str) -> Result<Option<User>, StoreError>;

    /// Used by the signup endpoint; the core otherwise treats users as
    /// read-only.
    async fn create_user(&self, user: &User, password_hash: &str) -> Result<(), StoreError>;

    async fn find_user_by_email(
        &self,
        email: &str,
    ) -> Result<Option<(User, String)>, StoreError>;

    async fn create_portfolio(&self, portfolio: &Portfolio) -> Result<(), StoreError>;

    async fn get_user_portfolios(&self, user_id: &str) -> Result<Vec<Portfolio>, StoreError>;

    async fn get_primary_portfolio(&self, user_id: &str) -> Result<Option<Portfolio>, StoreError>;

    async fn get_portfolio(&self, portfolio_id: &str) -> Result<Option<Portfolio>, StoreError>;

    async fn get_portfolio_assets(&self, portfolio_id: &str) -> Result<Vec<Position>, StoreError>;

    /// Idempotent on (portfolio_id, symbol). A resulting quantity of zero
    /// removes the row.
    async fn upsert_position(&self, position: &Position) -> Result<(), StoreError>;

    async fn update_portfolio(
        &self,
        portfolio_id: &str,
        patch: &PortfolioPatch,
    ) -> Result<(), StoreError>;

    async fn create_transaction(&self, tx: &NewTransaction) -> Result<String, StoreError>;

    async fn get_transaction(&self, transaction_id: &str)
    -> Result<Option<Transaction>, StoreError>;

    /// Fails with `InvalidStateTransition` when the row is terminal and the
    /// patch touches anything beyond `notes`.
    async fn update_transaction(
        &self,
        transaction_id: &str,
        patch: &TransactionPatch,
    ) -> Result<(), StoreError>;

    async fn update_transaction_by_broker_ref(
        &self,
        broker_reference: &str,
        patch: &TransactionPatch,
    ) -> Result<(), StoreError>;

    async fn get_pending_transactions(&self, user_id: &str)
    -> Result<Vec<Transaction>, StoreError>;

    async fn get_recent_transactions(
        &self,
        user_id: Option<&str>,
        portfolio_id: Option<&str>,
        limit: i64,
    ) -> Result<Vec<Transaction>, StoreError>;

    /// Executed SELLs of `symbol` since the cutoff, newest first. Feeds the
    /// wash-sale check.
    async fn get_recent_sales(
        &self,
        user_id: &str,
        symbol: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<RecentSale>, StoreError>;

    /// Atomic post-trade update: position upsert (weighted-average cost on
    /// BUY, removal at zero on SELL) and the owning portfolio's total_value
    /// refresh happen in one store transaction.
    async fn apply_fill(
        &self,
        portfolio_id: &str,
        symbol: &str,
        side: TradeSide,
        quantity: Decimal,
        fill_price: Decimal,
    ) -> Result<(), StoreError>;

    async fn create_audit_entry(&self, entry: &AuditEntry) -> Result<(), StoreError>;

    async fn insert_compliance_check(&self, row: &ComplianceCheckRow) -> Result<(), StoreError>;

    async fn create_recommendation(&self, rec: &NewRecommendation) -> Result<String, StoreError>;

    async fn record_workflow(
        &self,
        session_id: Option<&str>,
        workflow_type: &str,
        data: &serde_json::Value,
    ) -> Result<String, StoreError>;

    /// Portfolios with any pending transaction or last updated before the
    /// staleness cutoff.
    async fn sync_candidates(
        &self,
        stale_before: DateTime<Utc>,
    ) -> Result<Vec<SyncCandidate>, StoreError>;

    async fn pool_status(&self) -> PoolStatus;
}

/// Persistence for chat sessions and messages.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create_session(&self, session: &ChatSession) -> Result<(), StoreError>;

    /// Appends a message and bumps the session totals in the same store
    /// transaction.
    async fn append_message(&self, message: &ChatMessage) -> Result<(), StoreError>;

    async fn end_session(&self, session_id: &str) -> Result<(), StoreError>;

    async fn get_session(&self, session_id: &str) -> Result<Option<ChatSession>, StoreError>;

    /// Messages in ascending chronological order.
    async fn get_history(
        &self,
        session_id: &str,
        limit: i64,
    ) -> Result<Vec<ChatMessage>, StoreError>;

    async fn get_user_sessions(
        &self,
        user_id: &str,
        limit: i64,
    ) -> Result<Vec<ChatSession>, StoreError>;
}
