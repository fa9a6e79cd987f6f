use anyhow::{Context, Result, bail};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tokio::fs;
use tracing::info;

use crate::config::DatabaseEnvConfig;

/// Shared database handle with a bounded connection pool.
#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    pub async fn new(config: &DatabaseEnvConfig) -> Result<Self> {
        let db_url = &config.url;
        if !db_url.starts_with("sqlite:") {
            bail!("This build persists via sqlite; got DATABASE_URL={db_url}");
        }

        // Ensure the directory exists if it's a file path
        if let Some(path_part) = db_url.strip_prefix("sqlite://") {
            let path = Path::new(path_part);
            if let Some(parent) = path.parent()
                && !parent.exists()
            {
                fs::create_dir_all(parent)
                    .await
                    .context("Failed to create database directory")?;
            }
        }

        let options = SqliteConnectOptions::from_str(db_url)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            // a connection stuck mid-transaction gives up the write lock
            // instead of starving the rest of the pool
            .busy_timeout(Duration::from_secs(
                config.idle_in_transaction_timeout_secs.min(30),
            ));

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections())
            .acquire_timeout(Duration::from_secs(config.pool_timeout_secs))
            .idle_timeout(Duration::from_secs(config.pool_recycle_secs))
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        info!("Connected to database: {db_url}");

        let db = Self { pool };
        db.init().await?;
        Ok(db)
    }

    /// In-memory database for tests.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .context("Failed to open in-memory database")?;
        let db = Self { pool };
        db.init().await?;
        Ok(db)
    }

    /// Initialize schema. Enumerated columns carry CHECK constraints; the
    /// audit trail is append-only by API (no update/delete paths exist).
    async fn init(&self) -> Result<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS users (
                user_id TEXT PRIMARY KEY,
                email TEXT NOT NULL UNIQUE,
                first_name TEXT NOT NULL DEFAULT '',
                last_name TEXT NOT NULL DEFAULT '',
                password_hash TEXT NOT NULL DEFAULT '',
                risk_tolerance TEXT NOT NULL DEFAULT 'moderate',
                objective TEXT NOT NULL DEFAULT 'growth',
                date_of_birth TEXT,
                annual_income TEXT,
                net_worth TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS portfolios (
                portfolio_id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                portfolio_name TEXT NOT NULL DEFAULT 'Primary',
                portfolio_type TEXT NOT NULL DEFAULT 'taxable',
                total_value TEXT NOT NULL DEFAULT '0',
                cash_balance TEXT NOT NULL DEFAULT '0',
                is_primary INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_portfolios_user ON portfolios (user_id)",
            r#"
            CREATE TABLE IF NOT EXISTS portfolio_assets (
                portfolio_id TEXT NOT NULL,
                symbol TEXT NOT NULL,
                asset_name TEXT NOT NULL DEFAULT '',
                asset_type TEXT NOT NULL DEFAULT 'stock',
                sector TEXT,
                quantity TEXT NOT NULL,
                average_cost TEXT NOT NULL DEFAULT '0',
                current_price TEXT NOT NULL DEFAULT '0',
                market_value TEXT NOT NULL DEFAULT '0',
                allocation TEXT NOT NULL DEFAULT '0',
                updated_at TEXT NOT NULL,
                PRIMARY KEY (portfolio_id, symbol)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS transactions (
                transaction_id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                portfolio_id TEXT,
                symbol TEXT NOT NULL,
                transaction_type TEXT NOT NULL CHECK (transaction_type IN ('BUY','SELL')),
                quantity TEXT NOT NULL,
                price TEXT,
                total_amount TEXT NOT NULL DEFAULT '0',
                status TEXT NOT NULL CHECK (status IN ('pending','executed','rejected','failed','cancelled')),
                order_type TEXT NOT NULL DEFAULT 'market'
                    CHECK (order_type IN ('market','limit','stop','stop_limit')),
                broker_reference TEXT,
                notes TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                execution_date TEXT
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_transactions_user_status ON transactions (user_id, status, created_at)",
            "CREATE INDEX IF NOT EXISTS idx_transactions_broker_ref ON transactions (broker_reference)",
            r#"
            CREATE TABLE IF NOT EXISTS recommendations (
                recommendation_id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                symbol TEXT NOT NULL,
                action TEXT NOT NULL,
                quantity TEXT NOT NULL,
                rationale TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS compliance_checks (
                check_id TEXT PRIMARY KEY,
                user_id TEXT,
                portfolio_id TEXT,
                transaction_id TEXT,
                recommendation_id TEXT,
                check_type TEXT NOT NULL
                    CHECK (check_type IN ('suitability','concentration','liquidity','regulatory','risk_limit')),
                rule_name TEXT NOT NULL,
                rule_description TEXT NOT NULL DEFAULT '',
                check_result TEXT NOT NULL CHECK (check_result IN ('pass','warning','fail')),
                violation_details TEXT,
                severity TEXT NOT NULL DEFAULT 'low'
                    CHECK (severity IN ('low','medium','high','critical')),
                checked_at TEXT NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_compliance_checks_user ON compliance_checks (user_id, checked_at)",
            r#"
            CREATE TABLE IF NOT EXISTS ai_sessions (
                session_id TEXT PRIMARY KEY,
                user_id TEXT,
                session_type TEXT NOT NULL DEFAULT 'general'
                    CHECK (session_type IN ('advisory','execution','compliance','general')),
                status TEXT NOT NULL DEFAULT 'active'
                    CHECK (status IN ('active','completed','terminated')),
                session_context TEXT,
                started_at TEXT NOT NULL,
                ended_at TEXT,
                total_messages INTEGER NOT NULL DEFAULT 0,
                total_tokens INTEGER NOT NULL DEFAULT 0
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_ai_sessions_user ON ai_sessions (user_id, started_at)",
            r#"
            CREATE TABLE IF NOT EXISTS ai_messages (
                message_id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL REFERENCES ai_sessions(session_id) ON DELETE CASCADE,
                agent_type TEXT NOT NULL
                    CHECK (agent_type IN ('user','advisor','compliance','execution','supervisor')),
                message_type TEXT NOT NULL
                    CHECK (message_type IN ('query','response','recommendation','approval_request','system')),
                content TEXT NOT NULL,
                metadata TEXT,
                tokens_used INTEGER,
                created_at TEXT NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_ai_messages_session ON ai_messages (session_id, created_at)",
            r#"
            CREATE TABLE IF NOT EXISTS agent_workflows (
                workflow_id TEXT PRIMARY KEY,
                session_id TEXT,
                workflow_type TEXT NOT NULL,
                workflow_data TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS audit_trail (
                audit_id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                entity_type TEXT NOT NULL,
                entity_id TEXT NOT NULL,
                action TEXT NOT NULL,
                old_values TEXT,
                new_values TEXT,
                created_at TEXT NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_audit_trail_entity ON audit_trail (entity_type, entity_id, created_at)",
            r#"
            CREATE TABLE IF NOT EXISTS market_data (
                symbol TEXT NOT NULL,
                price TEXT NOT NULL,
                as_of TEXT NOT NULL,
                PRIMARY KEY (symbol, as_of)
            )
            "#,
        ];

        let mut conn = self.pool.acquire().await?;
        for statement in statements {
            sqlx::query(statement)
                .execute(&mut *conn)
                .await
                .with_context(|| format!("Failed schema statement: {}", &statement[..60.min(statement.len())]))?;
        }

        info!("Database schema initialized.");
        Ok(())
    }
}
