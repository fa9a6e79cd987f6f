use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rust_decimal::Decimal;
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use std::str::FromStr;
use uuid::Uuid;

use crate::domain::errors::StoreError;
use crate::domain::repositories::{
    AuditEntry, ComplianceCheckRow, NewRecommendation, NewTransaction, PoolStatus, PortfolioPatch,
    PortfolioStore, RecentSale, SyncCandidate, TransactionPatch,
};
use crate::domain::trading::fill::{apply_fill_to_position, is_flat};
use crate::domain::trading::portfolio::{
    InvestmentObjective, Portfolio, Position, RiskTolerance, User,
};
use crate::domain::trading::types::{
    OrderType, TradeSide, Transaction, TransactionStatus,
};

pub struct SqlitePortfolioStore {
    pool: SqlitePool,
}

impl SqlitePortfolioStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn db_err(e: sqlx::Error) -> StoreError {
    match e {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => StoreError::Unavailable {
            reason: e.to_string(),
        },
        other => StoreError::Query {
            reason: other.to_string(),
        },
    }
}

/// Fixed-width UTC timestamp so TEXT comparison matches time ordering.
fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| DateTime::<Utc>::MIN_UTC)
}

fn get_dec(row: &SqliteRow, col: &str) -> Result<Decimal, StoreError> {
    let raw: String = row.try_get(col).map_err(db_err)?;
    Ok(Decimal::from_str(&raw).unwrap_or_default())
}

fn get_opt_dec(row: &SqliteRow, col: &str) -> Result<Option<Decimal>, StoreError> {
    let raw: Option<String> = row.try_get(col).map_err(db_err)?;
    Ok(raw.and_then(|s| Decimal::from_str(&s).ok()))
}

fn get_ts(row: &SqliteRow, col: &str) -> Result<DateTime<Utc>, StoreError> {
    let raw: String = row.try_get(col).map_err(db_err)?;
    Ok(parse_ts(&raw))
}

fn get_opt_ts(row: &SqliteRow, col: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
    let raw: Option<String> = row.try_get(col).map_err(db_err)?;
    Ok(raw.map(|s| parse_ts(&s)))
}

fn map_user(row: &SqliteRow) -> Result<User, StoreError> {
    let risk: String = row.try_get("risk_tolerance").map_err(db_err)?;
    let objective: String = row.try_get("objective").map_err(db_err)?;
    let dob: Option<String> = row.try_get("date_of_birth").map_err(db_err)?;
    Ok(User {
        user_id: row.try_get("user_id").map_err(db_err)?,
        email: row.try_get("email").map_err(db_err)?,
        first_name: row.try_get("first_name").map_err(db_err)?,
        last_name: row.try_get("last_name").map_err(db_err)?,
        risk_tolerance: RiskTolerance::from_str(&risk).unwrap_or_default(),
        objective: InvestmentObjective::from_str(&objective).unwrap_or_default(),
        date_of_birth: dob.and_then(|s| NaiveDate::from_str(&s).ok()),
        annual_income: get_opt_dec(row, "annual_income")?,
        net_worth: get_opt_dec(row, "net_worth")?,
    })
}

fn map_portfolio(row: &SqliteRow) -> Result<Portfolio, StoreError> {
    Ok(Portfolio {
        portfolio_id: row.try_get("portfolio_id").map_err(db_err)?,
        user_id: row.try_get("user_id").map_err(db_err)?,
        portfolio_name: row.try_get("portfolio_name").map_err(db_err)?,
        portfolio_type: row.try_get("portfolio_type").map_err(db_err)?,
        total_value: get_dec(row, "total_value")?,
        cash_balance: get_dec(row, "cash_balance")?,
        is_primary: row.try_get::<i64, _>("is_primary").map_err(db_err)? != 0,
        created_at: get_ts(row, "created_at")?,
        updated_at: get_ts(row, "updated_at")?,
    })
}

fn map_position(row: &SqliteRow) -> Result<Position, StoreError> {
    Ok(Position {
        portfolio_id: row.try_get("portfolio_id").map_err(db_err)?,
        symbol: row.try_get("symbol").map_err(db_err)?,
        asset_name: row.try_get("asset_name").map_err(db_err)?,
        asset_type: row.try_get("asset_type").map_err(db_err)?,
        sector: row.try_get("sector").map_err(db_err)?,
        quantity: get_dec(row, "quantity")?,
        average_cost: get_dec(row, "average_cost")?,
        current_price: get_dec(row, "current_price")?,
        market_value: get_dec(row, "market_value")?,
        allocation: get_dec(row, "allocation")?,
        updated_at: get_ts(row, "updated_at")?,
    })
}

fn map_transaction(row: &SqliteRow) -> Result<Transaction, StoreError> {
    let side: String = row.try_get("transaction_type").map_err(db_err)?;
    let status: String = row.try_get("status").map_err(db_err)?;
    let order_type: String = row.try_get("order_type").map_err(db_err)?;
    Ok(Transaction {
        transaction_id: row.try_get("transaction_id").map_err(db_err)?,
        user_id: row.try_get("user_id").map_err(db_err)?,
        portfolio_id: row.try_get("portfolio_id").map_err(db_err)?,
        symbol: row.try_get("symbol").map_err(db_err)?,
        side: TradeSide::from_str(&side).map_err(|reason| StoreError::Query { reason })?,
        quantity: get_dec(row, "quantity")?,
        price: get_opt_dec(row, "price")?,
        total_amount: get_dec(row, "total_amount")?,
        status: TransactionStatus::from_str(&status)
            .map_err(|reason| StoreError::Query { reason })?,
        order_type: OrderType::from_str(&order_type).unwrap_or_default(),
        broker_reference: row.try_get("broker_reference").map_err(db_err)?,
        notes: row.try_get("notes").map_err(db_err)?,
        created_at: get_ts(row, "created_at")?,
        updated_at: get_ts(row, "updated_at")?,
        execution_date: get_opt_ts(row, "execution_date")?,
    })
}

#[async_trait]
impl PortfolioStore for SqlitePortfolioStore {
    async fn get_user(&self, user_id: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query("SELECT * FROM users WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(map_user).transpose()
    }

    async fn create_user(&self, user: &User, password_hash: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO users (user_id, email, first_name, last_name, password_hash,
                               risk_tolerance, objective, date_of_birth, annual_income, net_worth)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&user.user_id)
        .bind(&user.email)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(password_hash)
        .bind(user.risk_tolerance.as_str())
        .bind(user.objective.as_str())
        .bind(user.date_of_birth.map(|d| d.to_string()))
        .bind(user.annual_income.map(|d| d.to_string()))
        .bind(user.net_worth.map(|d| d.to_string()))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn find_user_by_email(
        &self,
        email: &str,
    ) -> Result<Option<(User, String)>, StoreError> {
        let row = sqlx::query("SELECT * FROM users WHERE email = ?")
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        match row {
            Some(row) => {
                let hash: String = row.try_get("password_hash").map_err(db_err)?;
                Ok(Some((map_user(&row)?, hash)))
            }
            None => Ok(None),
        }
    }

    async fn create_portfolio(&self, portfolio: &Portfolio) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO portfolios (portfolio_id, user_id, portfolio_name, portfolio_type,
                                    total_value, cash_balance, is_primary, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&portfolio.portfolio_id)
        .bind(&portfolio.user_id)
        .bind(&portfolio.portfolio_name)
        .bind(&portfolio.portfolio_type)
        .bind(portfolio.total_value.to_string())
        .bind(portfolio.cash_balance.to_string())
        .bind(portfolio.is_primary as i64)
        .bind(fmt_ts(portfolio.created_at))
        .bind(fmt_ts(portfolio.updated_at))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_user_portfolios(&self, user_id: &str) -> Result<Vec<Portfolio>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM portfolios WHERE user_id = ? ORDER BY is_primary DESC, created_at ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(map_portfolio).collect()
    }

    async fn get_primary_portfolio(&self, user_id: &str) -> Result<Option<Portfolio>, StoreError> {
        let row = sqlx::query(
            "SELECT * FROM portfolios WHERE user_id = ? AND is_primary = 1 LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.as_ref().map(map_portfolio).transpose()
    }

    async fn get_portfolio(&self, portfolio_id: &str) -> Result<Option<Portfolio>, StoreError> {
        let row = sqlx::query("SELECT * FROM portfolios WHERE portfolio_id = ?")
            .bind(portfolio_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(map_portfolio).transpose()
    }

    async fn get_portfolio_assets(&self, portfolio_id: &str) -> Result<Vec<Position>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM portfolio_assets WHERE portfolio_id = ? ORDER BY symbol ASC",
        )
        .bind(portfolio_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(map_position).collect()
    }

    async fn upsert_position(&self, position: &Position) -> Result<(), StoreError> {
        if is_flat(position.quantity) {
            sqlx::query("DELETE FROM portfolio_assets WHERE portfolio_id = ? AND symbol = ?")
                .bind(&position.portfolio_id)
                .bind(&position.symbol)
                .execute(&self.pool)
                .await
                .map_err(db_err)?;
            return Ok(());
        }
        sqlx::query(
            r#"
            INSERT INTO portfolio_assets
                (portfolio_id, symbol, asset_name, asset_type, sector, quantity,
                 average_cost, current_price, market_value, allocation, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(portfolio_id, symbol) DO UPDATE SET
                asset_name = excluded.asset_name,
                asset_type = excluded.asset_type,
                sector = COALESCE(excluded.sector, portfolio_assets.sector),
                quantity = excluded.quantity,
                average_cost = excluded.average_cost,
                current_price = excluded.current_price,
                market_value = excluded.market_value,
                allocation = excluded.allocation,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&position.portfolio_id)
        .bind(&position.symbol)
        .bind(&position.asset_name)
        .bind(&position.asset_type)
        .bind(&position.sector)
        .bind(position.quantity.to_string())
        .bind(position.average_cost.to_string())
        .bind(position.current_price.to_string())
        .bind(position.market_value.to_string())
        .bind(position.allocation.to_string())
        .bind(fmt_ts(position.updated_at))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn update_portfolio(
        &self,
        portfolio_id: &str,
        patch: &PortfolioPatch,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE portfolios SET
                total_value = COALESCE(?, total_value),
                cash_balance = COALESCE(?, cash_balance),
                updated_at = ?
            WHERE portfolio_id = ?
            "#,
        )
        .bind(patch.total_value.map(|d| d.to_string()))
        .bind(patch.cash_balance.map(|d| d.to_string()))
        .bind(fmt_ts(Utc::now()))
        .bind(portfolio_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "portfolio",
                id: portfolio_id.to_string(),
            });
        }
        Ok(())
    }

    async fn create_transaction(&self, tx: &NewTransaction) -> Result<String, StoreError> {
        let transaction_id = Uuid::new_v4().to_string();
        let now = fmt_ts(Utc::now());
        sqlx::query(
            r#"
            INSERT INTO transactions
                (transaction_id, user_id, portfolio_id, symbol, transaction_type, quantity,
                 price, total_amount, status, order_type, broker_reference, notes,
                 created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&transaction_id)
        .bind(&tx.user_id)
        .bind(&tx.portfolio_id)
        .bind(&tx.symbol)
        .bind(tx.side.to_string())
        .bind(tx.quantity.to_string())
        .bind(tx.price.map(|d| d.to_string()))
        .bind(tx.total_amount.to_string())
        .bind(tx.status.as_str())
        .bind(tx.order_type.as_str())
        .bind(&tx.broker_reference)
        .bind(&tx.notes)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(transaction_id)
    }

    async fn get_transaction(
        &self,
        transaction_id: &str,
    ) -> Result<Option<Transaction>, StoreError> {
        let row = sqlx::query("SELECT * FROM transactions WHERE transaction_id = ?")
            .bind(transaction_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(map_transaction).transpose()
    }

    async fn update_transaction(
        &self,
        transaction_id: &str,
        patch: &TransactionPatch,
    ) -> Result<(), StoreError> {
        let mut db_tx = self.pool.begin().await.map_err(db_err)?;

        let row = sqlx::query("SELECT status FROM transactions WHERE transaction_id = ?")
            .bind(transaction_id)
            .fetch_optional(&mut *db_tx)
            .await
            .map_err(db_err)?
            .ok_or_else(|| StoreError::NotFound {
                entity: "transaction",
                id: transaction_id.to_string(),
            })?;
        let current: String = row.try_get("status").map_err(db_err)?;
        let current = TransactionStatus::from_str(&current)
            .map_err(|reason| StoreError::Query { reason })?;

        // Terminal rows are immutable except for notes.
        if current.is_terminal() && !patch.notes_only() {
            return Err(StoreError::InvalidStateTransition {
                transaction_id: transaction_id.to_string(),
                status: current,
            });
        }

        // Status transitions compare-and-swap on 'pending' so concurrent
        // writers cannot double-settle a row.
        let guard_pending = patch.status.is_some();
        let result = sqlx::query(&format!(
            r#"
            UPDATE transactions SET
                status = COALESCE(?, status),
                price = COALESCE(?, price),
                total_amount = COALESCE(?, total_amount),
                execution_date = COALESCE(?, execution_date),
                broker_reference = COALESCE(?, broker_reference),
                notes = COALESCE(?, notes),
                updated_at = ?
            WHERE transaction_id = ?{}
            "#,
            if guard_pending { " AND status = 'pending'" } else { "" }
        ))
        .bind(patch.status.map(|s| s.as_str()))
        .bind(patch.price.map(|d| d.to_string()))
        .bind(patch.total_amount.map(|d| d.to_string()))
        .bind(patch.execution_date.map(fmt_ts))
        .bind(&patch.broker_reference)
        .bind(&patch.notes)
        .bind(fmt_ts(Utc::now()))
        .bind(transaction_id)
        .execute(&mut *db_tx)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::InvalidStateTransition {
                transaction_id: transaction_id.to_string(),
                status: current,
            });
        }
        db_tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn update_transaction_by_broker_ref(
        &self,
        broker_reference: &str,
        patch: &TransactionPatch,
    ) -> Result<(), StoreError> {
        let row = sqlx::query(
            "SELECT transaction_id FROM transactions WHERE broker_reference = ? LIMIT 1",
        )
        .bind(broker_reference)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .ok_or_else(|| StoreError::NotFound {
            entity: "transaction",
            id: broker_reference.to_string(),
        })?;
        let transaction_id: String = row.try_get("transaction_id").map_err(db_err)?;
        self.update_transaction(&transaction_id, patch).await
    }

    async fn get_pending_transactions(
        &self,
        user_id: &str,
    ) -> Result<Vec<Transaction>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM transactions
            WHERE user_id = ? AND status = 'pending'
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(map_transaction).collect()
    }

    async fn get_recent_transactions(
        &self,
        user_id: Option<&str>,
        portfolio_id: Option<&str>,
        limit: i64,
    ) -> Result<Vec<Transaction>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM transactions
            WHERE (? IS NULL OR user_id = ?)
              AND (? IS NULL OR portfolio_id = ?)
            ORDER BY created_at DESC
            LIMIT ?
            "#,
        )
        .bind(user_id)
        .bind(user_id)
        .bind(portfolio_id)
        .bind(portfolio_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(map_transaction).collect()
    }

    async fn get_recent_sales(
        &self,
        user_id: &str,
        symbol: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<RecentSale>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT t.transaction_id, t.symbol, t.quantity, t.price, t.created_at,
                   pa.average_cost AS position_average_cost
            FROM transactions t
            LEFT JOIN portfolio_assets pa
                ON pa.portfolio_id = t.portfolio_id AND pa.symbol = t.symbol
            WHERE t.user_id = ?
              AND t.symbol = ?
              AND t.transaction_type = 'SELL'
              AND t.status = 'executed'
              AND t.created_at >= ?
            ORDER BY t.created_at DESC
            "#,
        )
        .bind(user_id)
        .bind(symbol)
        .bind(fmt_ts(since))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter()
            .map(|row| {
                Ok(RecentSale {
                    transaction_id: row.try_get("transaction_id").map_err(db_err)?,
                    symbol: row.try_get("symbol").map_err(db_err)?,
                    quantity: get_dec(row, "quantity")?,
                    price: get_opt_dec(row, "price")?,
                    average_cost: get_opt_dec(row, "position_average_cost")?,
                    created_at: get_ts(row, "created_at")?,
                })
            })
            .collect()
    }

    async fn apply_fill(
        &self,
        portfolio_id: &str,
        symbol: &str,
        side: TradeSide,
        quantity: Decimal,
        fill_price: Decimal,
    ) -> Result<(), StoreError> {
        let mut db_tx = self.pool.begin().await.map_err(db_err)?;
        let now = fmt_ts(Utc::now());

        let existing = sqlx::query(
            "SELECT quantity, average_cost FROM portfolio_assets WHERE portfolio_id = ? AND symbol = ?",
        )
        .bind(portfolio_id)
        .bind(symbol)
        .fetch_optional(&mut *db_tx)
        .await
        .map_err(db_err)?;

        let (old_qty, old_avg) = match &existing {
            Some(row) => (get_dec(row, "quantity")?, get_dec(row, "average_cost")?),
            None => (Decimal::ZERO, Decimal::ZERO),
        };
        let (new_qty, new_avg) =
            apply_fill_to_position(old_qty, old_avg, side, quantity, fill_price);

        if is_flat(new_qty) {
            sqlx::query("DELETE FROM portfolio_assets WHERE portfolio_id = ? AND symbol = ?")
                .bind(portfolio_id)
                .bind(symbol)
                .execute(&mut *db_tx)
                .await
                .map_err(db_err)?;
        } else {
            let market_value = new_qty * fill_price;
            sqlx::query(
                r#"
                INSERT INTO portfolio_assets
                    (portfolio_id, symbol, asset_name, asset_type, quantity,
                     average_cost, current_price, market_value, allocation, updated_at)
                VALUES (?, ?, ?, 'stock', ?, ?, ?, ?, '0', ?)
                ON CONFLICT(portfolio_id, symbol) DO UPDATE SET
                    quantity = excluded.quantity,
                    average_cost = excluded.average_cost,
                    current_price = excluded.current_price,
                    market_value = excluded.market_value,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(portfolio_id)
            .bind(symbol)
            .bind(symbol)
            .bind(new_qty.to_string())
            .bind(new_avg.to_string())
            .bind(fill_price.to_string())
            .bind(market_value.to_string())
            .bind(&now)
            .execute(&mut *db_tx)
            .await
            .map_err(db_err)?;
        }

        // Portfolio revaluation happens inside the same store transaction
        // as the position change; failure rolls back both.
        let value_rows = sqlx::query(
            "SELECT market_value FROM portfolio_assets WHERE portfolio_id = ?",
        )
        .bind(portfolio_id)
        .fetch_all(&mut *db_tx)
        .await
        .map_err(db_err)?;
        let positions_value: Decimal = value_rows
            .iter()
            .map(|row| get_dec(row, "market_value"))
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .sum();

        let cash_row = sqlx::query("SELECT cash_balance FROM portfolios WHERE portfolio_id = ?")
            .bind(portfolio_id)
            .fetch_optional(&mut *db_tx)
            .await
            .map_err(db_err)?
            .ok_or_else(|| StoreError::NotFound {
                entity: "portfolio",
                id: portfolio_id.to_string(),
            })?;
        let cash = get_dec(&cash_row, "cash_balance")?;

        sqlx::query(
            "UPDATE portfolios SET total_value = ?, updated_at = ? WHERE portfolio_id = ?",
        )
        .bind((cash + positions_value).to_string())
        .bind(&now)
        .bind(portfolio_id)
        .execute(&mut *db_tx)
        .await
        .map_err(db_err)?;

        db_tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn create_audit_entry(&self, entry: &AuditEntry) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO audit_trail
                (audit_id, user_id, entity_type, entity_id, action, old_values, new_values, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&entry.user_id)
        .bind(&entry.entity_type)
        .bind(&entry.entity_id)
        .bind(&entry.action)
        .bind(entry.old_values.as_ref().map(|v| v.to_string()))
        .bind(entry.new_values.as_ref().map(|v| v.to_string()))
        .bind(fmt_ts(Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn insert_compliance_check(&self, row: &ComplianceCheckRow) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO compliance_checks
                (check_id, user_id, portfolio_id, transaction_id, recommendation_id,
                 check_type, rule_name, rule_description, check_result, violation_details,
                 severity, checked_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&row.user_id)
        .bind(&row.portfolio_id)
        .bind(&row.transaction_id)
        .bind(&row.recommendation_id)
        .bind(row.check_type.as_str())
        .bind(&row.rule_name)
        .bind(&row.rule_description)
        .bind(row.check_result.as_str())
        .bind(row.violation_details.to_string())
        .bind(row.severity.as_str())
        .bind(fmt_ts(Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn create_recommendation(&self, rec: &NewRecommendation) -> Result<String, StoreError> {
        let recommendation_id = Uuid::new_v4().to_string();
        sqlx::query(
            r#"
            INSERT INTO recommendations
                (recommendation_id, user_id, symbol, action, quantity, rationale, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&recommendation_id)
        .bind(&rec.user_id)
        .bind(&rec.symbol)
        .bind(rec.action.as_order_side())
        .bind(rec.quantity.to_string())
        .bind(&rec.rationale)
        .bind(fmt_ts(Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(recommendation_id)
    }

    async fn record_workflow(
        &self,
        session_id: Option<&str>,
        workflow_type: &str,
        data: &serde_json::Value,
    ) -> Result<String, StoreError> {
        let workflow_id = Uuid::new_v4().to_string();
        sqlx::query(
            r#"
            INSERT INTO agent_workflows (workflow_id, session_id, workflow_type, workflow_data, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&workflow_id)
        .bind(session_id)
        .bind(workflow_type)
        .bind(data.to_string())
        .bind(fmt_ts(Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(workflow_id)
    }

    async fn sync_candidates(
        &self,
        stale_before: DateTime<Utc>,
    ) -> Result<Vec<SyncCandidate>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT p.user_id, p.portfolio_id
            FROM portfolios p
            LEFT JOIN transactions t
                ON t.portfolio_id = p.portfolio_id AND t.status = 'pending'
            WHERE t.transaction_id IS NOT NULL OR p.updated_at < ?
            ORDER BY p.user_id
            "#,
        )
        .bind(fmt_ts(stale_before))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter()
            .map(|row| {
                Ok(SyncCandidate {
                    user_id: row.try_get("user_id").map_err(db_err)?,
                    portfolio_id: row.try_get("portfolio_id").map_err(db_err)?,
                })
            })
            .collect()
    }

    async fn pool_status(&self) -> PoolStatus {
        PoolStatus {
            size: self.pool.size(),
            idle: self.pool.num_idle() as u32,
        }
    }
}
