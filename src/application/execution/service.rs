//! Trade execution workflow service.
//!
//! Authoritative owner of the transaction state machine:
//!
//! ```text
//!                  +-- validate/compliance fail --> rejected
//!   pending -------+-- broker submit fail -------> failed
//!                  +-- broker ok, polled filled -> executed
//!                  +-- user/system cancel -------> cancelled
//! ```
//!
//! This is a deterministic workflow service, not an agent: it validates
//! recommendations against the stored portfolio, gates them through the
//! compliance evaluator, and records every step.

use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::application::compliance::ComplianceEvaluator;
use crate::domain::compliance::verdict::{AccountType, ClientType, TradeCheckInput, TradeVerdict};
use crate::domain::errors::{ExecutionError, StoreError};
use crate::domain::repositories::{
    AuditEntry, NewRecommendation, NewTransaction, PortfolioStore, TransactionPatch,
};
use crate::domain::ports::BrokerService;
use crate::domain::trading::portfolio::Portfolio;
use crate::domain::trading::types::{
    BrokerOrderStatus, OrderTicket, OrderType, TradeSide, Transaction, TransactionStatus,
};

/// Structured trade intent extracted from a client request.
#[derive(Debug, Clone)]
pub struct TradeRecommendation {
    pub symbol: String,
    pub action: TradeSide,
    /// None means "the entire position" and is resolved against holdings.
    pub quantity: Option<Decimal>,
    pub order_type: OrderType,
    pub price: Option<Decimal>,
    pub rationale: String,
}

/// Result of creating (or rejecting) a pending trade.
#[derive(Debug, Clone)]
pub struct PendingTradeOutcome {
    pub transaction_id: String,
    pub status: TransactionStatus,
    pub verdict: TradeVerdict,
    pub symbol: String,
    pub side: TradeSide,
    pub quantity: Decimal,
    pub estimated_price: Decimal,
}

/// Result of driving one pending transaction to (or toward) a terminal
/// state.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub transaction_id: String,
    pub status: TransactionStatus,
    pub filled_qty: Decimal,
    pub fill_price: Option<Decimal>,
    pub notes: String,
}

/// Result of an approval turn.
#[derive(Debug, Clone)]
pub struct ApprovalOutcome {
    pub transaction: Transaction,
    pub outcome: ExecutionOutcome,
    pub message: String,
}

pub struct ExecutionService {
    store: Arc<dyn PortfolioStore>,
    broker: Arc<dyn BrokerService>,
    evaluator: Arc<ComplianceEvaluator>,
    poll_attempts: u32,
    poll_interval: Duration,
}

impl ExecutionService {
    pub fn new(
        store: Arc<dyn PortfolioStore>,
        broker: Arc<dyn BrokerService>,
        evaluator: Arc<ComplianceEvaluator>,
        poll_attempts: u32,
        poll_interval: Duration,
    ) -> Self {
        Self {
            store,
            broker,
            evaluator,
            poll_attempts,
            poll_interval,
        }
    }

    /// Validate a recommendation against the user's portfolio, run the
    /// compliance gate, and persist the transaction row: `pending` when
    /// approved, `rejected` (with the violation summary in notes) when not.
    pub async fn create_pending_trade(
        &self,
        user_id: &str,
        rec: &TradeRecommendation,
    ) -> Result<PendingTradeOutcome, ExecutionError> {
        let symbol = self
            .broker
            .resolve_symbol(&rec.symbol)
            .await
            .ok_or_else(|| ExecutionError::UnknownSymbol {
                input: rec.symbol.clone(),
            })?;

        let portfolio = self
            .store
            .get_primary_portfolio(user_id)
            .await?
            .ok_or_else(|| ExecutionError::NoPortfolio {
                user_id: user_id.to_string(),
            })?;

        let positions = self.store.get_portfolio_assets(&portfolio.portfolio_id).await?;
        let held = positions
            .iter()
            .find(|p| p.symbol.eq_ignore_ascii_case(&symbol))
            .map(|p| p.quantity)
            .unwrap_or(Decimal::ZERO);

        let quantity = match (rec.action, rec.quantity) {
            (TradeSide::Sell, None) => {
                // "sell all": resolve to the full held quantity
                if held <= Decimal::ZERO {
                    return Err(ExecutionError::SymbolNotHeld { symbol });
                }
                held
            }
            (TradeSide::Sell, Some(qty)) => {
                if held <= Decimal::ZERO {
                    return Err(ExecutionError::SymbolNotHeld { symbol });
                }
                if qty > held {
                    return Err(ExecutionError::InsufficientShares {
                        symbol,
                        requested: qty,
                        held,
                    });
                }
                qty
            }
            (TradeSide::Buy, Some(qty)) => qty,
            (TradeSide::Buy, None) => {
                return Err(ExecutionError::UnknownSymbol {
                    input: format!("{symbol} (no quantity)"),
                });
            }
        };

        let price = match rec.price {
            Some(p) => p,
            None => self.broker.get_price(&symbol).await.unwrap_or(Decimal::ZERO),
        };

        let recommendation_id = self
            .store
            .create_recommendation(&NewRecommendation {
                user_id: user_id.to_string(),
                symbol: symbol.clone(),
                action: rec.action,
                quantity,
                rationale: rec.rationale.clone(),
            })
            .await?;

        let verdict = self
            .evaluator
            .check_trade(&TradeCheckInput {
                trade_type: rec.action,
                symbol: symbol.clone(),
                quantity,
                price: Some(price),
                portfolio_value: portfolio.total_value,
                client_type: ClientType::Individual,
                account_type: account_type_for(&portfolio),
                user_id: Some(user_id.to_string()),
                portfolio_id: Some(portfolio.portfolio_id.clone()),
                transaction_id: None,
                recommendation_id: Some(recommendation_id),
            })
            .await?;

        let (status, notes) = if verdict.approved {
            (
                TransactionStatus::Pending,
                "Awaiting user approval".to_string(),
            )
        } else {
            (
                TransactionStatus::Rejected,
                format!("Blocked by compliance: {}", verdict.violation_summary()),
            )
        };

        let transaction_id = self
            .store
            .create_transaction(&NewTransaction {
                user_id: user_id.to_string(),
                portfolio_id: Some(portfolio.portfolio_id.clone()),
                symbol: symbol.clone(),
                side: rec.action,
                quantity,
                price: Some(price),
                total_amount: quantity * price,
                status,
                order_type: rec.order_type,
                broker_reference: None,
                notes,
            })
            .await?;

        info!(
            transaction_id = %transaction_id,
            symbol = %symbol,
            status = %status,
            score = verdict.score,
            "Trade recommendation persisted"
        );

        Ok(PendingTradeOutcome {
            transaction_id,
            status,
            verdict,
            symbol,
            side: rec.action,
            quantity,
            estimated_price: price,
        })
    }

    /// Submit a pending transaction to the broker and drive it toward a
    /// terminal state. Broker submission failure is not an error of this
    /// call: the transaction transitions to `failed` with the message in
    /// notes.
    pub async fn execute(&self, transaction_id: &str) -> Result<ExecutionOutcome, ExecutionError> {
        let tx = self
            .store
            .get_transaction(transaction_id)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                entity: "transaction",
                id: transaction_id.to_string(),
            })?;

        if tx.status != TransactionStatus::Pending {
            return Err(StoreError::InvalidStateTransition {
                transaction_id: transaction_id.to_string(),
                status: tx.status,
            }
            .into());
        }

        let mut ticket = OrderTicket::market(tx.symbol.clone(), tx.side, tx.quantity);
        ticket.order_type = tx.order_type;
        if tx.order_type == OrderType::Limit {
            ticket.limit_price = tx.price;
        }
        ticket.validate()?;

        let placed = match self.broker.place_order(&ticket).await {
            Ok(placed) => placed,
            Err(e) => {
                let notes = format!("Broker submission failed: {e}");
                self.store
                    .update_transaction(
                        transaction_id,
                        &TransactionPatch {
                            status: Some(TransactionStatus::Failed),
                            notes: Some(notes.clone()),
                            ..Default::default()
                        },
                    )
                    .await?;
                self.audit_transition(&tx, TransactionStatus::Failed, &notes).await;
                return Ok(ExecutionOutcome {
                    transaction_id: transaction_id.to_string(),
                    status: TransactionStatus::Failed,
                    filled_qty: Decimal::ZERO,
                    fill_price: None,
                    notes,
                });
            }
        };

        self.store
            .update_transaction(
                transaction_id,
                &TransactionPatch {
                    broker_reference: Some(placed.order_id.clone()),
                    notes: Some(format!("Order submitted: {}", placed.order_id)),
                    ..Default::default()
                },
            )
            .await?;

        // Bounded polling; in mock mode the first response is authoritative.
        let attempts = if self.broker.is_mock() { 1 } else { self.poll_attempts };
        for attempt in 0..attempts {
            match self.broker.order_status(&placed.order_id).await {
                Ok(report) if report.status.is_terminal() => {
                    return self.settle(&tx, &placed.order_id, report.status, report.filled_qty, report.filled_avg_price)
                        .await;
                }
                Ok(_) => {}
                Err(e) => {
                    // The order is submitted; leave the row pending for the
                    // synchronizer rather than guessing a terminal state.
                    warn!(order_id = %placed.order_id, "Order status poll failed: {e}");
                }
            }
            if attempt + 1 < attempts {
                tokio::time::sleep(self.poll_interval).await;
            }
        }

        Ok(ExecutionOutcome {
            transaction_id: transaction_id.to_string(),
            status: TransactionStatus::Pending,
            filled_qty: Decimal::ZERO,
            fill_price: None,
            notes: format!(
                "Order {} submitted; awaiting fill (background sync will settle it)",
                placed.order_id
            ),
        })
    }

    /// Apply a terminal broker status to the transaction row and, for
    /// fills, to the portfolio.
    async fn settle(
        &self,
        tx: &Transaction,
        broker_reference: &str,
        broker_status: BrokerOrderStatus,
        filled_qty: Decimal,
        filled_avg_price: Option<Decimal>,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        match broker_status {
            BrokerOrderStatus::Filled => {
                let qty = if filled_qty > Decimal::ZERO { filled_qty } else { tx.quantity };
                let price = match filled_avg_price {
                    Some(p) => p,
                    None => self.broker.get_price(&tx.symbol).await.unwrap_or(Decimal::ZERO),
                };
                let notes = format!("Filled {} @ ${price}", qty);
                self.store
                    .update_transaction(
                        &tx.transaction_id,
                        &TransactionPatch {
                            status: Some(TransactionStatus::Executed),
                            price: Some(price),
                            total_amount: Some(qty * price),
                            execution_date: Some(Utc::now()),
                            notes: Some(notes.clone()),
                            ..Default::default()
                        },
                    )
                    .await?;

                if let Some(portfolio_id) = &tx.portfolio_id {
                    self.store
                        .apply_fill(portfolio_id, &tx.symbol, tx.side, qty, price)
                        .await?;
                }
                self.audit_transition(tx, TransactionStatus::Executed, &notes).await;

                Ok(ExecutionOutcome {
                    transaction_id: tx.transaction_id.clone(),
                    status: TransactionStatus::Executed,
                    filled_qty: qty,
                    fill_price: Some(price),
                    notes,
                })
            }
            BrokerOrderStatus::Canceled | BrokerOrderStatus::Rejected => {
                let status = if broker_status == BrokerOrderStatus::Canceled {
                    TransactionStatus::Cancelled
                } else {
                    TransactionStatus::Rejected
                };
                let notes = format!("Broker reported order {broker_reference} as {status}");
                self.store
                    .update_transaction(
                        &tx.transaction_id,
                        &TransactionPatch {
                            status: Some(status),
                            notes: Some(notes.clone()),
                            ..Default::default()
                        },
                    )
                    .await?;
                self.audit_transition(tx, status, &notes).await;

                Ok(ExecutionOutcome {
                    transaction_id: tx.transaction_id.clone(),
                    status,
                    filled_qty: Decimal::ZERO,
                    fill_price: None,
                    notes,
                })
            }
            other => Err(ExecutionError::Broker(
                crate::domain::errors::BrokerError::Request {
                    reason: format!("settle called with non-terminal status {other:?}"),
                },
            )),
        }
    }

    /// Only legal on a pending transaction.
    pub async fn cancel_pending(
        &self,
        transaction_id: &str,
        reason: &str,
    ) -> Result<(), ExecutionError> {
        let tx = self
            .store
            .get_transaction(transaction_id)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                entity: "transaction",
                id: transaction_id.to_string(),
            })?;
        if tx.status != TransactionStatus::Pending {
            return Err(StoreError::InvalidStateTransition {
                transaction_id: transaction_id.to_string(),
                status: tx.status,
            }
            .into());
        }
        self.store
            .update_transaction(
                transaction_id,
                &TransactionPatch {
                    status: Some(TransactionStatus::Cancelled),
                    notes: Some(format!("Cancelled: {reason}")),
                    ..Default::default()
                },
            )
            .await?;
        self.audit_transition(&tx, TransactionStatus::Cancelled, reason).await;
        Ok(())
    }

    /// Approval fast-path helper: execute the user's most recent pending
    /// transaction.
    pub async fn approve_workflow(
        &self,
        user_id: &str,
        session_id: Option<&str>,
        approval_text: &str,
    ) -> Result<ApprovalOutcome, ExecutionError> {
        let pending = self.store.get_pending_transactions(user_id).await?;
        let tx = pending
            .into_iter()
            .next()
            .ok_or_else(|| ExecutionError::NoPendingTrade {
                user_id: user_id.to_string(),
            })?;

        let workflow = json!({
            "current_state": "user_approved",
            "transaction_id": tx.transaction_id,
            "approval_text": approval_text,
        });
        if let Err(e) = self
            .store
            .record_workflow(session_id, "trade_execution", &workflow)
            .await
        {
            warn!("Failed to record approval workflow step: {e}");
        }

        let outcome = self.execute(&tx.transaction_id).await?;
        let message = match outcome.status {
            TransactionStatus::Executed => format!(
                "Trade executed: {} {} {} @ ${}",
                tx.side,
                outcome.filled_qty,
                tx.symbol,
                outcome.fill_price.unwrap_or(Decimal::ZERO)
            ),
            TransactionStatus::Pending => format!(
                "Order for {} {} submitted; fill pending with the broker",
                tx.quantity, tx.symbol
            ),
            status => format!("Order for {} {} ended {}", tx.quantity, tx.symbol, status),
        };

        Ok(ApprovalOutcome {
            transaction: tx,
            outcome,
            message,
        })
    }

    async fn audit_transition(&self, tx: &Transaction, to: TransactionStatus, detail: &str) {
        let entry = AuditEntry {
            user_id: tx.user_id.clone(),
            entity_type: "transaction".to_string(),
            entity_id: tx.transaction_id.clone(),
            action: format!("status_{to}"),
            old_values: Some(json!({"status": tx.status.as_str()})),
            new_values: Some(json!({"status": to.as_str(), "detail": detail})),
        };
        if let Err(e) = self.store.create_audit_entry(&entry).await {
            warn!("Failed to write transaction audit entry: {e}");
        }
    }
}

/// Tax treatment inferred from the portfolio type.
fn account_type_for(portfolio: &Portfolio) -> AccountType {
    let ty = portfolio.portfolio_type.to_lowercase();
    if ty.contains("ira") || ty.contains("401") || ty.contains("retirement") {
        AccountType::TaxAdvantaged
    } else {
        AccountType::Taxable
    }
}
