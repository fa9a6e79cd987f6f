//! Background portfolio synchronizer.
//!
//! Reconciles the internal portfolio store against the authoritative broker
//! account: resolves pending orders, re-prices positions, and refreshes
//! portfolio totals. Failures are isolated per portfolio; one bad account
//! never cancels the rest of a pass.

use chrono::{Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::application::sync::scheduler::{MarketPhase, market_phase};
use crate::domain::errors::StoreError;
use crate::domain::ports::BrokerService;
use crate::domain::repositories::{
    AuditEntry, PortfolioPatch, PortfolioStore, SyncCandidate, TransactionPatch,
};
use crate::domain::trading::portfolio::Position;
use crate::domain::trading::types::{BrokerOrderStatus, TransactionStatus};

const STORE_RETRIES: u32 = 3;

/// Portfolios untouched for longer than this get a full account re-sync.
fn staleness() -> ChronoDuration {
    ChronoDuration::hours(1)
}

#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub portfolios_considered: usize,
    pub portfolios_synced: usize,
    pub orders_filled: usize,
    pub orders_closed: usize,
    pub errors: usize,
    pub skipped: bool,
}

#[derive(Debug, Clone)]
pub struct SyncStatus {
    pub running: bool,
    pub phase: MarketPhase,
    pub next_cadence: Duration,
}

pub struct PortfolioSynchronizer {
    store: Arc<dyn PortfolioStore>,
    broker: Arc<dyn BrokerService>,
    in_flight: AtomicBool,
}

impl PortfolioSynchronizer {
    pub fn new(store: Arc<dyn PortfolioStore>, broker: Arc<dyn BrokerService>) -> Self {
        Self {
            store,
            broker,
            in_flight: AtomicBool::new(false),
        }
    }

    /// Spawn the periodic reconciliation task. The cadence follows the
    /// market phase; a stop signal drains the in-flight pass before the
    /// task returns.
    pub fn spawn(
        self: Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!("Portfolio synchronizer started");
            loop {
                let phase = market_phase(Utc::now());
                tokio::select! {
                    _ = shutdown.changed() => {
                        info!("Portfolio synchronizer stopping");
                        return;
                    }
                    _ = tokio::time::sleep(phase.cadence()) => {}
                }
                let report = self.run_pass().await;
                if report.skipped {
                    debug!("Sync pass skipped; previous pass still running");
                } else {
                    info!(
                        considered = report.portfolios_considered,
                        synced = report.portfolios_synced,
                        filled = report.orders_filled,
                        errors = report.errors,
                        phase = phase.as_str(),
                        "Sync pass complete"
                    );
                }
            }
        })
    }

    pub fn status(&self) -> SyncStatus {
        let phase = market_phase(Utc::now());
        SyncStatus {
            running: self.in_flight.load(Ordering::SeqCst),
            next_cadence: phase.cadence(),
            phase,
        }
    }

    /// One reconciliation pass over every portfolio that needs it.
    /// Single-flight: a new pass is skipped while one is in progress.
    pub async fn run_pass(&self) -> SyncReport {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            return SyncReport {
                skipped: true,
                ..Default::default()
            };
        }
        let report = self.run_pass_inner().await;
        self.in_flight.store(false, Ordering::SeqCst);
        report
    }

    async fn run_pass_inner(&self) -> SyncReport {
        let mut report = SyncReport::default();
        let stale_before = Utc::now() - staleness();

        let candidates = match with_retry(|| self.store.sync_candidates(stale_before)).await {
            Ok(candidates) => candidates,
            Err(e) => {
                error!("Sync pass could not enumerate portfolios: {e}");
                report.errors += 1;
                return report;
            }
        };
        report.portfolios_considered = candidates.len();

        for candidate in candidates {
            match self.sync_portfolio(&candidate).await {
                Ok((filled, closed)) => {
                    report.portfolios_synced += 1;
                    report.orders_filled += filled;
                    report.orders_closed += closed;
                }
                Err(e) => {
                    // Isolated: carry on with the other portfolios.
                    error!(
                        user_id = %candidate.user_id,
                        portfolio_id = %candidate.portfolio_id,
                        "Portfolio sync failed: {e}"
                    );
                    report.errors += 1;
                }
            }
        }
        report
    }

    /// Manual trigger for one user, outside the schedule.
    pub async fn sync_user_now(&self, user_id: &str) -> Result<SyncReport, StoreError> {
        let mut report = SyncReport::default();
        let portfolios = self.store.get_user_portfolios(user_id).await?;
        if portfolios.is_empty() {
            return Err(StoreError::NotFound {
                entity: "portfolio",
                id: user_id.to_string(),
            });
        }
        for portfolio in portfolios {
            report.portfolios_considered += 1;
            let candidate = SyncCandidate {
                user_id: user_id.to_string(),
                portfolio_id: portfolio.portfolio_id,
            };
            match self.sync_portfolio(&candidate).await {
                Ok((filled, closed)) => {
                    report.portfolios_synced += 1;
                    report.orders_filled += filled;
                    report.orders_closed += closed;
                }
                Err(e) => {
                    warn!(user_id, "Manual sync failed for portfolio: {e}");
                    report.errors += 1;
                }
            }
        }
        Ok(report)
    }

    async fn sync_portfolio(&self, candidate: &SyncCandidate) -> Result<(usize, usize), StoreError> {
        let (filled, closed) = self.resolve_pending(&candidate.user_id).await?;

        let portfolio = self.store.get_portfolio(&candidate.portfolio_id).await?;
        let stale = portfolio
            .as_ref()
            .map(|p| Utc::now() - p.updated_at > staleness())
            .unwrap_or(true);

        if filled > 0 || stale {
            self.sync_account_state(candidate).await?;
        }
        Ok((filled, closed))
    }

    /// Check every pending transaction that has a broker reference and
    /// apply terminal broker outcomes.
    pub async fn resolve_pending(&self, user_id: &str) -> Result<(usize, usize), StoreError> {
        let pending = with_retry(|| self.store.get_pending_transactions(user_id)).await?;
        let mut filled = 0;
        let mut closed = 0;

        for tx in pending {
            let Some(broker_ref) = tx.broker_reference.clone() else {
                continue;
            };
            let report = match self.broker.order_status(&broker_ref).await {
                Ok(report) => report,
                Err(e) => {
                    warn!(broker_ref = %broker_ref, "Could not check order status: {e}");
                    continue;
                }
            };

            match report.status {
                BrokerOrderStatus::Filled => {
                    let qty = if report.filled_qty > Decimal::ZERO {
                        report.filled_qty
                    } else {
                        tx.quantity
                    };
                    let price = report.filled_avg_price.unwrap_or(Decimal::ZERO);
                    self.store
                        .update_transaction_by_broker_ref(
                            &broker_ref,
                            &TransactionPatch {
                                status: Some(TransactionStatus::Executed),
                                price: Some(price),
                                total_amount: Some(qty * price),
                                execution_date: Some(Utc::now()),
                                notes: Some(format!("Filled by sync @ ${price}")),
                                ..Default::default()
                            },
                        )
                        .await?;
                    if let Some(portfolio_id) = &tx.portfolio_id {
                        self.store
                            .apply_fill(portfolio_id, &tx.symbol, tx.side, qty, price)
                            .await?;
                    }
                    info!(symbol = %tx.symbol, side = %tx.side, %qty, "Order filled during sync");
                    filled += 1;
                }
                BrokerOrderStatus::Canceled | BrokerOrderStatus::Rejected => {
                    let status = if report.status == BrokerOrderStatus::Canceled {
                        TransactionStatus::Cancelled
                    } else {
                        TransactionStatus::Rejected
                    };
                    self.store
                        .update_transaction_by_broker_ref(
                            &broker_ref,
                            &TransactionPatch {
                                status: Some(status),
                                notes: Some(format!("Broker closed order as {status}")),
                                ..Default::default()
                            },
                        )
                        .await?;
                    info!(symbol = %tx.symbol, %status, "Order closed during sync");
                    closed += 1;
                }
                _ => {}
            }
        }
        Ok((filled, closed))
    }

    /// Pull the authoritative account snapshot and upsert every broker
    /// position, then refresh the portfolio's cash and total value.
    async fn sync_account_state(&self, candidate: &SyncCandidate) -> Result<(), StoreError> {
        let snapshot = match self.broker.account_snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(portfolio_id = %candidate.portfolio_id, "Account snapshot unavailable: {e}");
                return Ok(());
            }
        };

        for broker_position in &snapshot.positions {
            let market_value = if broker_position.market_value > Decimal::ZERO {
                broker_position.market_value
            } else {
                broker_position.quantity * broker_position.current_price
            };
            let allocation = if snapshot.portfolio_value > Decimal::ZERO {
                market_value / snapshot.portfolio_value
            } else {
                Decimal::ZERO
            };
            let position = Position {
                portfolio_id: candidate.portfolio_id.clone(),
                symbol: broker_position.symbol.clone(),
                asset_name: broker_position.symbol.clone(),
                asset_type: "stock".to_string(),
                sector: None,
                quantity: broker_position.quantity,
                average_cost: broker_position.avg_entry_price,
                current_price: broker_position.current_price,
                market_value,
                allocation,
                updated_at: Utc::now(),
            };
            with_retry(|| self.store.upsert_position(&position)).await?;
        }

        let portfolio_patch = PortfolioPatch {
            total_value: Some(snapshot.portfolio_value),
            cash_balance: Some(snapshot.cash),
        };
        with_retry(|| self.store.update_portfolio(&candidate.portfolio_id, &portfolio_patch))
            .await?;

        self.store
            .create_audit_entry(&AuditEntry {
                user_id: candidate.user_id.clone(),
                entity_type: "portfolio".to_string(),
                entity_id: candidate.portfolio_id.clone(),
                action: "alpaca_sync".to_string(),
                old_values: None,
                new_values: Some(json!({
                    "total_value": snapshot.portfolio_value,
                    "cash_balance": snapshot.cash,
                    "positions_count": snapshot.positions.len(),
                    "sync_timestamp": Utc::now().to_rfc3339(),
                })),
            })
            .await?;
        Ok(())
    }
}

/// Transient store failures retry with exponential backoff before they
/// count as a pass error.
async fn with_retry<T, F, Fut>(mut op: F) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, StoreError>>,
{
    let mut delay = Duration::from_millis(100);
    let mut last_err = None;
    for attempt in 0..STORE_RETRIES {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e @ StoreError::InvalidStateTransition { .. })
            | Err(e @ StoreError::NotFound { .. }) => return Err(e),
            Err(e) => {
                if attempt + 1 < STORE_RETRIES {
                    debug!("Store operation failed (attempt {}): {e}", attempt + 1);
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or(StoreError::Unavailable {
        reason: "retries exhausted".to_string(),
    }))
}
