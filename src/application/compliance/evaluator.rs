//! Scored compliance evaluation of trades and portfolios.
//!
//! The evaluator is stateless with respect to policy: every evaluation
//! reads the current snapshot once and uses it consistently throughout.

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal_macros::dec;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;

use crate::application::audit::{AuditLog, ComplianceEvent, ComplianceEventKind};
use crate::application::policy::PolicyStore;
use crate::domain::compliance::rules::{PolicySnapshot, Severity};
use crate::domain::compliance::verdict::{
    AccountType, PortfolioCheckInput, PortfolioVerdict, TradeCheckInput, TradeVerdict, Violation,
};
use crate::domain::errors::PolicySourceError;
use crate::domain::ports::BrokerService;
use crate::domain::repositories::PortfolioStore;
use crate::domain::trading::types::TradeSide;

/// New total position above this fraction of portfolio value blocks the
/// trade regardless of policy parameters; the softer warning threshold
/// comes from CONC-001's `max_position` param.
const CONCENTRATION_BLOCK: Decimal = dec!(0.50);
/// Trade value above this fraction of the portfolio draws a size warning.
const LARGE_TRADE_FRACTION: Decimal = dec!(0.5);
const WASH_SALE_LOOKBACK_DAYS: i64 = 30;
const WASH_SALE_WAIT_DAYS: i64 = 31;

pub struct ComplianceEvaluator {
    policy: Arc<PolicyStore>,
    store: Arc<dyn PortfolioStore>,
    broker: Arc<dyn BrokerService>,
    audit: Arc<AuditLog>,
}

impl ComplianceEvaluator {
    pub fn new(
        policy: Arc<PolicyStore>,
        store: Arc<dyn PortfolioStore>,
        broker: Arc<dyn BrokerService>,
        audit: Arc<AuditLog>,
    ) -> Self {
        Self {
            policy,
            store,
            broker,
            audit,
        }
    }

    /// Evaluate a single proposed trade against the active policy set.
    pub async fn check_trade(
        &self,
        input: &TradeCheckInput,
    ) -> Result<TradeVerdict, PolicySourceError> {
        let snapshot = self.policy.snapshot()?;

        // Absent price: ask the broker; on failure continue with zero,
        // which keeps the value-based checks conservative.
        let price = match input.price {
            Some(p) => p,
            None => self
                .broker
                .get_price(&input.symbol)
                .await
                .unwrap_or(Decimal::ZERO),
        };
        let trade_value = input.quantity * price;

        let mut violations: Vec<Violation> = Vec::new();
        let mut warnings: Vec<String> = Vec::new();
        let recommendations: Vec<String> = Vec::new();

        if input.trade_type == TradeSide::Buy {
            self.validate_position_concentration(
                &snapshot,
                input,
                trade_value,
                &mut violations,
                &mut warnings,
            )
            .await;
            self.validate_wash_sale(&snapshot, input, &mut violations, &mut warnings)
                .await;
        }

        validate_pattern_day_trader(&snapshot, input, &mut violations, &mut warnings);
        validate_penny_stock(&snapshot, price, &mut violations);
        if input.portfolio_value > Decimal::ZERO
            && trade_value > input.portfolio_value * LARGE_TRADE_FRACTION
        {
            warnings.push(
                "Large trade size relative to portfolio; confirm no market-impact concerns"
                    .to_string(),
            );
        }

        let score = compliance_score(&violations, &warnings);
        let approved = !violations.iter().any(|v| v.severity.blocks_trade());
        let verdict = TradeVerdict {
            approved,
            requires_disclosure: !violations.is_empty(),
            score,
            violations,
            warnings,
            recommendations,
        };

        self.audit
            .compliance_event(ComplianceEvent {
                kind: ComplianceEventKind::Trade,
                subject: input.symbol.clone(),
                rule_ids: verdict.violations.iter().map(|v| v.rule_id.clone()).collect(),
                approved: verdict.approved,
                score: verdict.score,
                warnings: verdict.warnings.len(),
                top_severity: verdict.violations.first().map(|v| v.severity),
                input: serde_json::to_value(input).unwrap_or_default(),
                result: serde_json::to_value(&verdict).unwrap_or_default(),
                user_id: input.user_id.clone(),
                portfolio_id: input.portfolio_id.clone(),
                transaction_id: input.transaction_id.clone(),
                recommendation_id: input.recommendation_id.clone(),
            })
            .await;

        Ok(verdict)
    }

    /// Evaluate a whole portfolio: sector concentration plus suitability.
    pub async fn check_portfolio(
        &self,
        input: &PortfolioCheckInput,
    ) -> Result<PortfolioVerdict, PolicySourceError> {
        let snapshot = self.policy.snapshot()?;

        let mut violations: Vec<Violation> = Vec::new();
        let mut warnings: Vec<String> = Vec::new();

        let mut sector_alloc: BTreeMap<String, Decimal> = BTreeMap::new();
        for asset in &input.assets {
            *sector_alloc
                .entry(asset.sector.clone())
                .or_insert(Decimal::ZERO) += asset.allocation;
        }
        validate_sector_concentration(&snapshot, &sector_alloc, &mut violations);
        validate_suitability(&snapshot, input, &mut violations, &mut warnings);

        let score = compliance_score(&violations, &warnings);
        let compliant = !violations.iter().any(|v| v.severity.blocks_trade());
        let verdict = PortfolioVerdict {
            compliant,
            score,
            violations,
            warnings,
            recommendations: Vec::new(),
            next_review_date: Utc::now() + Duration::days(90),
        };

        let subject = input
            .client_profile
            .client_id
            .clone()
            .unwrap_or_else(|| "unknown".to_string());
        self.audit
            .compliance_event(ComplianceEvent {
                kind: ComplianceEventKind::Portfolio,
                subject,
                rule_ids: verdict.violations.iter().map(|v| v.rule_id.clone()).collect(),
                approved: verdict.compliant,
                score: verdict.score,
                warnings: verdict.warnings.len(),
                top_severity: verdict.violations.first().map(|v| v.severity),
                input: serde_json::to_value(input).unwrap_or_default(),
                result: serde_json::to_value(&verdict).unwrap_or_default(),
                user_id: input.client_profile.client_id.clone(),
                portfolio_id: None,
                transaction_id: None,
                recommendation_id: None,
            })
            .await;

        Ok(verdict)
    }

    /// CONC-001. The existing position is valued at its stored market value
    /// (last-sync price); one verdict always uses one portfolio snapshot.
    async fn validate_position_concentration(
        &self,
        snapshot: &PolicySnapshot,
        input: &TradeCheckInput,
        trade_value: Decimal,
        violations: &mut Vec<Violation>,
        warnings: &mut Vec<String>,
    ) {
        let Some(rule) = snapshot.rule("CONC-001") else {
            return;
        };
        if input.portfolio_value <= Decimal::ZERO {
            return;
        }

        let existing_value = match &input.portfolio_id {
            Some(portfolio_id) => match self.store.get_portfolio_assets(portfolio_id).await {
                Ok(assets) => assets
                    .iter()
                    .find(|a| a.symbol.eq_ignore_ascii_case(&input.symbol))
                    .map(|a| a.market_value)
                    .unwrap_or(Decimal::ZERO),
                Err(e) => {
                    warn!("Concentration check could not read positions: {e}");
                    Decimal::ZERO
                }
            },
            None => Decimal::ZERO,
        };

        let warn_threshold =
            Decimal::from_f64(rule.param_f64("max_position", 0.25)).unwrap_or(dec!(0.25));
        let new_position_pct = (existing_value + trade_value) / input.portfolio_value;
        if new_position_pct > CONCENTRATION_BLOCK {
            violations.push(Violation {
                rule_id: rule.rule_id.clone(),
                violation_type: "concentration_risk".to_string(),
                severity: Severity::Major,
                description: format!(
                    "Position would be {:.1}% of portfolio (exceeds 50% limit)",
                    new_position_pct * dec!(100)
                ),
                recommended_action: format!(
                    "Reduce trade size to keep {} under 50% of portfolio value",
                    input.symbol
                ),
                metadata: json!({
                    "new_position_pct": new_position_pct,
                    "limit": CONCENTRATION_BLOCK,
                    "existing_value": existing_value,
                    "trade_value": trade_value,
                }),
            });
        } else if new_position_pct >= warn_threshold {
            warnings.push(format!(
                "Large position: {:.1}% concentration in {}",
                new_position_pct * dec!(100),
                input.symbol
            ));
        }
    }

    /// TAX-001. Repurchase within 30 days of a loss sale in a taxable
    /// account disallows the loss; the violation carries the disallowed
    /// amount and a recommended wait date.
    async fn validate_wash_sale(
        &self,
        snapshot: &PolicySnapshot,
        input: &TradeCheckInput,
        violations: &mut Vec<Violation>,
        warnings: &mut Vec<String>,
    ) {
        let Some(rule) = snapshot.rule("TAX-001") else {
            return;
        };
        if input.account_type != AccountType::Taxable {
            return;
        }
        let Some(user_id) = &input.user_id else {
            warnings.push(
                "Verify no wash sale violation if a similar security was sold at a loss within 30 days"
                    .to_string(),
            );
            return;
        };

        let since = Utc::now() - Duration::days(WASH_SALE_LOOKBACK_DAYS);
        let sales = match self
            .store
            .get_recent_sales(user_id, &input.symbol, since)
            .await
        {
            Ok(sales) => sales,
            Err(e) => {
                warn!("Wash-sale lookback failed: {e}");
                warnings.push(
                    "Verify no wash sale violation if a similar security was sold at a loss within 30 days"
                        .to_string(),
                );
                return;
            }
        };

        let mut total_disallowed = Decimal::ZERO;
        let mut detected = Vec::new();
        for sale in &sales {
            let sell_price = match sale.price {
                Some(p) => p,
                None => self
                    .broker
                    .get_price(&input.symbol)
                    .await
                    .unwrap_or(Decimal::ZERO),
            };
            let average_cost = match sale.average_cost {
                Some(cost) => cost,
                None => {
                    // No recorded basis: assume a 10% loss so the check
                    // stays conservative, and say so.
                    warnings.push(format!(
                        "Cost basis unavailable for prior {} sale; wash-sale check assumed a 10% loss",
                        input.symbol
                    ));
                    sell_price * dec!(1.1)
                }
            };

            let loss_per_share = (average_cost - sell_price).max(Decimal::ZERO);
            if loss_per_share > Decimal::ZERO {
                let disallowed_qty = input.quantity.min(sale.quantity);
                let disallowed_loss = loss_per_share * disallowed_qty;
                total_disallowed += disallowed_loss;
                let wait_until = sale.created_at + Duration::days(WASH_SALE_WAIT_DAYS);
                detected.push(json!({
                    "sell_date": sale.created_at.date_naive().to_string(),
                    "days_ago": (Utc::now() - sale.created_at).num_days(),
                    "sell_price": sell_price,
                    "average_cost": average_cost,
                    "loss_per_share": loss_per_share,
                    "disallowed_quantity": disallowed_qty,
                    "disallowed_loss": disallowed_loss,
                    "wait_until": wait_until.date_naive().to_string(),
                }));
            }
        }

        if detected.is_empty() {
            return;
        }
        let wait_until = detected
            .iter()
            .filter_map(|d| d["wait_until"].as_str())
            .max()
            .unwrap_or_default()
            .to_string();
        violations.push(Violation {
            rule_id: rule.rule_id.clone(),
            violation_type: "wash_sale".to_string(),
            severity: Severity::Major,
            description: format!(
                "Wash sale: {} was sold at a loss within the last {} days; repurchasing now disallows ${:.2} in tax losses",
                input.symbol, WASH_SALE_LOOKBACK_DAYS, total_disallowed
            ),
            recommended_action: format!(
                "Wait until {wait_until} (31 days after the sale) or use a tax-advantaged account"
            ),
            metadata: json!({
                "total_disallowed_loss": total_disallowed,
                "sales": detected,
            }),
        });
    }
}

/// TRAD-001: equity below the minimum for an individual account draws a
/// pattern-day-trader warning.
fn validate_pattern_day_trader(
    snapshot: &PolicySnapshot,
    input: &TradeCheckInput,
    violations: &mut Vec<Violation>,
    warnings: &mut Vec<String>,
) {
    let Some(rule) = snapshot.rule("TRAD-001") else {
        return;
    };
    if input.client_type.as_str() != "individual" {
        return;
    }
    let min_equity =
        Decimal::from_f64(rule.param_f64("min_equity", 25000.0)).unwrap_or(dec!(25000));
    if input.portfolio_value < min_equity {
        warnings.push("Under $25K equity; limit day trades to 3 per 5 days".to_string());
        violations.push(Violation {
            rule_id: rule.rule_id.clone(),
            violation_type: "pattern_day_trader".to_string(),
            severity: rule.severity,
            description: "Account under $25K equity risks pattern-day-trader restrictions"
                .to_string(),
            recommended_action:
                "Limit day trades to 3 per rolling 5-day window or raise equity above $25K"
                    .to_string(),
            metadata: json!({"min_equity": min_equity, "portfolio_value": input.portfolio_value}),
        });
    }
}

/// PENNY-001: sub-$5 securities require heightened disclosure.
fn validate_penny_stock(snapshot: &PolicySnapshot, price: Decimal, violations: &mut Vec<Violation>) {
    let Some(rule) = snapshot.rule("PENNY-001") else {
        return;
    };
    let threshold = Decimal::from_f64(rule.param_f64("min_price", 5.0)).unwrap_or(dec!(5));
    if price < threshold {
        violations.push(Violation {
            rule_id: rule.rule_id.clone(),
            violation_type: "penny_stock".to_string(),
            severity: rule.severity,
            description: format!(
                "Security price ${price:.2} below ${threshold:.2} penny-stock threshold"
            ),
            recommended_action: "Ensure heightened disclosure and suitability".to_string(),
            metadata: json!({"price": price, "threshold": threshold}),
        });
    }
}

/// CONC-002: any single sector above its allocation limit.
fn validate_sector_concentration(
    snapshot: &PolicySnapshot,
    sector_alloc: &BTreeMap<String, Decimal>,
    violations: &mut Vec<Violation>,
) {
    let Some(rule) = snapshot.rule("CONC-002") else {
        return;
    };
    let limit = Decimal::from_f64(rule.param_f64("max_sector", 0.40)).unwrap_or(dec!(0.40));
    for (sector, allocation) in sector_alloc {
        if *allocation > limit {
            violations.push(Violation {
                rule_id: rule.rule_id.clone(),
                violation_type: "sector_concentration".to_string(),
                severity: rule.severity,
                description: format!(
                    "Sector '{}' at {:.0}% exceeds {:.0}% limit",
                    sector,
                    allocation * dec!(100),
                    limit * dec!(100)
                ),
                recommended_action: "Rebalance across sectors".to_string(),
                metadata: json!({"sector": sector, "allocation": allocation, "limit": limit}),
            });
        }
    }
}

/// SUIT-001/002/003: recommendation risk versus client tolerance, plus the
/// standing aggregate-suitability and reasonable-basis reminders.
fn validate_suitability(
    snapshot: &PolicySnapshot,
    input: &PortfolioCheckInput,
    violations: &mut Vec<Violation>,
    warnings: &mut Vec<String>,
) {
    let target = input.client_profile.target_risk;
    let tolerance = input.client_profile.risk_tolerance;
    if let Some(rule) = snapshot.rule("SUIT-001")
        && target.level() > tolerance.level() + 1
    {
        violations.push(Violation {
            rule_id: rule.rule_id.clone(),
            violation_type: "suitability".to_string(),
            severity: rule.severity,
            description: format!(
                "Recommendation risk '{target}' exceeds client tolerance '{tolerance}'"
            ),
            recommended_action: "Adjust recommendation to match client profile".to_string(),
            metadata: json!({"target_risk": target, "risk_tolerance": tolerance}),
        });
    }
    if snapshot.rule("SUIT-002").is_some() {
        warnings.push(
            "Confirm aggregated transaction suitability over time (Quantitative Suitability)"
                .to_string(),
        );
    }
    if snapshot.rule("SUIT-003").is_some() {
        warnings
            .push("Ensure research/analysis supports the recommendation (Reasonable Basis)".to_string());
    }
}

/// Start at 100; subtract the severity weight per violation and 5 per
/// warning string; clamp to [0, 100].
fn compliance_score(violations: &[Violation], warnings: &[String]) -> u8 {
    let mut score: i32 = 100;
    for violation in violations {
        score -= violation.severity.score_weight();
    }
    score -= 5 * warnings.len() as i32;
    score.clamp(0, 100) as u8
}
