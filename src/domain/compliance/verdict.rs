use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::compliance::rules::Severity;
use crate::domain::trading::portfolio::RiskTolerance;
use crate::domain::trading::types::TradeSide;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ClientType {
    #[default]
    Individual,
    Institutional,
}

impl ClientType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientType::Individual => "individual",
            ClientType::Institutional => "institutional",
        }
    }
}

impl FromStr for ClientType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "individual" => Ok(ClientType::Individual),
            "institutional" => Ok(ClientType::Institutional),
            other => Err(format!("unknown client type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum AccountType {
    #[default]
    Taxable,
    TaxAdvantaged,
}

impl AccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountType::Taxable => "taxable",
            AccountType::TaxAdvantaged => "tax_advantaged",
        }
    }
}

/// A single rule violation produced by the evaluator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Violation {
    pub rule_id: String,
    pub violation_type: String,
    pub severity: Severity,
    pub description: String,
    pub recommended_action: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub metadata: serde_json::Value,
}

/// Input to a single trade compliance check.
#[derive(Debug, Clone, Serialize)]
pub struct TradeCheckInput {
    pub trade_type: TradeSide,
    pub symbol: String,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub portfolio_value: Decimal,
    pub client_type: ClientType,
    pub account_type: AccountType,
    pub user_id: Option<String>,
    pub portfolio_id: Option<String>,
    pub transaction_id: Option<String>,
    pub recommendation_id: Option<String>,
}

/// Result of a trade compliance check.
#[derive(Debug, Clone, Serialize)]
pub struct TradeVerdict {
    pub approved: bool,
    pub violations: Vec<Violation>,
    pub warnings: Vec<String>,
    pub recommendations: Vec<String>,
    pub requires_disclosure: bool,
    pub score: u8,
}

impl TradeVerdict {
    pub fn blocking_violations(&self) -> impl Iterator<Item = &Violation> {
        self.violations.iter().filter(|v| v.severity.blocks_trade())
    }

    /// One-line-per-violation summary stored in rejected transaction notes.
    pub fn violation_summary(&self) -> String {
        self.violations
            .iter()
            .map(|v| format!("[{}] {}: {}", v.severity, v.rule_id, v.description))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Sector/symbol slice of a portfolio handed to `check_portfolio`.
#[derive(Debug, Clone, Serialize)]
pub struct AssetAllocation {
    pub symbol: String,
    pub sector: String,
    /// Fraction of portfolio value in [0, 1].
    pub allocation: Decimal,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct ClientProfile {
    pub client_id: Option<String>,
    pub risk_tolerance: RiskTolerance,
    /// Risk level of what is being recommended to the client.
    pub target_risk: RiskTolerance,
    pub client_type: ClientType,
    pub account_type: AccountType,
}

#[derive(Debug, Clone, Serialize)]
pub struct PortfolioCheckInput {
    pub assets: Vec<AssetAllocation>,
    pub portfolio_value: Decimal,
    pub client_profile: ClientProfile,
}

/// Result of a portfolio-wide compliance check.
#[derive(Debug, Clone, Serialize)]
pub struct PortfolioVerdict {
    pub compliant: bool,
    pub violations: Vec<Violation>,
    pub warnings: Vec<String>,
    pub recommendations: Vec<String>,
    pub next_review_date: DateTime<Utc>,
    pub score: u8,
}

/// check_type enumeration of the compliance_checks audit table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckType {
    Suitability,
    Concentration,
    Liquidity,
    Regulatory,
    RiskLimit,
}

impl CheckType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckType::Suitability => "suitability",
            CheckType::Concentration => "concentration",
            CheckType::Liquidity => "liquidity",
            CheckType::Regulatory => "regulatory",
            CheckType::RiskLimit => "risk_limit",
        }
    }
}

/// check_result enumeration of the compliance_checks audit table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckResult {
    Pass,
    Warning,
    Fail,
}

impl CheckResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckResult::Pass => "pass",
            CheckResult::Warning => "warning",
            CheckResult::Fail => "fail",
        }
    }
}

/// Severity scale used by the compliance_checks table, coarser than the
/// rule severity scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl CheckSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckSeverity::Low => "low",
            CheckSeverity::Medium => "medium",
            CheckSeverity::High => "high",
            CheckSeverity::Critical => "critical",
        }
    }
}

impl From<Severity> for CheckSeverity {
    fn from(severity: Severity) -> Self {
        match severity {
            Severity::Critical => CheckSeverity::Critical,
            Severity::Major => CheckSeverity::High,
            Severity::Warning | Severity::Minor => CheckSeverity::Medium,
            Severity::Advisory => CheckSeverity::Low,
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.severity, self.rule_id, self.description)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_db_mapping() {
        assert_eq!(CheckSeverity::from(Severity::Critical).as_str(), "critical");
        assert_eq!(CheckSeverity::from(Severity::Major).as_str(), "high");
        assert_eq!(CheckSeverity::from(Severity::Warning).as_str(), "medium");
        assert_eq!(CheckSeverity::from(Severity::Advisory).as_str(), "low");
    }

    #[test]
    fn test_violation_summary_format() {
        let verdict = TradeVerdict {
            approved: false,
            violations: vec![Violation {
                rule_id: "TAX-001".to_string(),
                violation_type: "wash_sale".to_string(),
                severity: Severity::Major,
                description: "repurchase within 30 days of loss sale".to_string(),
                recommended_action: "wait".to_string(),
                metadata: serde_json::Value::Null,
            }],
            warnings: vec![],
            recommendations: vec![],
            requires_disclosure: true,
            score: 70,
        };
        let summary = verdict.violation_summary();
        assert!(summary.contains("TAX-001"));
        assert!(summary.contains("major"));
        assert_eq!(verdict.blocking_violations().count(), 1);
    }
}
