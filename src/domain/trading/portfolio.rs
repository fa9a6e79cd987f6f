use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Reconciliation tolerance for derived money values (1 cent).
pub const MONEY_TOLERANCE: Decimal = dec!(0.01);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum RiskTolerance {
    Conservative,
    #[default]
    Moderate,
    Aggressive,
}

impl RiskTolerance {
    /// Ordinal used by suitability comparisons.
    pub fn level(&self) -> u8 {
        match self {
            RiskTolerance::Conservative => 1,
            RiskTolerance::Moderate => 2,
            RiskTolerance::Aggressive => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskTolerance::Conservative => "conservative",
            RiskTolerance::Moderate => "moderate",
            RiskTolerance::Aggressive => "aggressive",
        }
    }
}

impl fmt::Display for RiskTolerance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RiskTolerance {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "conservative" => Ok(RiskTolerance::Conservative),
            "moderate" => Ok(RiskTolerance::Moderate),
            "aggressive" => Ok(RiskTolerance::Aggressive),
            other => Err(format!("unknown risk tolerance: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum InvestmentObjective {
    Income,
    #[default]
    Growth,
    WealthBuilding,
    Retirement,
}

impl InvestmentObjective {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvestmentObjective::Income => "income",
            InvestmentObjective::Growth => "growth",
            InvestmentObjective::WealthBuilding => "wealth_building",
            InvestmentObjective::Retirement => "retirement",
        }
    }
}

impl FromStr for InvestmentObjective {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "income" => Ok(InvestmentObjective::Income),
            "growth" => Ok(InvestmentObjective::Growth),
            "wealth_building" => Ok(InvestmentObjective::WealthBuilding),
            "retirement" => Ok(InvestmentObjective::Retirement),
            other => Err(format!("unknown objective: {other}")),
        }
    }
}

/// Client record. Created externally; read-only to this core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub user_id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub risk_tolerance: RiskTolerance,
    pub objective: InvestmentObjective,
    pub date_of_birth: Option<NaiveDate>,
    pub annual_income: Option<Decimal>,
    pub net_worth: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Portfolio {
    pub portfolio_id: String,
    pub user_id: String,
    pub portfolio_name: String,
    pub portfolio_type: String,
    /// Derived but stored: cash_balance + Σ position market values.
    pub total_value: Decimal,
    pub cash_balance: Decimal,
    pub is_primary: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Portfolio {
    /// Invariant check: total_value equals cash + positions within 1 cent.
    pub fn is_reconciled(&self, positions_value: Decimal) -> bool {
        (self.total_value - (self.cash_balance + positions_value)).abs() <= MONEY_TOLERANCE
    }
}

/// A portfolio asset. Unique per (portfolio_id, symbol); created on first
/// buy, removed when quantity reaches zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub portfolio_id: String,
    pub symbol: String,
    pub asset_name: String,
    pub asset_type: String,
    pub sector: Option<String>,
    pub quantity: Decimal,
    pub average_cost: Decimal,
    pub current_price: Decimal,
    pub market_value: Decimal,
    /// Fraction of portfolio total value, in [0, 1].
    pub allocation: Decimal,
    pub updated_at: DateTime<Utc>,
}

impl Position {
    pub fn market_value_consistent(&self) -> bool {
        (self.market_value - self.quantity * self.current_price).abs() <= MONEY_TOLERANCE
    }
}

/// Broker-side position inside an account snapshot.
#[derive(Debug, Clone)]
pub struct BrokerPosition {
    pub symbol: String,
    pub quantity: Decimal,
    pub avg_entry_price: Decimal,
    pub current_price: Decimal,
    pub market_value: Decimal,
}

/// Authoritative account state from the broker.
#[derive(Debug, Clone)]
pub struct AccountSnapshot {
    pub portfolio_value: Decimal,
    pub cash: Decimal,
    pub buying_power: Decimal,
    pub positions: Vec<BrokerPosition>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn position(quantity: Decimal, price: Decimal, market_value: Decimal) -> Position {
        Position {
            portfolio_id: "p1".to_string(),
            symbol: "AAPL".to_string(),
            asset_name: "AAPL".to_string(),
            asset_type: "stock".to_string(),
            sector: Some("Technology".to_string()),
            quantity,
            average_cost: price,
            current_price: price,
            market_value,
            allocation: Decimal::ZERO,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_market_value_tolerance() {
        let exact = position(dec!(10), dec!(193.50), dec!(1935.00));
        assert!(exact.market_value_consistent());

        let within_cent = position(dec!(10), dec!(193.50), dec!(1935.01));
        assert!(within_cent.market_value_consistent());

        let off = position(dec!(10), dec!(193.50), dec!(1935.02));
        assert!(!off.market_value_consistent());
    }

    #[test]
    fn test_risk_tolerance_levels_are_ordered() {
        assert!(RiskTolerance::Conservative.level() < RiskTolerance::Moderate.level());
        assert!(RiskTolerance::Moderate.level() < RiskTolerance::Aggressive.level());
    }

    #[test]
    fn test_portfolio_reconciliation() {
        let portfolio = Portfolio {
            portfolio_id: "p1".to_string(),
            user_id: "u1".to_string(),
            portfolio_name: "Primary".to_string(),
            portfolio_type: "taxable".to_string(),
            total_value: dec!(50000),
            cash_balance: dec!(20000),
            is_primary: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(portfolio.is_reconciled(dec!(30000)));
        assert!(portfolio.is_reconciled(dec!(30000.01)));
        assert!(!portfolio.is_reconciled(dec!(30000.02)));
    }
}
