use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::errors::BrokerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    /// Lowercase broker wire form ("buy" / "sell").
    pub fn as_order_side(&self) -> &'static str {
        match self {
            TradeSide::Buy => "buy",
            TradeSide::Sell => "sell",
        }
    }
}

impl fmt::Display for TradeSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeSide::Buy => write!(f, "BUY"),
            TradeSide::Sell => write!(f, "SELL"),
        }
    }
}

impl FromStr for TradeSide {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "buy" => Ok(TradeSide::Buy),
            "sell" => Ok(TradeSide::Sell),
            other => Err(format!("unknown trade side: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum OrderType {
    #[default]
    Market,
    Limit,
    Stop,
    StopLimit,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Market => "market",
            OrderType::Limit => "limit",
            OrderType::Stop => "stop",
            OrderType::StopLimit => "stop_limit",
        }
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OrderType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "market" => Ok(OrderType::Market),
            "limit" => Ok(OrderType::Limit),
            "stop" => Ok(OrderType::Stop),
            "stop_limit" => Ok(OrderType::StopLimit),
            other => Err(format!("unknown order type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TimeInForce {
    #[default]
    Day,
    Gtc,
    Ioc,
    Fok,
}

impl TimeInForce {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeInForce::Day => "day",
            TimeInForce::Gtc => "gtc",
            TimeInForce::Ioc => "ioc",
            TimeInForce::Fok => "fok",
        }
    }
}

/// Lifecycle status of a persisted transaction.
///
/// `Pending` is the single non-terminal state; it covers both "not yet
/// submitted to the broker" and "submitted, awaiting fill". Every other
/// state is terminal and the row becomes immutable except for `notes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionStatus {
    Pending,
    Executed,
    Rejected,
    Failed,
    Cancelled,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Executed => "executed",
            TransactionStatus::Rejected => "rejected",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(TransactionStatus::Pending),
            "executed" => Ok(TransactionStatus::Executed),
            "rejected" => Ok(TransactionStatus::Rejected),
            "failed" => Ok(TransactionStatus::Failed),
            "cancelled" | "canceled" => Ok(TransactionStatus::Cancelled),
            other => Err(format!("unknown transaction status: {other}")),
        }
    }
}

/// Broker-side order status as reported by the status endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BrokerOrderStatus {
    Pending,
    Accepted,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
}

impl BrokerOrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BrokerOrderStatus::Filled | BrokerOrderStatus::Canceled | BrokerOrderStatus::Rejected
        )
    }
}

impl FromStr for BrokerOrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" | "pending_new" | "new" => Ok(BrokerOrderStatus::Pending),
            "accepted" => Ok(BrokerOrderStatus::Accepted),
            "partially_filled" => Ok(BrokerOrderStatus::PartiallyFilled),
            "filled" => Ok(BrokerOrderStatus::Filled),
            "canceled" | "cancelled" | "expired" => Ok(BrokerOrderStatus::Canceled),
            "rejected" => Ok(BrokerOrderStatus::Rejected),
            other => Err(format!("unknown broker order status: {other}")),
        }
    }
}

/// Persisted transaction row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub transaction_id: String,
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
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub execution_date: Option<DateTime<Utc>>,
}

/// Parameters for a broker order submission.
#[derive(Debug, Clone)]
pub struct OrderTicket {
    pub symbol: String,
    pub side: TradeSide,
    pub quantity: Decimal,
    pub order_type: OrderType,
    pub limit_price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub time_in_force: TimeInForce,
}

impl OrderTicket {
    pub fn market(symbol: impl Into<String>, side: TradeSide, quantity: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            quantity,
            order_type: OrderType::Market,
            limit_price: None,
            stop_price: None,
            time_in_force: TimeInForce::Day,
        }
    }

    /// Order-type parameter validation: limit needs a limit price, stop a
    /// stop price, stop_limit both.
    pub fn validate(&self) -> Result<(), BrokerError> {
        if self.quantity <= Decimal::ZERO {
            return Err(BrokerError::InvalidOrder {
                reason: format!("quantity must be positive, got {}", self.quantity),
            });
        }
        match self.order_type {
            OrderType::Limit if self.limit_price.is_none() => Err(BrokerError::InvalidOrder {
                reason: "limit order requires limit_price".to_string(),
            }),
            OrderType::Stop if self.stop_price.is_none() => Err(BrokerError::InvalidOrder {
                reason: "stop order requires stop_price".to_string(),
            }),
            OrderType::StopLimit if self.limit_price.is_none() || self.stop_price.is_none() => {
                Err(BrokerError::InvalidOrder {
                    reason: "stop_limit order requires both limit_price and stop_price".to_string(),
                })
            }
            _ => Ok(()),
        }
    }
}

/// Broker acknowledgement of an order submission.
#[derive(Debug, Clone)]
pub struct PlacedOrder {
    pub order_id: String,
    pub submitted_at: DateTime<Utc>,
    pub status: BrokerOrderStatus,
}

/// Broker-side view of an order's progress.
#[derive(Debug, Clone)]
pub struct OrderStatusReport {
    pub order_id: String,
    pub status: BrokerOrderStatus,
    pub filled_qty: Decimal,
    pub filled_avg_price: Option<Decimal>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub filled_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_transaction_status_terminality() {
        assert!(!TransactionStatus::Pending.is_terminal());
        for status in [
            TransactionStatus::Executed,
            TransactionStatus::Rejected,
            TransactionStatus::Failed,
            TransactionStatus::Cancelled,
        ] {
            assert!(status.is_terminal(), "{status} should be terminal");
        }
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            TransactionStatus::Pending,
            TransactionStatus::Executed,
            TransactionStatus::Rejected,
            TransactionStatus::Failed,
            TransactionStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<TransactionStatus>(), Ok(status));
        }
        // US spelling accepted on the way in
        assert_eq!(
            "canceled".parse::<TransactionStatus>(),
            Ok(TransactionStatus::Cancelled)
        );
    }

    #[test]
    fn test_order_ticket_validation() {
        let mut ticket = OrderTicket::market("AAPL", TradeSide::Buy, dec!(10));
        assert!(ticket.validate().is_ok());

        ticket.order_type = OrderType::Limit;
        assert!(ticket.validate().is_err());
        ticket.limit_price = Some(dec!(100));
        assert!(ticket.validate().is_ok());

        ticket.order_type = OrderType::StopLimit;
        assert!(ticket.validate().is_err());
        ticket.stop_price = Some(dec!(99));
        assert!(ticket.validate().is_ok());

        ticket.quantity = Decimal::ZERO;
        assert!(ticket.validate().is_err());
    }

    #[test]
    fn test_broker_status_parsing() {
        assert_eq!(
            "partially_filled".parse::<BrokerOrderStatus>(),
            Ok(BrokerOrderStatus::PartiallyFilled)
        );
        assert!(BrokerOrderStatus::Filled.is_terminal());
        assert!(!BrokerOrderStatus::Accepted.is_terminal());
    }
}
