use crate::domain::trading::types::TransactionStatus;
use rust_decimal::Decimal;
use thiserror::Error;

/// Errors surfaced by the persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("query failed: {reason}")]
    Query { reason: String },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error(
        "transaction {transaction_id} is terminal ({status}); only notes may change"
    )]
    InvalidStateTransition {
        transaction_id: String,
        status: TransactionStatus,
    },
}

impl StoreError {
    pub fn query(err: impl std::fmt::Display) -> Self {
        StoreError::Query {
            reason: err.to_string(),
        }
    }
}

/// Errors from the external broker.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("invalid order: {reason}")]
    InvalidOrder { reason: String },

    #[error("broker request failed: {reason}")]
    Request { reason: String },

    #[error("order not found: {order_id}")]
    OrderNotFound { order_id: String },
}

/// Errors loading or parsing a policy document. The current snapshot is
/// always retained when one of these occurs.
#[derive(Debug, Error)]
pub enum PolicySourceError {
    #[error("cannot read policy source {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("malformed policy document: {reason}")]
    Parse { reason: String },

    #[error("policies not loaded")]
    NotLoaded,
}

/// Domain errors from the trade execution workflow.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("no portfolio found for user {user_id}")]
    NoPortfolio { user_id: String },

    #[error("no pending trade awaiting approval for user {user_id}")]
    NoPendingTrade { user_id: String },

    #[error("cannot sell {symbol}: not in portfolio")]
    SymbolNotHeld { symbol: String },

    #[error("insufficient shares of {symbol}: requested {requested}, held {held}")]
    InsufficientShares {
        symbol: String,
        requested: Decimal,
        held: Decimal,
    },

    #[error("unable to resolve symbol from '{input}'")]
    UnknownSymbol { input: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Policy(#[from] PolicySourceError),
}

/// Errors from the LLM provider.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("llm request failed: {reason}")]
    Request { reason: String },

    #[error("llm stream stalled after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("malformed llm response: {reason}")]
    Malformed { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_execution_error_formatting() {
        let err = ExecutionError::InsufficientShares {
            symbol: "SPY".to_string(),
            requested: dec!(40),
            held: dec!(30),
        };
        let msg = err.to_string();
        assert!(msg.contains("SPY"));
        assert!(msg.contains("40"));
        assert!(msg.contains("30"));
    }

    #[test]
    fn test_store_error_terminal_transition() {
        let err = StoreError::InvalidStateTransition {
            transaction_id: "tx-1".to_string(),
            status: TransactionStatus::Executed,
        };
        assert!(err.to_string().contains("executed"));
    }
}
