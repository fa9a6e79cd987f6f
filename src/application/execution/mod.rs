mod service;

pub use service::{
    ApprovalOutcome, ExecutionOutcome, ExecutionService, PendingTradeOutcome, TradeRecommendation,
};
