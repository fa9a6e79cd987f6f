mod scheduler;
mod service;

pub use scheduler::{MarketPhase, market_phase};
pub use service::{PortfolioSynchronizer, SyncReport, SyncStatus};
