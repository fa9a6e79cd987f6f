mod database;
mod portfolio_store;
mod session_store;

pub use database::Database;
pub use portfolio_store::SqlitePortfolioStore;
pub use session_store::SqliteSessionStore;
