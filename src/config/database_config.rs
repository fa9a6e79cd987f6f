//! Database configuration parsing from environment variables.

use anyhow::Result;
use std::env;

use super::parse_env_or;

/// Database and connection-pool configuration.
///
/// `DATABASE_URL` wins when set; otherwise the URL is assembled from the
/// individual `DB_*` parts, defaulting to a local sqlite file.
#[derive(Debug, Clone)]
pub struct DatabaseEnvConfig {
    pub url: String,
    pub pool_size: u32,
    pub max_overflow: u32,
    pub pool_timeout_secs: u64,
    pub pool_recycle_secs: u64,
    /// idle-in-transaction guard applied to every connection
    pub idle_in_transaction_timeout_secs: u64,
}

impl DatabaseEnvConfig {
    pub fn from_env() -> Result<Self> {
        let url = match env::var("DATABASE_URL") {
            Ok(url) => url,
            Err(_) => match env::var("DB_HOST") {
                Ok(host) => {
                    let user = env::var("DB_USER").unwrap_or_else(|_| "fiducia".to_string());
                    let password = env::var("DB_PASSWORD").unwrap_or_default();
                    let port = env::var("DB_PORT").unwrap_or_else(|_| "5432".to_string());
                    let name = env::var("DB_NAME").unwrap_or_else(|_| "fiducia".to_string());
                    let sslmode = env::var("DB_SSLMODE").unwrap_or_else(|_| "prefer".to_string());
                    format!("postgres://{user}:{password}@{host}:{port}/{name}?sslmode={sslmode}")
                }
                Err(_) => "sqlite://data/fiducia.db".to_string(),
            },
        };

        Ok(Self {
            url,
            pool_size: parse_env_or("POOL_SIZE", 5)?,
            max_overflow: parse_env_or("MAX_OVERFLOW", 10)?,
            pool_timeout_secs: parse_env_or("POOL_TIMEOUT", 30)?,
            pool_recycle_secs: parse_env_or("POOL_RECYCLE", 1800)?,
            idle_in_transaction_timeout_secs: parse_env_or("IDLE_IN_TRANSACTION_TIMEOUT", 300)?,
        })
    }

    /// Hard cap on simultaneously open connections.
    pub fn max_connections(&self) -> u32 {
        self.pool_size + self.max_overflow
    }
}
