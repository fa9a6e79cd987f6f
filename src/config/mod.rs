//! Configuration module for Fiducia.
//!
//! Structured configuration loading from environment variables, organized by
//! domain: Database, Broker, LLM, and Policy.

mod broker_config;
mod database_config;
mod llm_config;
mod policy_config;

pub use broker_config::BrokerEnvConfig;
pub use database_config::DatabaseEnvConfig;
pub use llm_config::LlmEnvConfig;
pub use policy_config::PolicyEnvConfig;

use anyhow::{Context, Result, bail};
use std::env;
use std::str::FromStr;

/// Application execution mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// All external collaborators (broker, LLM) replaced by deterministic mocks.
    Mock,
    Live,
}

impl FromStr for Mode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mock" => Ok(Mode::Mock),
            "live" => Ok(Mode::Live),
            _ => bail!("Invalid MODE: {}. Must be 'mock' or 'live'", s),
        }
    }
}

/// Main application configuration.
///
/// Aggregates all configuration from sub-modules. `from_env` fails fast on
/// anything the process cannot run without; the caller maps that failure to
/// exit code 2.
#[derive(Debug, Clone)]
pub struct Config {
    pub mode: Mode,
    pub bind_address: String,

    pub database: DatabaseEnvConfig,
    pub broker: BrokerEnvConfig,
    pub llm: LlmEnvConfig,
    pub policy: PolicyEnvConfig,

    /// Maximum single-position fraction used by the supervisor pre-guard.
    pub max_position_size: f64,
    /// Broker order-status polling budget for synchronous execution.
    pub order_poll_attempts: u32,
    pub order_poll_interval_ms: u64,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let mode_str = env::var("MODE").unwrap_or_else(|_| "mock".to_string());
        let mode = Mode::from_str(&mode_str)?;

        let database = DatabaseEnvConfig::from_env().context("Failed to load database config")?;
        let broker = BrokerEnvConfig::from_env();
        let llm = LlmEnvConfig::from_env(mode).context("Failed to load LLM config")?;
        let policy = PolicyEnvConfig::from_env().context("Failed to load policy config")?;

        let max_position_size = parse_env_or("MAX_POSITION_SIZE", 0.25)?;
        if !(0.0..=1.0).contains(&max_position_size) {
            bail!(
                "MAX_POSITION_SIZE must be a fraction in [0, 1], got {}",
                max_position_size
            );
        }

        Ok(Self {
            mode,
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "127.0.0.1:8787".to_string()),
            database,
            broker,
            llm,
            policy,
            max_position_size,
            order_poll_attempts: parse_env_or("ORDER_POLL_ATTEMPTS", 10)?,
            order_poll_interval_ms: parse_env_or("ORDER_POLL_INTERVAL_MS", 250)?,
        })
    }
}

pub(crate) fn parse_env_or<T: FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("Invalid {}: {}", key, e)),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parsing() {
        assert!(matches!(Mode::from_str("mock").unwrap(), Mode::Mock));
        assert!(matches!(Mode::from_str("LIVE").unwrap(), Mode::Live));
        assert!(Mode::from_str("paper").is_err());
    }

    #[test]
    fn test_config_defaults_in_mock_mode() {
        // SAFETY: test-only env mutation; nothing else reads these keys concurrently.
        unsafe { std::env::set_var("MODE", "mock") };
        let config = Config::from_env().expect("Should parse with defaults");
        assert_eq!(config.order_poll_attempts, 10);
        assert_eq!(config.order_poll_interval_ms, 250);
        assert!((config.max_position_size - 0.25).abs() < f64::EPSILON);
    }
}
