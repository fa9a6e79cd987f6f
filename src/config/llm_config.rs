//! LLM provider configuration parsing from environment variables.

use anyhow::{Result, bail};
use std::env;

use super::Mode;

/// Configuration for the chat-completion provider backing the router and
/// supervisor.
#[derive(Debug, Clone)]
pub struct LlmEnvConfig {
    pub api_key: String,
    pub model: String,
    pub temperature: f64,
    pub base_url: String,
    pub request_timeout_secs: u64,
    /// wall-clock budget between streamed tokens
    pub token_timeout_secs: u64,
}

impl LlmEnvConfig {
    pub fn from_env(mode: Mode) -> Result<Self> {
        let api_key = env::var("LLM_API_KEY").unwrap_or_default();
        if api_key.is_empty() && mode == Mode::Live {
            bail!("LLM_API_KEY is required in live mode");
        }

        let temperature = env::var("LLM_TEMPERATURE")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .unwrap_or(0.2);
        if !(0.0..=2.0).contains(&temperature) {
            bail!("LLM_TEMPERATURE must be in [0, 2], got {}", temperature);
        }

        Ok(Self {
            api_key,
            model: env::var("LLM_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            temperature,
            base_url: env::var("LLM_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            request_timeout_secs: 60,
            token_timeout_secs: 60,
        })
    }
}
