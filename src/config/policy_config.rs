//! Compliance policy configuration parsing from environment variables.

use anyhow::Result;
use std::env;
use std::path::PathBuf;

use super::parse_env_or;

/// Location and watch cadence of the compliance policy document. When no
/// path is configured the policy store boots from its built-in rule set and
/// the watcher stays off.
#[derive(Debug, Clone)]
pub struct PolicyEnvConfig {
    pub path: Option<PathBuf>,
    pub watch_interval_secs: u64,
}

impl PolicyEnvConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            path: env::var("POLICY_PATH").ok().map(PathBuf::from),
            watch_interval_secs: parse_env_or("POLICY_WATCH_INTERVAL_SEC", 5)?,
        })
    }
}
