use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::domain::errors::PolicySourceError;

/// Regulatory severity of a rule or violation.
///
/// Weights feed the compliance score; `major` and `critical` block trades.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Major,
    Warning,
    Minor,
    Advisory,
}

impl Severity {
    pub fn score_weight(&self) -> i32 {
        match self {
            Severity::Critical => 40,
            Severity::Major => 30,
            Severity::Warning => 20,
            Severity::Minor => 15,
            Severity::Advisory => 10,
        }
    }

    pub fn blocks_trade(&self) -> bool {
        matches!(self, Severity::Critical | Severity::Major)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::Major => "major",
            Severity::Warning => "warning",
            Severity::Minor => "minor",
            Severity::Advisory => "advisory",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "critical" => Ok(Severity::Critical),
            "major" => Ok(Severity::Major),
            "warning" => Ok(Severity::Warning),
            "minor" => Ok(Severity::Minor),
            "advisory" => Ok(Severity::Advisory),
            other => Err(format!("unknown severity: {other}")),
        }
    }
}

/// A single compliance rule as published in a policy document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceRule {
    pub rule_id: String,
    pub regulation_source: String,
    pub rule_name: String,
    #[serde(default)]
    pub description: String,
    pub severity: Severity,
    #[serde(default)]
    pub applies_to: Vec<String>,
    pub effective_date: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub last_updated: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, serde_json::Value>,
}

impl ComplianceRule {
    /// Numeric parameter lookup with a default, tolerant of integer-encoded
    /// values in the document.
    pub fn param_f64(&self, key: &str, default: f64) -> f64 {
        self.params.get(key).and_then(|v| v.as_f64()).unwrap_or(default)
    }
}

/// Policy document shape on the wire: `{version, rules: {rule_id: rule}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDocument {
    #[serde(default = "default_version")]
    pub version: String,
    pub rules: BTreeMap<String, ComplianceRule>,
}

fn default_version() -> String {
    "v1".to_string()
}

impl PolicyDocument {
    pub fn parse(text: &str) -> Result<Self, PolicySourceError> {
        serde_json::from_str(text).map_err(|e| PolicySourceError::Parse {
            reason: e.to_string(),
        })
    }

    /// Canonical byte stream: JSON with every object's keys sorted
    /// lexicographically, timestamps rendered RFC 3339 UTC, absent fields
    /// omitted.
    pub fn canonical_json(&self) -> String {
        let value = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        let mut out = String::new();
        write_canonical(&value, &mut out);
        out
    }

    /// SHA-256 over the canonical form, hex-encoded.
    pub fn checksum(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.canonical_json().as_bytes());
        hex::encode(hasher.finalize())
    }
}

fn write_canonical(value: &serde_json::Value, out: &mut String) {
    match value {
        serde_json::Value::Object(map) => {
            // serde_json's default map is already ordered, but the sort is
            // restated here so canonicalization does not depend on a
            // feature flag.
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        serde_json::Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

/// Immutable view of the active policy set. Shared by `Arc` once published.
#[derive(Debug, Clone)]
pub struct PolicySnapshot {
    pub version: String,
    pub checksum: String,
    pub loaded_at: DateTime<Utc>,
    pub rules: BTreeMap<String, ComplianceRule>,
}

impl PolicySnapshot {
    pub fn rule(&self, rule_id: &str) -> Option<&ComplianceRule> {
        self.rules.get(rule_id)
    }

    pub fn to_document(&self) -> PolicyDocument {
        PolicyDocument {
            version: self.version.clone(),
            rules: self.rules.clone(),
        }
    }
}
