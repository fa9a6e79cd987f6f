//! Built-in policy rule set used when no policy file is configured.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::domain::compliance::rules::{ComplianceRule, PolicyDocument, Severity};

fn rule(
    rule_id: &str,
    regulation_source: &str,
    rule_name: &str,
    description: &str,
    severity: Severity,
    applies_to: &[&str],
    effective_date: &str,
    params: &[(&str, f64)],
) -> ComplianceRule {
    let effective: DateTime<Utc> = effective_date
        .parse()
        .unwrap_or_else(|_| DateTime::<Utc>::MIN_UTC);
    let mut param_map = BTreeMap::new();
    for (key, value) in params {
        if let Some(number) = serde_json::Number::from_f64(*value) {
            param_map.insert((*key).to_string(), serde_json::Value::Number(number));
        }
    }
    ComplianceRule {
        rule_id: rule_id.to_string(),
        regulation_source: regulation_source.to_string(),
        rule_name: rule_name.to_string(),
        description: description.to_string(),
        severity,
        applies_to: applies_to.iter().map(|s| s.to_string()).collect(),
        effective_date: effective,
        last_updated: Utc::now(),
        params: param_map,
    }
}

/// The default rule set, version "v1".
pub fn default_document() -> PolicyDocument {
    let rules = vec![
        rule(
            "CONC-001",
            "SEC",
            "Position Concentration Limit",
            "Individual position should not exceed threshold of portfolio value",
            Severity::Warning,
            &["individual", "institutional"],
            "2000-01-01T00:00:00Z",
            &[("max_position", 0.25)],
        ),
        rule(
            "CONC-002",
            "SEC",
            "Sector Concentration Limit",
            "Single sector allocation should not exceed threshold of portfolio",
            Severity::Warning,
            &["individual", "institutional"],
            "2000-01-01T00:00:00Z",
            &[("max_sector", 0.40)],
        ),
        rule(
            "CONC-003",
            "FINRA",
            "Concentrated Position Disclosure",
            "Must disclose risks for concentrated positions",
            Severity::Major,
            &["advisor"],
            "2012-07-09T00:00:00Z",
            &[],
        ),
        rule(
            "SUIT-001",
            "FINRA",
            "Suitability Rule 2111",
            "Recommendations must be suitable for client based on profile",
            Severity::Critical,
            &["advisor"],
            "2010-07-09T00:00:00Z",
            &[],
        ),
        rule(
            "SUIT-002",
            "FINRA",
            "Quantitative Suitability",
            "Series of transactions must be suitable in aggregate",
            Severity::Critical,
            &["advisor"],
            "2010-07-09T00:00:00Z",
            &[],
        ),
        rule(
            "SUIT-003",
            "FINRA",
            "Reasonable Basis",
            "Advisors must have reasonable basis for recommendations",
            Severity::Warning,
            &["advisor"],
            "2010-07-09T00:00:00Z",
            &[],
        ),
        rule(
            "TAX-001",
            "IRS",
            "Wash Sale Rule Section 1091",
            "Cannot claim loss if repurchasing substantially identical security within 30 days",
            Severity::Warning,
            &["individual", "institutional"],
            "1921-01-01T00:00:00Z",
            &[],
        ),
        rule(
            "TRAD-001",
            "FINRA",
            "Pattern Day Trader Rule",
            "Accounts under $25K limited to 3 day trades per 5-day period",
            Severity::Warning,
            &["individual"],
            "2001-02-27T00:00:00Z",
            &[("min_equity", 25000.0)],
        ),
        rule(
            "TRAD-002",
            "SEC",
            "Market Manipulation Prevention",
            "Cannot engage in manipulative or deceptive trading practices",
            Severity::Critical,
            &["individual", "advisor"],
            "1934-06-06T00:00:00Z",
            &[],
        ),
        rule(
            "PENNY-001",
            "SEC",
            "Penny Stock Disclosure",
            "Trades in penny stocks (< $5) require heightened suitability and disclosure",
            Severity::Advisory,
            &["individual", "advisor"],
            "2001-07-09T00:00:00Z",
            &[("min_price", 5.0)],
        ),
    ];

    PolicyDocument {
        version: "v1".to_string(),
        rules: rules.into_iter().map(|r| (r.rule_id.clone(), r)).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_rules_present() {
        let doc = default_document();
        for rule_id in [
            "CONC-001", "CONC-002", "CONC-003", "SUIT-001", "SUIT-002", "SUIT-003", "TAX-001",
            "TRAD-001", "TRAD-002", "PENNY-001",
        ] {
            assert!(doc.rules.contains_key(rule_id), "missing {rule_id}");
        }
        assert_eq!(doc.rules["PENNY-001"].param_f64("min_price", 0.0), 5.0);
        assert_eq!(doc.rules["TRAD-001"].param_f64("min_equity", 0.0), 25000.0);
        assert_eq!(doc.rules["CONC-002"].param_f64("max_sector", 0.0), 0.40);
    }
}
