//! Append-only audit trail for policy changes and compliance decisions.
//!
//! Events always reach the structured log sink; database persistence is
//! best-effort and never propagates failures to the caller.

use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use crate::domain::compliance::rules::{PolicySnapshot, Severity};
use crate::domain::compliance::verdict::{CheckResult, CheckSeverity, CheckType};
use crate::domain::repositories::{AuditEntry, ComplianceCheckRow, PortfolioStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComplianceEventKind {
    Trade,
    Portfolio,
    Recommendation,
}

impl ComplianceEventKind {
    fn as_str(&self) -> &'static str {
        match self {
            ComplianceEventKind::Trade => "trade",
            ComplianceEventKind::Portfolio => "portfolio",
            ComplianceEventKind::Recommendation => "recommendation",
        }
    }

    fn check_type(&self) -> CheckType {
        match self {
            ComplianceEventKind::Trade => CheckType::Regulatory,
            ComplianceEventKind::Portfolio => CheckType::Concentration,
            ComplianceEventKind::Recommendation => CheckType::Suitability,
        }
    }
}

/// A compliance decision ready for the audit trail.
pub struct ComplianceEvent {
    pub kind: ComplianceEventKind,
    pub subject: String,
    pub rule_ids: Vec<String>,
    pub approved: bool,
    pub score: u8,
    pub warnings: usize,
    pub top_severity: Option<Severity>,
    pub input: serde_json::Value,
    pub result: serde_json::Value,
    pub user_id: Option<String>,
    pub portfolio_id: Option<String>,
    pub transaction_id: Option<String>,
    pub recommendation_id: Option<String>,
}

pub struct AuditLog {
    store: Option<Arc<dyn PortfolioStore>>,
}

impl AuditLog {
    pub fn new(store: Option<Arc<dyn PortfolioStore>>) -> Self {
        Self { store }
    }

    /// Record a policy snapshot replacement: old/new versions, old/new
    /// checksums, and a unified diff of the canonical documents.
    pub async fn policy_change(&self, old: &PolicySnapshot, new: &PolicySnapshot, diff: &str) {
        let payload = json!({
            "event": "policy_change",
            "changed_at": Utc::now().to_rfc3339(),
            "old_version": old.version,
            "old_checksum": old.checksum,
            "new_version": new.version,
            "new_checksum": new.checksum,
            "diff": diff,
        });
        info!(target: "compliance", "{payload}");

        let Some(store) = &self.store else { return };
        let entry = AuditEntry {
            user_id: "system".to_string(),
            entity_type: "policy".to_string(),
            entity_id: new.version.clone(),
            action: "policy_update".to_string(),
            old_values: Some(json!({"version": old.version, "checksum": old.checksum})),
            new_values: Some(json!({
                "version": new.version,
                "checksum": new.checksum,
                "diff": diff,
            })),
        };
        if let Err(e) = store.create_audit_entry(&entry).await {
            error!("Failed to persist policy_change audit entry: {e}");
        }
    }

    /// Record a compliance evaluation. The structured sink gets the full
    /// input/result payload; a compliance_checks row is written when the
    /// references are well-formed.
    pub async fn compliance_event(&self, event: ComplianceEvent) {
        let decision = if event.approved { "approved" } else { "rejected" };
        let payload = json!({
            "event": "compliance_event",
            "id": Uuid::new_v4().to_string(),
            "at": Utc::now().to_rfc3339(),
            "type": event.kind.as_str(),
            "subject": event.subject,
            "rule_ids": event.rule_ids,
            "decision": decision,
            "score": event.score,
            "input": event.input,
            "result": event.result,
        });
        info!(target: "compliance", "{payload}");

        let Some(store) = &self.store else { return };

        let check_result = if !event.approved {
            CheckResult::Fail
        } else if event.warnings > 0 {
            CheckResult::Warning
        } else {
            CheckResult::Pass
        };
        let severity = event
            .top_severity
            .map(CheckSeverity::from)
            .unwrap_or(CheckSeverity::Low);

        let row = ComplianceCheckRow {
            user_id: valid_reference(event.user_id),
            portfolio_id: valid_reference(event.portfolio_id),
            transaction_id: valid_reference(event.transaction_id),
            recommendation_id: valid_reference(event.recommendation_id),
            check_type: event.kind.check_type(),
            rule_name: event.rule_ids.join(","),
            rule_description: format!("Compliance check for {}", event.subject),
            check_result,
            violation_details: json!({
                "input": event.input,
                "result": event.result,
                "score": event.score,
            }),
            severity,
        };
        if let Err(e) = store.insert_compliance_check(&row).await {
            error!("Failed to persist compliance_event row: {e}");
        }
    }
}

/// Referential integrity is defensive: anything that is not a well-formed
/// opaque id is rewritten to None before insert.
fn valid_reference(id: Option<String>) -> Option<String> {
    id.filter(|candidate| Uuid::parse_str(candidate).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_reference_filters_malformed_ids() {
        let good = Uuid::new_v4().to_string();
        assert_eq!(valid_reference(Some(good.clone())), Some(good));
        assert_eq!(valid_reference(Some("user-42".to_string())), None);
        assert_eq!(valid_reference(None), None);
    }

    #[test]
    fn test_event_kind_check_type_mapping() {
        assert_eq!(
            ComplianceEventKind::Trade.check_type(),
            CheckType::Regulatory
        );
        assert_eq!(
            ComplianceEventKind::Portfolio.check_type(),
            CheckType::Concentration
        );
        assert_eq!(
            ComplianceEventKind::Recommendation.check_type(),
            CheckType::Suitability
        );
    }
}
