//! LLM-backed classification of client turns.
//!
//! Routing is advisory only: a misroute degrades to portfolio analysis with
//! no side effects, so any parse failure or unknown agent falls back to the
//! default.

use std::str::FromStr;
use std::sync::Arc;
use tracing::warn;

use crate::domain::ports::LlmService;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentKind {
    PortfolioAnalysis,
    TradeExecution,
    ComplianceReview,
}

impl AgentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::PortfolioAnalysis => "portfolio_analysis",
            AgentKind::TradeExecution => "trade_execution",
            AgentKind::ComplianceReview => "compliance_review",
        }
    }
}

impl FromStr for AgentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "portfolio_analysis" => Ok(AgentKind::PortfolioAnalysis),
            "trade_execution" => Ok(AgentKind::TradeExecution),
            "compliance_review" => Ok(AgentKind::ComplianceReview),
            other => Err(format!("unknown agent: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RoutingDecision {
    pub agent: AgentKind,
    pub task: String,
}

impl RoutingDecision {
    fn fallback() -> Self {
        Self {
            agent: AgentKind::PortfolioAnalysis,
            task: "client_engagement".to_string(),
        }
    }
}

const ROUTER_SYSTEM_PROMPT: &str = "You are the routing layer of a multi-agent investment \
advisor. Route each client message to exactly one agent and answer with a single JSON object, \
nothing else.";

pub struct AgentRouter {
    llm: Arc<dyn LlmService>,
}

impl AgentRouter {
    pub fn new(llm: Arc<dyn LlmService>) -> Self {
        Self { llm }
    }

    /// Classify one client turn. Ambiguous advisory questions go to
    /// portfolio_analysis; explicit imperatives with quantities go to
    /// trade_execution.
    pub async fn classify(
        &self,
        user_message: &str,
        portfolio_summary: Option<&str>,
        client_profile: Option<&str>,
    ) -> RoutingDecision {
        let prompt = format!(
            r#"AVAILABLE AGENTS:

1. "portfolio_analysis" - portfolio analysis, risk assessment, diversification advice,
   advisory questions about what to buy or sell ("Should I buy NVDA?", "Is my portfolio too risky?")
2. "trade_execution" - explicit buy/sell commands with quantities
   ("Buy 100 shares of AAPL", "sell all SPY", "Let's sell 10 shares of SPY")
3. "compliance_review" - explicit compliance or regulatory checks
   ("Review this trade", "Is this allowed?")

CONTEXT:
{portfolio_context}
{client_context}

USER MESSAGE: "{user_message}"

Most questions and advisory requests go to portfolio_analysis. Only route to trade_execution
for specific execution commands; only route to compliance_review for explicit compliance checks.

Respond with ONLY a JSON object:
{{"agent": "portfolio_analysis|trade_execution|compliance_review", "task": "brief_description"}}"#,
            portfolio_context = portfolio_summary.unwrap_or(""),
            client_context = client_profile.unwrap_or(""),
        );

        let response = match self.llm.complete(ROUTER_SYSTEM_PROMPT, &prompt).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Routing LLM call failed, using default: {e}");
                return RoutingDecision::fallback();
            }
        };

        match parse_routing(&response) {
            Some(decision) => decision,
            None => {
                warn!("Routing response unparseable, using default: {response}");
                RoutingDecision::fallback()
            }
        }
    }
}

/// Pull the first JSON object out of the response and validate the agent
/// name. Anything else means the fallback.
fn parse_routing(response: &str) -> Option<RoutingDecision> {
    let start = response.find('{')?;
    let end = response.rfind('}')?;
    if end <= start {
        return None;
    }
    let parsed: serde_json::Value = serde_json::from_str(&response[start..=end]).ok()?;
    let agent = AgentKind::from_str(parsed.get("agent")?.as_str()?).ok()?;
    let task = parsed
        .get("task")
        .and_then(|t| t.as_str())
        .unwrap_or("user_request")
        .to_string();
    Some(RoutingDecision { agent, task })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_routing_happy_path() {
        let decision = parse_routing(
            r#"Here you go: {"agent": "trade_execution", "task": "buy 10 NVDA"} "#,
        )
        .unwrap();
        assert_eq!(decision.agent, AgentKind::TradeExecution);
        assert_eq!(decision.task, "buy 10 NVDA");
    }

    #[test]
    fn test_parse_routing_unknown_agent_rejected() {
        assert!(parse_routing(r#"{"agent": "sales", "task": "x"}"#).is_none());
    }

    #[test]
    fn test_parse_routing_garbage_rejected() {
        assert!(parse_routing("not json at all").is_none());
        assert!(parse_routing("{").is_none());
    }

    #[test]
    fn test_parse_routing_missing_task_defaults() {
        let decision = parse_routing(r#"{"agent": "portfolio_analysis"}"#).unwrap();
        assert_eq!(decision.task, "user_request");
    }
}
