use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SessionType {
    Advisory,
    Execution,
    Compliance,
    #[default]
    General,
}

impl SessionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionType::Advisory => "advisory",
            SessionType::Execution => "execution",
            SessionType::Compliance => "compliance",
            SessionType::General => "general",
        }
    }

    /// Keyword-driven classification used when a turn opens a new session.
    pub fn from_request(request: &str) -> Self {
        let lower = request.to_lowercase();
        if lower.contains("trade") || lower.contains("buy") || lower.contains("sell") {
            SessionType::Execution
        } else if lower.contains("compliance") || lower.contains("regulation") {
            SessionType::Compliance
        } else {
            SessionType::Advisory
        }
    }
}

impl FromStr for SessionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "advisory" => Ok(SessionType::Advisory),
            "execution" => Ok(SessionType::Execution),
            "compliance" => Ok(SessionType::Compliance),
            "general" => Ok(SessionType::General),
            other => Err(format!("unknown session type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    Active,
    Completed,
    Terminated,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Completed => "completed",
            SessionStatus::Terminated => "terminated",
        }
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "active" => Ok(SessionStatus::Active),
            "completed" => Ok(SessionStatus::Completed),
            "terminated" => Ok(SessionStatus::Terminated),
            other => Err(format!("unknown session status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentType {
    User,
    Advisor,
    Compliance,
    Execution,
    Supervisor,
}

impl AgentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentType::User => "user",
            AgentType::Advisor => "advisor",
            AgentType::Compliance => "compliance",
            AgentType::Execution => "execution",
            AgentType::Supervisor => "supervisor",
        }
    }
}

impl FromStr for AgentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "user" => Ok(AgentType::User),
            "advisor" => Ok(AgentType::Advisor),
            "compliance" => Ok(AgentType::Compliance),
            "execution" => Ok(AgentType::Execution),
            "supervisor" => Ok(AgentType::Supervisor),
            other => Err(format!("unknown agent type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    Query,
    Response,
    Recommendation,
    ApprovalRequest,
    System,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Query => "query",
            MessageType::Response => "response",
            MessageType::Recommendation => "recommendation",
            MessageType::ApprovalRequest => "approval_request",
            MessageType::System => "system",
        }
    }
}

impl FromStr for MessageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "query" => Ok(MessageType::Query),
            "response" => Ok(MessageType::Response),
            "recommendation" => Ok(MessageType::Recommendation),
            "approval_request" => Ok(MessageType::ApprovalRequest),
            "system" => Ok(MessageType::System),
            other => Err(format!("unknown message type: {other}")),
        }
    }
}

/// A durable chat session. Sessions own their messages; deleting a session
/// cascades.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSession {
    pub session_id: String,
    pub user_id: Option<String>,
    pub session_type: SessionType,
    pub status: SessionStatus,
    pub context: Option<serde_json::Value>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub total_messages: i64,
    pub total_tokens: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub message_id: String,
    pub session_id: String,
    pub agent_type: AgentType,
    pub message_type: MessageType,
    pub content: String,
    pub metadata: Option<serde_json::Value>,
    pub tokens_used: Option<i64>,
    pub created_at: DateTime<Utc>,
}
