//! Durable chat session log.
//!
//! Ties every message to a session id so a multi-turn workflow (pending
//! approval, then execution) can be resumed and audited later.

use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use crate::domain::chat::{
    AgentType, ChatMessage, ChatSession, MessageType, SessionStatus, SessionType,
};
use crate::domain::errors::StoreError;
use crate::domain::repositories::SessionStore;

pub struct SessionLog {
    store: Arc<dyn SessionStore>,
}

impl SessionLog {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    /// Persist a new active session and return its fresh id.
    pub async fn start_session(
        &self,
        user_id: Option<&str>,
        session_type: SessionType,
        context: Option<serde_json::Value>,
    ) -> Result<String, StoreError> {
        let session = ChatSession {
            session_id: Uuid::new_v4().to_string(),
            user_id: user_id.map(str::to_string),
            session_type,
            status: SessionStatus::Active,
            context,
            started_at: Utc::now(),
            ended_at: None,
            total_messages: 0,
            total_tokens: 0,
        };
        self.store.create_session(&session).await?;
        info!(session_id = %session.session_id, session_type = session_type.as_str(), "Chat session started");
        Ok(session.session_id)
    }

    /// Append one message. Session totals move in the same store
    /// transaction. Returns whether persistence succeeded.
    pub async fn log_message(
        &self,
        session_id: &str,
        agent_type: AgentType,
        message_type: MessageType,
        content: &str,
        metadata: Option<serde_json::Value>,
        tokens_used: Option<i64>,
    ) -> bool {
        let message = ChatMessage {
            message_id: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            agent_type,
            message_type,
            content: content.to_string(),
            metadata,
            tokens_used,
            created_at: Utc::now(),
        };
        match self.store.append_message(&message).await {
            Ok(()) => true,
            Err(e) => {
                error!(session_id, "Failed to log chat message: {e}");
                false
            }
        }
    }

    pub async fn end_session(&self, session_id: &str) -> Result<(), StoreError> {
        self.store.end_session(session_id).await
    }

    /// Messages in ascending chronological order.
    pub async fn get_history(
        &self,
        session_id: &str,
        limit: i64,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        self.store.get_history(session_id, limit).await
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<ChatSession>, StoreError> {
        self.store.get_session(session_id).await
    }

    pub async fn get_user_sessions(
        &self,
        user_id: &str,
        limit: i64,
    ) -> Result<Vec<ChatSession>, StoreError> {
        self.store.get_user_sessions(user_id, limit).await
    }
}
