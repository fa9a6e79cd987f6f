use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use std::str::FromStr;

use crate::domain::chat::{
    AgentType, ChatMessage, ChatSession, MessageType, SessionStatus, SessionType,
};
use crate::domain::errors::StoreError;
use crate::domain::repositories::SessionStore;

pub struct SqliteSessionStore {
    pool: SqlitePool,
}

impl SqliteSessionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn db_err(e: sqlx::Error) -> StoreError {
    StoreError::Query {
        reason: e.to_string(),
    }
}

fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| DateTime::<Utc>::MIN_UTC)
}

fn map_session(row: &SqliteRow) -> Result<ChatSession, StoreError> {
    let session_type: String = row.try_get("session_type").map_err(db_err)?;
    let status: String = row.try_get("status").map_err(db_err)?;
    let context: Option<String> = row.try_get("session_context").map_err(db_err)?;
    let started_at: String = row.try_get("started_at").map_err(db_err)?;
    let ended_at: Option<String> = row.try_get("ended_at").map_err(db_err)?;
    Ok(ChatSession {
        session_id: row.try_get("session_id").map_err(db_err)?,
        user_id: row.try_get("user_id").map_err(db_err)?,
        session_type: SessionType::from_str(&session_type).unwrap_or_default(),
        status: SessionStatus::from_str(&status).unwrap_or(SessionStatus::Active),
        context: context.and_then(|raw| serde_json::from_str(&raw).ok()),
        started_at: parse_ts(&started_at),
        ended_at: ended_at.map(|s| parse_ts(&s)),
        total_messages: row.try_get("total_messages").map_err(db_err)?,
        total_tokens: row.try_get("total_tokens").map_err(db_err)?,
    })
}

fn map_message(row: &SqliteRow) -> Result<ChatMessage, StoreError> {
    let agent_type: String = row.try_get("agent_type").map_err(db_err)?;
    let message_type: String = row.try_get("message_type").map_err(db_err)?;
    let metadata: Option<String> = row.try_get("metadata").map_err(db_err)?;
    let created_at: String = row.try_get("created_at").map_err(db_err)?;
    Ok(ChatMessage {
        message_id: row.try_get("message_id").map_err(db_err)?,
        session_id: row.try_get("session_id").map_err(db_err)?,
        agent_type: AgentType::from_str(&agent_type).unwrap_or(AgentType::Supervisor),
        message_type: MessageType::from_str(&message_type).unwrap_or(MessageType::System),
        content: row.try_get("content").map_err(db_err)?,
        metadata: metadata.and_then(|raw| serde_json::from_str(&raw).ok()),
        tokens_used: row.try_get("tokens_used").map_err(db_err)?,
        created_at: parse_ts(&created_at),
    })
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn create_session(&self, session: &ChatSession) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO ai_sessions
                (session_id, user_id, session_type, status, session_context,
                 started_at, ended_at, total_messages, total_tokens)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&session.session_id)
        .bind(&session.user_id)
        .bind(session.session_type.as_str())
        .bind(session.status.as_str())
        .bind(session.context.as_ref().map(|v| v.to_string()))
        .bind(fmt_ts(session.started_at))
        .bind(session.ended_at.map(fmt_ts))
        .bind(session.total_messages)
        .bind(session.total_tokens)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn append_message(&self, message: &ChatMessage) -> Result<(), StoreError> {
        // Message insert and session totals move together or not at all.
        let mut db_tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query(
            r#"
            INSERT INTO ai_messages
                (message_id, session_id, agent_type, message_type, content,
                 metadata, tokens_used, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&message.message_id)
        .bind(&message.session_id)
        .bind(message.agent_type.as_str())
        .bind(message.message_type.as_str())
        .bind(&message.content)
        .bind(message.metadata.as_ref().map(|v| v.to_string()))
        .bind(message.tokens_used)
        .bind(fmt_ts(message.created_at))
        .execute(&mut *db_tx)
        .await
        .map_err(db_err)?;

        let result = sqlx::query(
            r#"
            UPDATE ai_sessions SET
                total_messages = total_messages + 1,
                total_tokens = total_tokens + ?
            WHERE session_id = ?
            "#,
        )
        .bind(message.tokens_used.unwrap_or(0))
        .bind(&message.session_id)
        .execute(&mut *db_tx)
        .await
        .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "session",
                id: message.session_id.clone(),
            });
        }

        db_tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn end_session(&self, session_id: &str) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE ai_sessions SET status = 'completed', ended_at = ? WHERE session_id = ?",
        )
        .bind(fmt_ts(Utc::now()))
        .bind(session_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "session",
                id: session_id.to_string(),
            });
        }
        Ok(())
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<ChatSession>, StoreError> {
        let row = sqlx::query("SELECT * FROM ai_sessions WHERE session_id = ?")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(map_session).transpose()
    }

    async fn get_history(
        &self,
        session_id: &str,
        limit: i64,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        // Most recent `limit` messages, returned oldest-first.
        let rows = sqlx::query(
            r#"
            SELECT * FROM (
                SELECT * FROM ai_messages
                WHERE session_id = ?
                ORDER BY created_at DESC
                LIMIT ?
            ) ORDER BY created_at ASC
            "#,
        )
        .bind(session_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(map_message).collect()
    }

    async fn get_user_sessions(
        &self,
        user_id: &str,
        limit: i64,
    ) -> Result<Vec<ChatSession>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM ai_sessions
            WHERE user_id = ?
            ORDER BY started_at DESC
            LIMIT ?
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(map_session).collect()
    }
}
