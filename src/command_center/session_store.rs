// src/command_center/session_store.rs
//! Conversation persistence, scoped per tenant/user. Sessions own an ordered
//! message history; at most one session is active per user, and appends
//! re-check the active pointer so a late write can never land in a session
//! the user already left.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use crate::models::auth::TenantContext;

use super::types::{
    FeedbackKind, FeedbackRecord, Message, MessageRole, Session, ToolResult, CANCELLED_MARKER,
};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("sessão não encontrada")]
    SessionNotFound,
    #[error("mensagem não encontrada")]
    MessageNotFound,
    #[error("a sessão não está mais ativa")]
    SessionNotActive,
    #[error("feedback já registrado para esta mensagem")]
    FeedbackConflict,
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A message about to be appended; the store assigns uuid and timestamp.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub role: MessageRole,
    pub content: Option<String>,
}

impl NewMessage {
    pub fn user(text: &str) -> Self {
        Self {
            role: MessageRole::User,
            content: Some(text.to_string()),
        }
    }

    pub fn assistant(text: &str) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: Some(text.to_string()),
        }
    }

    /// Placeholder for a streaming assistant turn; resolved later.
    pub fn assistant_placeholder() -> Self {
        Self {
            role: MessageRole::Assistant,
            content: None,
        }
    }
}

/// Terminal state applied to a loading placeholder. Only unresolved
/// placeholders accept a resolution; applying one twice is a no-op.
#[derive(Debug, Clone)]
pub enum MessageResolution {
    Reply {
        content: String,
        tool_results: Vec<ToolResult>,
    },
    Failed {
        error: String,
    },
    Cancelled,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn active_session(&self, ctx: &TenantContext) -> Result<Option<Session>, SessionError>;

    /// Create a session and make it the active one for this user.
    async fn create_session(
        &self,
        ctx: &TenantContext,
        titulo: &str,
    ) -> Result<Session, SessionError>;

    /// Atomically move the active pointer to another session.
    async fn switch_session(
        &self,
        ctx: &TenantContext,
        session_uuid: &str,
    ) -> Result<Session, SessionError>;

    /// Leave the user with no active session (chat cleared). The session
    /// itself is kept for history; the pipeline never hard-deletes.
    async fn deactivate_active(&self, ctx: &TenantContext) -> Result<(), SessionError>;

    /// Sessions for the history panel, most recent first.
    async fn list_sessions(&self, ctx: &TenantContext) -> Result<Vec<Session>, SessionError>;

    /// Ordered transcript of one session.
    async fn messages(
        &self,
        ctx: &TenantContext,
        session_uuid: &str,
    ) -> Result<Vec<Message>, SessionError>;

    /// Append to a session, re-checking that it is still the active one at
    /// write time. Fails with [`SessionError::SessionNotActive`] otherwise.
    async fn append_message(
        &self,
        ctx: &TenantContext,
        session_uuid: &str,
        message: NewMessage,
    ) -> Result<Message, SessionError>;

    /// Resolve a loading placeholder. Returns false when the message was
    /// already resolved (e.g. cancelled before the reply arrived).
    async fn resolve_message(
        &self,
        ctx: &TenantContext,
        message_uuid: &str,
        resolution: MessageResolution,
    ) -> Result<bool, SessionError>;

    async fn message(
        &self,
        ctx: &TenantContext,
        message_uuid: &str,
    ) -> Result<Message, SessionError>;

    /// Write-once feedback; the conditional write serializes concurrent
    /// submissions so the first one wins.
    async fn set_feedback(
        &self,
        ctx: &TenantContext,
        message_uuid: &str,
        record: FeedbackRecord,
    ) -> Result<(), SessionError>;

    /// The user message that produced a given assistant message, used by the
    /// correction-retry flow to resubmit the original request.
    async fn preceding_user_message(
        &self,
        ctx: &TenantContext,
        assistant_uuid: &str,
    ) -> Result<Option<Message>, SessionError>;
}

/// Postgres-backed store over `command_sessions` / `command_messages`.
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

type MessageRow = (
    String,                 // message_uuid
    String,                 // role
    Option<String>,         // content
    Option<String>,         // error
    Option<Value>,          // tool_results
    Option<String>,         // feedback_kind
    Option<String>,         // feedback_correction
    Option<DateTime<Utc>>,  // feedback_at
    DateTime<Utc>,          // created_at
);

fn message_from_row(row: MessageRow) -> Result<Message, SessionError> {
    let (uuid, role, content, error, tool_results, feedback_kind, feedback_correction, feedback_at, created_at) =
        row;

    let tool_results: Vec<ToolResult> = match tool_results {
        Some(value) => serde_json::from_value(value)?,
        None => Vec::new(),
    };

    let feedback = match feedback_kind.as_deref().and_then(FeedbackKind::from_str) {
        Some(kind) => Some(FeedbackRecord {
            kind,
            correction: feedback_correction,
            created_at: feedback_at.unwrap_or(created_at),
        }),
        None => None,
    };

    Ok(Message {
        uuid,
        role: MessageRole::from_str(&role),
        content,
        error,
        tool_results,
        feedback,
        created_at,
    })
}

const MESSAGE_COLUMNS: &str = "m.message_uuid, m.role, m.content, m.error, m.tool_results, \
     m.feedback_kind, m.feedback_correction, m.feedback_at, m.created_at";

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn active_session(&self, ctx: &TenantContext) -> Result<Option<Session>, SessionError> {
        let row = sqlx::query_as::<_, (String, String, bool, DateTime<Utc>)>(
            "SELECT session_uuid, titulo, ativa, created_at
             FROM command_sessions
             WHERE escritorio_id = $1 AND user_id = $2 AND ativa = true",
        )
        .bind(ctx.escritorio_id)
        .bind(ctx.user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(uuid, titulo, ativa, created_at)| Session {
            uuid,
            titulo,
            ativa,
            created_at,
        }))
    }

    async fn create_session(
        &self,
        ctx: &TenantContext,
        titulo: &str,
    ) -> Result<Session, SessionError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "UPDATE command_sessions SET ativa = false
             WHERE escritorio_id = $1 AND user_id = $2 AND ativa = true",
        )
        .bind(ctx.escritorio_id)
        .bind(ctx.user_id)
        .execute(&mut *tx)
        .await?;

        let session_uuid = Uuid::new_v4().to_string();
        let (created_at,) = sqlx::query_as::<_, (DateTime<Utc>,)>(
            "INSERT INTO command_sessions (session_uuid, escritorio_id, user_id, titulo, ativa)
             VALUES ($1, $2, $3, $4, true)
             RETURNING created_at",
        )
        .bind(&session_uuid)
        .bind(ctx.escritorio_id)
        .bind(ctx.user_id)
        .bind(titulo)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::debug!("💬 Created command session {} for user {}", session_uuid, ctx.user_id);

        Ok(Session {
            uuid: session_uuid,
            titulo: titulo.to_string(),
            ativa: true,
            created_at,
        })
    }

    async fn switch_session(
        &self,
        ctx: &TenantContext,
        session_uuid: &str,
    ) -> Result<Session, SessionError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "UPDATE command_sessions SET ativa = false
             WHERE escritorio_id = $1 AND user_id = $2 AND ativa = true",
        )
        .bind(ctx.escritorio_id)
        .bind(ctx.user_id)
        .execute(&mut *tx)
        .await?;

        let row = sqlx::query_as::<_, (String, bool, DateTime<Utc>)>(
            "UPDATE command_sessions SET ativa = true
             WHERE session_uuid = $1 AND escritorio_id = $2 AND user_id = $3
             RETURNING titulo, ativa, created_at",
        )
        .bind(session_uuid)
        .bind(ctx.escritorio_id)
        .bind(ctx.user_id)
        .fetch_optional(&mut *tx)
        .await?;

        let (titulo, ativa, created_at) = match row {
            Some(row) => row,
            None => return Err(SessionError::SessionNotFound),
        };

        tx.commit().await?;

        Ok(Session {
            uuid: session_uuid.to_string(),
            titulo,
            ativa,
            created_at,
        })
    }

    async fn deactivate_active(&self, ctx: &TenantContext) -> Result<(), SessionError> {
        sqlx::query(
            "UPDATE command_sessions SET ativa = false
             WHERE escritorio_id = $1 AND user_id = $2 AND ativa = true",
        )
        .bind(ctx.escritorio_id)
        .bind(ctx.user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_sessions(&self, ctx: &TenantContext) -> Result<Vec<Session>, SessionError> {
        let rows = sqlx::query_as::<_, (String, String, bool, DateTime<Utc>)>(
            "SELECT session_uuid, titulo, ativa, created_at
             FROM command_sessions
             WHERE escritorio_id = $1 AND user_id = $2
             ORDER BY created_at DESC",
        )
        .bind(ctx.escritorio_id)
        .bind(ctx.user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(uuid, titulo, ativa, created_at)| Session {
                uuid,
                titulo,
                ativa,
                created_at,
            })
            .collect())
    }

    async fn messages(
        &self,
        ctx: &TenantContext,
        session_uuid: &str,
    ) -> Result<Vec<Message>, SessionError> {
        let rows = sqlx::query_as::<_, MessageRow>(&format!(
            "SELECT {MESSAGE_COLUMNS}
             FROM command_messages m
             JOIN command_sessions s ON s.id = m.session_id
             WHERE s.session_uuid = $1 AND s.escritorio_id = $2 AND s.user_id = $3
             ORDER BY m.id ASC"
        ))
        .bind(session_uuid)
        .bind(ctx.escritorio_id)
        .bind(ctx.user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(message_from_row).collect()
    }

    async fn append_message(
        &self,
        ctx: &TenantContext,
        session_uuid: &str,
        message: NewMessage,
    ) -> Result<Message, SessionError> {
        let message_uuid = Uuid::new_v4().to_string();

        // The INSERT..SELECT re-checks the active flag in the same statement,
        // so a session switched out from under an in-flight turn rejects the
        // append instead of corrupting another session's history.
        let row = sqlx::query_as::<_, (DateTime<Utc>,)>(
            "INSERT INTO command_messages (message_uuid, session_id, role, content)
             SELECT $1, s.id, $2, $3
             FROM command_sessions s
             WHERE s.session_uuid = $4 AND s.escritorio_id = $5 AND s.user_id = $6
               AND s.ativa = true
             RETURNING created_at",
        )
        .bind(&message_uuid)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(session_uuid)
        .bind(ctx.escritorio_id)
        .bind(ctx.user_id)
        .fetch_optional(&self.pool)
        .await?;

        let (created_at,) = match row {
            Some(row) => row,
            None => return Err(SessionError::SessionNotActive),
        };

        Ok(Message {
            uuid: message_uuid,
            role: message.role,
            content: message.content,
            error: None,
            tool_results: Vec::new(),
            feedback: None,
            created_at,
        })
    }

    async fn resolve_message(
        &self,
        ctx: &TenantContext,
        message_uuid: &str,
        resolution: MessageResolution,
    ) -> Result<bool, SessionError> {
        let (content, error, tool_results) = match resolution {
            MessageResolution::Reply {
                content,
                tool_results,
            } => {
                let results = if tool_results.is_empty() {
                    None
                } else {
                    Some(serde_json::to_value(&tool_results)?)
                };
                (Some(content), None, results)
            }
            MessageResolution::Failed { error } => (None, Some(error), None),
            MessageResolution::Cancelled => (None, Some(CANCELLED_MARKER.to_string()), None),
        };

        let result = sqlx::query(
            "UPDATE command_messages m
             SET content = $1, error = $2, tool_results = $3
             FROM command_sessions s
             WHERE s.id = m.session_id
               AND m.message_uuid = $4 AND s.escritorio_id = $5 AND s.user_id = $6
               AND m.content IS NULL AND m.error IS NULL",
        )
        .bind(content)
        .bind(error)
        .bind(tool_results)
        .bind(message_uuid)
        .bind(ctx.escritorio_id)
        .bind(ctx.user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn message(
        &self,
        ctx: &TenantContext,
        message_uuid: &str,
    ) -> Result<Message, SessionError> {
        let row = sqlx::query_as::<_, MessageRow>(&format!(
            "SELECT {MESSAGE_COLUMNS}
             FROM command_messages m
             JOIN command_sessions s ON s.id = m.session_id
             WHERE m.message_uuid = $1 AND s.escritorio_id = $2 AND s.user_id = $3"
        ))
        .bind(message_uuid)
        .bind(ctx.escritorio_id)
        .bind(ctx.user_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => message_from_row(row),
            None => Err(SessionError::MessageNotFound),
        }
    }

    async fn set_feedback(
        &self,
        ctx: &TenantContext,
        message_uuid: &str,
        record: FeedbackRecord,
    ) -> Result<(), SessionError> {
        // Conditional write: only the first submission finds feedback_kind
        // NULL, so concurrent writers serialize at the database.
        let result = sqlx::query(
            "UPDATE command_messages m
             SET feedback_kind = $1, feedback_correction = $2, feedback_at = NOW()
             FROM command_sessions s
             WHERE s.id = m.session_id
               AND m.message_uuid = $3 AND s.escritorio_id = $4 AND s.user_id = $5
               AND m.role = 'assistant' AND m.feedback_kind IS NULL",
        )
        .bind(record.kind.as_str())
        .bind(&record.correction)
        .bind(message_uuid)
        .bind(ctx.escritorio_id)
        .bind(ctx.user_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(());
        }

        // Distinguish "already recorded" from "no such message"
        match self.message(ctx, message_uuid).await {
            Ok(_) => Err(SessionError::FeedbackConflict),
            Err(SessionError::MessageNotFound) => Err(SessionError::MessageNotFound),
            Err(other) => Err(other),
        }
    }

    async fn preceding_user_message(
        &self,
        ctx: &TenantContext,
        assistant_uuid: &str,
    ) -> Result<Option<Message>, SessionError> {
        let row = sqlx::query_as::<_, MessageRow>(&format!(
            "SELECT {MESSAGE_COLUMNS}
             FROM command_messages m
             JOIN command_sessions s ON s.id = m.session_id
             JOIN command_messages a ON a.session_id = m.session_id
             WHERE a.message_uuid = $1 AND s.escritorio_id = $2 AND s.user_id = $3
               AND m.role = 'user' AND m.id < a.id
             ORDER BY m.id DESC
             LIMIT 1"
        ))
        .bind(assistant_uuid)
        .bind(ctx.escritorio_id)
        .bind(ctx.user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(message_from_row).transpose()
    }
}
