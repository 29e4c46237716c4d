// src/command_center/test_support.rs
//! In-memory fakes shared by the pipeline tests: a session store mirroring
//! the Postgres semantics (active-pointer re-check, unresolved-only message
//! resolution, write-once feedback), a scriptable agent and a recording data
//! store. No database or network needed to exercise the concurrency rules.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::agent_client::{AgentBackend, AgentError, AgentReply, AgentRequest};
use crate::data_store::{DataStore, StoreError};
use crate::models::auth::TenantContext;

use super::orchestrator::CommandCenter;
use super::session_store::{MessageResolution, NewMessage, SessionError, SessionStore};
use super::types::{
    FeedbackRecord, Message, MessageRole, ProposedAction, Record, Session, ThinkingStep,
    ToolResult, CANCELLED_MARKER,
};

pub fn ctx() -> TenantContext {
    TenantContext {
        user_id: 1,
        escritorio_id: 7,
    }
}

// ----- session store -----

#[derive(Debug, Clone)]
struct StoredSession {
    uuid: String,
    escritorio_id: i32,
    user_id: i32,
    titulo: String,
    ativa: bool,
    created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone)]
struct StoredMessage {
    uuid: String,
    session_uuid: String,
    escritorio_id: i32,
    user_id: i32,
    seq: u64,
    role: MessageRole,
    content: Option<String>,
    error: Option<String>,
    tool_results: Vec<ToolResult>,
    feedback: Option<FeedbackRecord>,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl StoredMessage {
    fn to_message(&self) -> Message {
        Message {
            uuid: self.uuid.clone(),
            role: self.role,
            content: self.content.clone(),
            error: self.error.clone(),
            tool_results: self.tool_results.clone(),
            feedback: self.feedback.clone(),
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Default)]
struct MemoryInner {
    sessions: Vec<StoredSession>,
    messages: Vec<StoredMessage>,
    next_seq: u64,
}

#[derive(Debug, Default)]
pub struct MemorySessionStore {
    inner: Mutex<MemoryInner>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn active_session(&self, ctx: &TenantContext) -> Result<Option<Session>, SessionError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .sessions
            .iter()
            .find(|s| s.escritorio_id == ctx.escritorio_id && s.user_id == ctx.user_id && s.ativa)
            .map(|s| Session {
                uuid: s.uuid.clone(),
                titulo: s.titulo.clone(),
                ativa: true,
                created_at: s.created_at,
            }))
    }

    async fn create_session(
        &self,
        ctx: &TenantContext,
        titulo: &str,
    ) -> Result<Session, SessionError> {
        let mut inner = self.inner.lock().unwrap();
        for session in inner.sessions.iter_mut() {
            if session.escritorio_id == ctx.escritorio_id && session.user_id == ctx.user_id {
                session.ativa = false;
            }
        }
        let session = StoredSession {
            uuid: Uuid::new_v4().to_string(),
            escritorio_id: ctx.escritorio_id,
            user_id: ctx.user_id,
            titulo: titulo.to_string(),
            ativa: true,
            created_at: Utc::now(),
        };
        inner.sessions.push(session.clone());
        Ok(Session {
            uuid: session.uuid,
            titulo: session.titulo,
            ativa: true,
            created_at: session.created_at,
        })
    }

    async fn switch_session(
        &self,
        ctx: &TenantContext,
        session_uuid: &str,
    ) -> Result<Session, SessionError> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.sessions.iter().any(|s| {
            s.uuid == session_uuid
                && s.escritorio_id == ctx.escritorio_id
                && s.user_id == ctx.user_id
        }) {
            return Err(SessionError::SessionNotFound);
        }
        for session in inner.sessions.iter_mut() {
            if session.escritorio_id == ctx.escritorio_id && session.user_id == ctx.user_id {
                session.ativa = session.uuid == session_uuid;
            }
        }
        let session = inner
            .sessions
            .iter()
            .find(|s| s.uuid == session_uuid)
            .expect("session checked above");
        Ok(Session {
            uuid: session.uuid.clone(),
            titulo: session.titulo.clone(),
            ativa: true,
            created_at: session.created_at,
        })
    }

    async fn deactivate_active(&self, ctx: &TenantContext) -> Result<(), SessionError> {
        let mut inner = self.inner.lock().unwrap();
        for session in inner.sessions.iter_mut() {
            if session.escritorio_id == ctx.escritorio_id && session.user_id == ctx.user_id {
                session.ativa = false;
            }
        }
        Ok(())
    }

    async fn list_sessions(&self, ctx: &TenantContext) -> Result<Vec<Session>, SessionError> {
        let inner = self.inner.lock().unwrap();
        let mut sessions: Vec<Session> = inner
            .sessions
            .iter()
            .filter(|s| s.escritorio_id == ctx.escritorio_id && s.user_id == ctx.user_id)
            .map(|s| Session {
                uuid: s.uuid.clone(),
                titulo: s.titulo.clone(),
                ativa: s.ativa,
                created_at: s.created_at,
            })
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }

    async fn messages(
        &self,
        ctx: &TenantContext,
        session_uuid: &str,
    ) -> Result<Vec<Message>, SessionError> {
        let inner = self.inner.lock().unwrap();
        let mut messages: Vec<&StoredMessage> = inner
            .messages
            .iter()
            .filter(|m| {
                m.session_uuid == session_uuid
                    && m.escritorio_id == ctx.escritorio_id
                    && m.user_id == ctx.user_id
            })
            .collect();
        messages.sort_by_key(|m| m.seq);
        Ok(messages.into_iter().map(|m| m.to_message()).collect())
    }

    async fn append_message(
        &self,
        ctx: &TenantContext,
        session_uuid: &str,
        message: NewMessage,
    ) -> Result<Message, SessionError> {
        let mut inner = self.inner.lock().unwrap();
        // same re-check as the SQL INSERT..SELECT: the target must still be
        // the active session at write time
        let is_active = inner.sessions.iter().any(|s| {
            s.uuid == session_uuid
                && s.escritorio_id == ctx.escritorio_id
                && s.user_id == ctx.user_id
                && s.ativa
        });
        if !is_active {
            return Err(SessionError::SessionNotActive);
        }

        inner.next_seq += 1;
        let stored = StoredMessage {
            uuid: Uuid::new_v4().to_string(),
            session_uuid: session_uuid.to_string(),
            escritorio_id: ctx.escritorio_id,
            user_id: ctx.user_id,
            seq: inner.next_seq,
            role: message.role,
            content: message.content,
            error: None,
            tool_results: Vec::new(),
            feedback: None,
            created_at: Utc::now(),
        };
        let result = stored.to_message();
        inner.messages.push(stored);
        Ok(result)
    }

    async fn resolve_message(
        &self,
        ctx: &TenantContext,
        message_uuid: &str,
        resolution: MessageResolution,
    ) -> Result<bool, SessionError> {
        let mut inner = self.inner.lock().unwrap();
        let message = inner.messages.iter_mut().find(|m| {
            m.uuid == message_uuid
                && m.escritorio_id == ctx.escritorio_id
                && m.user_id == ctx.user_id
        });
        let message = match message {
            Some(m) => m,
            None => return Ok(false),
        };
        if message.content.is_some() || message.error.is_some() {
            return Ok(false);
        }
        match resolution {
            MessageResolution::Reply {
                content,
                tool_results,
            } => {
                message.content = Some(content);
                message.tool_results = tool_results;
            }
            MessageResolution::Failed { error } => message.error = Some(error),
            MessageResolution::Cancelled => message.error = Some(CANCELLED_MARKER.to_string()),
        }
        Ok(true)
    }

    async fn message(
        &self,
        ctx: &TenantContext,
        message_uuid: &str,
    ) -> Result<Message, SessionError> {
        let inner = self.inner.lock().unwrap();
        inner
            .messages
            .iter()
            .find(|m| {
                m.uuid == message_uuid
                    && m.escritorio_id == ctx.escritorio_id
                    && m.user_id == ctx.user_id
            })
            .map(|m| m.to_message())
            .ok_or(SessionError::MessageNotFound)
    }

    async fn set_feedback(
        &self,
        ctx: &TenantContext,
        message_uuid: &str,
        record: FeedbackRecord,
    ) -> Result<(), SessionError> {
        let mut inner = self.inner.lock().unwrap();
        let message = inner
            .messages
            .iter_mut()
            .find(|m| {
                m.uuid == message_uuid
                    && m.escritorio_id == ctx.escritorio_id
                    && m.user_id == ctx.user_id
            })
            .ok_or(SessionError::MessageNotFound)?;
        if message.role != MessageRole::Assistant {
            return Err(SessionError::MessageNotFound);
        }
        if message.feedback.is_some() {
            return Err(SessionError::FeedbackConflict);
        }
        message.feedback = Some(record);
        Ok(())
    }

    async fn preceding_user_message(
        &self,
        ctx: &TenantContext,
        assistant_uuid: &str,
    ) -> Result<Option<Message>, SessionError> {
        let inner = self.inner.lock().unwrap();
        let assistant = inner
            .messages
            .iter()
            .find(|m| {
                m.uuid == assistant_uuid
                    && m.escritorio_id == ctx.escritorio_id
                    && m.user_id == ctx.user_id
            })
            .ok_or(SessionError::MessageNotFound)?;

        Ok(inner
            .messages
            .iter()
            .filter(|m| {
                m.session_uuid == assistant.session_uuid
                    && m.role == MessageRole::User
                    && m.seq < assistant.seq
            })
            .max_by_key(|m| m.seq)
            .map(|m| m.to_message()))
    }
}

// ----- agent -----

/// One scripted agent turn. A `gate` keeps the reply pending until the test
/// fires it, which is how out-of-order resolution is simulated.
pub struct MockTurn {
    pub thinking: Vec<String>,
    pub gate: Option<oneshot::Receiver<()>>,
    pub result: Result<AgentReply, AgentError>,
}

impl MockTurn {
    pub fn reply(text: &str) -> Self {
        Self {
            thinking: Vec::new(),
            gate: None,
            result: Ok(AgentReply {
                reply_text: text.to_string(),
                tool_results: Vec::new(),
                proposed_actions: Vec::new(),
            }),
        }
    }

    pub fn with_thinking(mut self, steps: &[&str]) -> Self {
        self.thinking = steps.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_actions(mut self, actions: Vec<ProposedAction>) -> Self {
        if let Ok(ref mut reply) = self.result {
            reply.proposed_actions = actions;
        }
        self
    }

    pub fn with_tool_results(mut self, results: Vec<ToolResult>) -> Self {
        if let Ok(ref mut reply) = self.result {
            reply.tool_results = results;
        }
        self
    }

    pub fn failing(message: &str) -> Self {
        Self {
            thinking: Vec::new(),
            gate: None,
            result: Err(AgentError::Unavailable(message.to_string())),
        }
    }

    /// Hold the reply until the returned sender fires.
    pub fn gated(mut self) -> (Self, oneshot::Sender<()>) {
        let (tx, rx) = oneshot::channel();
        self.gate = Some(rx);
        (self, tx)
    }
}

#[derive(Default)]
pub struct MockAgent {
    script: Mutex<VecDeque<MockTurn>>,
    pub requests: Mutex<Vec<AgentRequest>>,
}

impl MockAgent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, turn: MockTurn) {
        self.script.lock().unwrap().push_back(turn);
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl AgentBackend for MockAgent {
    async fn run(
        &self,
        request: AgentRequest,
        progress: mpsc::UnboundedSender<ThinkingStep>,
    ) -> Result<AgentReply, AgentError> {
        self.requests.lock().unwrap().push(request);

        let turn = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| MockTurn::reply("ok"));

        for step in &turn.thinking {
            let _ = progress.send(ThinkingStep::new(step.clone()));
        }

        if let Some(gate) = turn.gate {
            let _ = gate.await;
        }

        turn.result
    }
}

// ----- data store -----

#[derive(Debug, Clone, PartialEq)]
pub enum StoreCall {
    Insert { table: String },
    Update { table: String, id: String },
    Delete { table: String, id: String },
}

#[derive(Default)]
pub struct RecordingDataStore {
    pub calls: Mutex<Vec<StoreCall>>,
    fail_next: Mutex<Option<StoreError>>,
}

impl RecordingDataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, error: StoreError) {
        *self.fail_next.lock().unwrap() = Some(error);
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn take_failure(&self) -> Option<StoreError> {
        self.fail_next.lock().unwrap().take()
    }
}

#[async_trait]
impl DataStore for RecordingDataStore {
    async fn insert(
        &self,
        _ctx: &TenantContext,
        table: &str,
        _dados: &Record,
    ) -> Result<(), StoreError> {
        self.calls.lock().unwrap().push(StoreCall::Insert {
            table: table.to_string(),
        });
        match self.take_failure() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn update(
        &self,
        _ctx: &TenantContext,
        table: &str,
        record_id: &str,
        _changes: &Record,
    ) -> Result<(), StoreError> {
        self.calls.lock().unwrap().push(StoreCall::Update {
            table: table.to_string(),
            id: record_id.to_string(),
        });
        match self.take_failure() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn delete(
        &self,
        _ctx: &TenantContext,
        table: &str,
        record_id: &str,
    ) -> Result<(), StoreError> {
        self.calls.lock().unwrap().push(StoreCall::Delete {
            table: table.to_string(),
            id: record_id.to_string(),
        });
        match self.take_failure() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

// ----- wiring -----

pub struct TestHarness {
    pub center: Arc<CommandCenter>,
    pub sessions: Arc<MemorySessionStore>,
    pub agent: Arc<MockAgent>,
    pub store: Arc<RecordingDataStore>,
}

pub fn harness() -> TestHarness {
    let sessions = Arc::new(MemorySessionStore::new());
    let agent = Arc::new(MockAgent::new());
    let store = Arc::new(RecordingDataStore::new());
    let center = Arc::new(CommandCenter::new(
        sessions.clone(),
        agent.clone(),
        store.clone(),
    ));
    TestHarness {
        center,
        sessions,
        agent,
        store,
    }
}
