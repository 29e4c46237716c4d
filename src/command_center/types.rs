// src/command_center/types.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A loosely-typed row/record as it flows through the pipeline: column name → value.
/// Table shapes are arbitrary; the renderer and the data-store adapter interpret them.
pub type Record = serde_json::Map<String, Value>;

/// Role of a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
        }
    }

    pub fn from_str(role: &str) -> Self {
        match role {
            "assistant" => MessageRole::Assistant,
            "system" => MessageRole::System,
            _ => MessageRole::User,
        }
    }
}

/// Marker stored on a placeholder message whose agent reply was discarded
/// (session switched or chat cleared while the request was in flight).
pub const CANCELLED_MARKER: &str = "cancelado";

/// One turn in a conversation. Immutable once resolved, except for the
/// write-once feedback metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub uuid: String,
    pub role: MessageRole,
    /// None while the assistant turn is still streaming
    pub content: Option<String>,
    pub error: Option<String>,
    pub tool_results: Vec<ToolResult>,
    pub feedback: Option<FeedbackRecord>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// A placeholder that was never resolved to content, an error, or a
    /// cancellation marker.
    pub fn is_loading(&self) -> bool {
        self.content.is_none() && self.error.is_none()
    }

    pub fn is_cancelled(&self) -> bool {
        self.error.as_deref() == Some(CANCELLED_MARKER)
    }
}

/// A named conversation scoped to one user/tenant. At most one session is
/// active per user at a time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub uuid: String,
    pub titulo: String,
    pub ativa: bool,
    pub created_at: DateTime<Utc>,
}

/// Outcome of an agent-invoked read operation, rendered as a table in the
/// conversation. Immutable; attached to the message that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Source query/table the rows came from (e.g. "clientes")
    pub source: String,
    pub rows: Vec<Record>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Insert,
    Update,
    Delete,
}

/// Kind-specific payload of a proposed mutation. The tagged union guarantees
/// exactly one of dados / (antes, depois) / registro is populated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ActionPayload {
    Insert { dados: Record },
    Update { antes: Record, depois: Record },
    Delete { registro: Record },
}

impl ActionPayload {
    pub fn kind(&self) -> ActionKind {
        match self {
            ActionPayload::Insert { .. } => ActionKind::Insert,
            ActionPayload::Update { .. } => ActionKind::Update,
            ActionPayload::Delete { .. } => ActionKind::Delete,
        }
    }
}

/// A mutation proposed by the agent, before it is staged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposedAction {
    pub table: String,
    pub explanation: String,
    #[serde(flatten)]
    pub payload: ActionPayload,
}

/// A staged, not-yet-applied mutation awaiting user confirmation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingAction {
    pub id: String,
    pub table: String,
    pub explanation: String,
    #[serde(flatten)]
    pub payload: ActionPayload,
    pub proposed_at: DateTime<Utc>,
}

impl PendingAction {
    pub fn kind(&self) -> ActionKind {
        self.payload.kind()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackKind {
    #[serde(rename = "positivo")]
    Positive,
    #[serde(rename = "negativo")]
    Negative,
    #[serde(rename = "correcao")]
    Correction,
}

impl FeedbackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackKind::Positive => "positivo",
            FeedbackKind::Negative => "negativo",
            FeedbackKind::Correction => "correcao",
        }
    }

    pub fn from_str(kind: &str) -> Option<Self> {
        match kind {
            "positivo" => Some(FeedbackKind::Positive),
            "negativo" => Some(FeedbackKind::Negative),
            "correcao" => Some(FeedbackKind::Correction),
            _ => None,
        }
    }
}

/// Write-once feedback attached to an assistant message. The first submission
/// wins; later writers get a conflict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub kind: FeedbackKind,
    pub correction: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// An ephemeral progress indicator emitted while the agent composes a reply.
/// Never persisted as a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThinkingStep {
    pub text: String,
    pub at: DateTime<Utc>,
}

impl ThinkingStep {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            at: Utc::now(),
        }
    }
}

/// Lifecycle of one in-flight user turn, kept apart from the persisted
/// message so streaming state cannot leak into stored history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "phase", rename_all = "lowercase")]
pub enum TurnPhase {
    Pending,
    Streaming { steps: Vec<ThinkingStep> },
    Done,
    Failed { error: String },
    Cancelled,
}

/// Events pushed to the UI layer over the WebSocket.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommandEvent {
    Thinking {
        step: ThinkingStep,
    },
    MessageAppended {
        session_uuid: String,
        message: Message,
    },
    MessageResolved {
        session_uuid: String,
        message: Message,
        /// One rendered table per tool result, in order
        views: Vec<crate::command_center::renderer::TableView>,
    },
    ActionPresented {
        action: PendingAction,
        changes: Vec<crate::command_center::stager::FieldChange>,
    },
    ActionResolved {
        action_id: String,
        outcome: String,
        error: Option<String>,
    },
    Error {
        message: String,
    },
}
