// src/models/chat.rs
use serde::{Deserialize, Serialize};

use crate::command_center::renderer::{render, TableView};
use crate::command_center::types::{Message, Session};

/// Session list entry for the history panel
#[derive(Debug, Serialize)]
pub struct SessionSummary {
    pub session_uuid: String,
    pub titulo: String,
    pub ativa: bool,
    pub criada: String,
}

impl SessionSummary {
    pub fn from_session(session: &Session) -> Self {
        Self {
            session_uuid: session.uuid.clone(),
            titulo: session.titulo.clone(),
            ativa: session.ativa,
            criada: format_relative_time(&session.created_at),
        }
    }
}

/// A message plus the rendered table for each of its tool results
#[derive(Debug, Serialize)]
pub struct RenderedMessage {
    #[serde(flatten)]
    pub message: Message,
    pub views: Vec<TableView>,
}

impl RenderedMessage {
    pub fn from_message(message: Message) -> Self {
        let views = message
            .tool_results
            .iter()
            .map(|result| render(&result.rows))
            .collect();
        Self { message, views }
    }
}

#[derive(Debug, Serialize)]
pub struct TranscriptResponse {
    pub session_uuid: String,
    pub messages: Vec<RenderedMessage>,
}

#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    pub message_uuid: String,
    /// "positivo" | "correcao"
    pub kind: String,
}

#[derive(Debug, Deserialize)]
pub struct CorrectionRequest {
    pub message_uuid: String,
    pub texto: String,
}

/// Human-readable relative timestamps for the session history panel
pub fn format_relative_time(timestamp: &chrono::DateTime<chrono::Utc>) -> String {
    let now = chrono::Utc::now();
    let duration = now.signed_duration_since(*timestamp);

    if duration.num_seconds() < 60 {
        "agora mesmo".to_string()
    } else if duration.num_minutes() < 60 {
        let mins = duration.num_minutes();
        if mins == 1 {
            "há 1 minuto".to_string()
        } else {
            format!("há {} minutos", mins)
        }
    } else if duration.num_hours() < 24 {
        let hours = duration.num_hours();
        if hours == 1 {
            "há 1 hora".to_string()
        } else {
            format!("há {} horas", hours)
        }
    } else if duration.num_days() < 30 {
        let days = duration.num_days();
        if days == 1 {
            "há 1 dia".to_string()
        } else {
            format!("há {} dias", days)
        }
    } else {
        timestamp.format("%d/%m/%Y").to_string()
    }
}
