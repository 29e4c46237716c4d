// src/agent_client.rs
//! Client for the external language-model agent. The agent receives the
//! conversation history plus the new user text (and an optional correction)
//! and answers with a reply, zero or more tool results, and zero or more
//! proposed actions. It may stream intermediate "thinking" events before the
//! final payload.

use async_trait::async_trait;
use backoff::{future::retry, ExponentialBackoff};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::command_center::types::{ProposedAction, ThinkingStep, ToolResult};

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("agente indisponível: {0}")]
    Unavailable(String),
    #[error("resposta inválida do agente: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentTurn {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentRequest {
    pub history: Vec<AgentTurn>,
    pub user_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correction: Option<String>,
    pub escritorio_id: i32,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgentReply {
    pub reply_text: String,
    #[serde(default)]
    pub tool_results: Vec<ToolResult>,
    #[serde(default)]
    pub proposed_actions: Vec<ProposedAction>,
}

/// Wire events on the agent's NDJSON response stream
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum AgentStreamEvent {
    Thinking { text: String },
    Final { reply: AgentReply },
    Error { message: String },
}

#[async_trait]
pub trait AgentBackend: Send + Sync {
    /// Run one turn. Thinking events are forwarded on `progress` while the
    /// call is outstanding; the channel closes when the turn completes.
    async fn run(
        &self,
        request: AgentRequest,
        progress: mpsc::UnboundedSender<ThinkingStep>,
    ) -> Result<AgentReply, AgentError>;
}

#[derive(Debug, Clone)]
pub struct HttpAgentClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpAgentClient {
    pub fn new(base_url: String, api_key: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(300))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        Self {
            client,
            base_url,
            api_key,
        }
    }

    /// Send the request, retrying transient transport failures with
    /// exponential backoff. Mutations are never retried anywhere in the
    /// pipeline; this only covers the read-only dispatch to the agent.
    async fn dispatch(&self, request: &AgentRequest) -> Result<reqwest::Response, AgentError> {
        let backoff_policy = ExponentialBackoff {
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(5),
            max_elapsed_time: Some(Duration::from_secs(20)),
            ..Default::default()
        };

        retry(backoff_policy, || async {
            let mut req = self
                .client
                .post(format!("{}/v1/run", self.base_url))
                .json(request);

            if let Some(ref key) = self.api_key {
                req = req.bearer_auth(key);
            }

            let response = req.send().await.map_err(|e| {
                if e.is_connect() || e.is_timeout() {
                    backoff::Error::transient(AgentError::Unavailable(e.to_string()))
                } else {
                    backoff::Error::permanent(AgentError::Unavailable(e.to_string()))
                }
            })?;

            if response.status().is_server_error() {
                return Err(backoff::Error::transient(AgentError::Unavailable(format!(
                    "status {}",
                    response.status()
                ))));
            }
            if !response.status().is_success() {
                return Err(backoff::Error::permanent(AgentError::Unavailable(format!(
                    "status {}",
                    response.status()
                ))));
            }

            Ok(response)
        })
        .await
    }
}

#[async_trait]
impl AgentBackend for HttpAgentClient {
    async fn run(
        &self,
        request: AgentRequest,
        progress: mpsc::UnboundedSender<ThinkingStep>,
    ) -> Result<AgentReply, AgentError> {
        let mut response = self.dispatch(&request).await?;

        // The body is NDJSON: thinking events followed by exactly one
        // final/error event.
        let mut buffer = String::new();
        let mut reply: Option<AgentReply> = None;

        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| AgentError::Unavailable(e.to_string()))?
        {
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(newline) = buffer.find('\n') {
                let line: String = buffer.drain(..=newline).collect();
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                let event: AgentStreamEvent = serde_json::from_str(line)
                    .map_err(|e| AgentError::InvalidResponse(e.to_string()))?;

                match event {
                    AgentStreamEvent::Thinking { text } => {
                        // A dropped receiver just means nobody is watching
                        let _ = progress.send(ThinkingStep::new(text));
                    }
                    AgentStreamEvent::Final { reply: payload } => {
                        reply = Some(payload);
                    }
                    AgentStreamEvent::Error { message } => {
                        return Err(AgentError::Unavailable(message));
                    }
                }
            }
        }

        reply.ok_or_else(|| {
            AgentError::InvalidResponse("stream terminou sem payload final".to_string())
        })
    }
}
