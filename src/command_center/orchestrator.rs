// src/command_center/orchestrator.rs
//! Ties the pipeline together: accepts user turns, streams thinking progress,
//! dispatches the agent, stages proposed actions and appends outcomes to the
//! session store. One turn at a time per user; late replies from a context
//! the user already left are discarded, never appended out of place.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex, RwLock};
use thiserror::Error;

use crate::agent_client::{AgentBackend, AgentRequest, AgentTurn};
use crate::data_store::DataStore;
use crate::models::auth::TenantContext;

use super::session_store::{
    MessageResolution, NewMessage, SessionError, SessionStore,
};
use super::stager::{preview_changes, ActionStager, FieldChange};
use super::types::{
    CommandEvent, Message, MessageRole, PendingAction, Session, ThinkingStep, TurnPhase,
};

const TITLE_BUDGET: usize = 48;

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("já existe uma solicitação em andamento nesta conversa")]
    TurnInFlight,
    #[error("nenhuma ação pendente com esse identificador")]
    NoSuchAction,
    #[error("a exclusão exige a dupla confirmação")]
    DoubleConfirmationRequired,
    #[error("feedback já registrado para esta mensagem")]
    FeedbackConflict,
    #[error("feedback negativo exige um texto de correção")]
    CorrectionRequired,
    #[error("mensagem não encontrada")]
    MessageNotFound,
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Result of one accepted user turn
#[derive(Debug)]
pub enum SendOutcome {
    /// The agent replied; `staged_actions` mutations joined the queue
    Replied {
        message: Message,
        staged_actions: usize,
    },
    /// The agent call failed; the error is recorded on the message
    Failed { message: Message },
    /// The reply arrived after its context was left and was discarded
    Discarded,
}

type ContextKey = (i32, i32);

fn context_key(ctx: &TenantContext) -> ContextKey {
    (ctx.escritorio_id, ctx.user_id)
}

/// The turn currently being answered for one user
#[derive(Debug)]
pub(crate) struct ActiveTurn {
    epoch: u64,
    session_uuid: String,
    placeholder_uuid: String,
    steps: Vec<ThinkingStep>,
}

/// Ephemeral per-user state: the in-flight turn, the staged-action queue and
/// the staleness epoch. Nothing here is persisted; the transcript lives in
/// the session store.
#[derive(Debug, Default)]
pub(crate) struct ConversationRuntime {
    pub(crate) epoch: u64,
    pub(crate) active_turn: Option<ActiveTurn>,
    pub(crate) stager: ActionStager,
}

pub struct CommandCenter {
    pub(crate) sessions: Arc<dyn SessionStore>,
    pub(crate) agent: Arc<dyn AgentBackend>,
    pub(crate) store: Arc<dyn DataStore>,
    runtimes: RwLock<HashMap<ContextKey, Arc<Mutex<ConversationRuntime>>>>,
    event_senders: RwLock<HashMap<ContextKey, mpsc::UnboundedSender<CommandEvent>>>,
}

impl CommandCenter {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        agent: Arc<dyn AgentBackend>,
        store: Arc<dyn DataStore>,
    ) -> Self {
        Self {
            sessions,
            agent,
            store,
            runtimes: RwLock::new(HashMap::new()),
            event_senders: RwLock::new(HashMap::new()),
        }
    }

    /// Register the channel that delivers live events (thinking steps,
    /// message updates, presented actions) to this user's WebSocket.
    pub async fn register_event_sender(
        &self,
        ctx: &TenantContext,
        sender: mpsc::UnboundedSender<CommandEvent>,
    ) {
        let mut senders = self.event_senders.write().await;
        senders.insert(context_key(ctx), sender);
        tracing::debug!("📡 Registered event sender for user {}", ctx.user_id);
    }

    pub async fn unregister_event_sender(&self, ctx: &TenantContext) {
        let mut senders = self.event_senders.write().await;
        senders.remove(&context_key(ctx));
    }

    pub(crate) async fn emit(&self, ctx: &TenantContext, event: CommandEvent) {
        let senders = self.event_senders.read().await;
        if let Some(sender) = senders.get(&context_key(ctx)) {
            if sender.send(event).is_err() {
                tracing::debug!("event sender for user {} is closed", ctx.user_id);
            }
        }
    }

    pub(crate) async fn runtime(&self, ctx: &TenantContext) -> Arc<Mutex<ConversationRuntime>> {
        let key = context_key(ctx);
        {
            let runtimes = self.runtimes.read().await;
            if let Some(runtime) = runtimes.get(&key) {
                return runtime.clone();
            }
        }
        let mut runtimes = self.runtimes.write().await;
        runtimes
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(ConversationRuntime::default())))
            .clone()
    }

    /// The conversational entry point: accept one user turn and answer it.
    pub async fn send_message(
        &self,
        ctx: &TenantContext,
        text: &str,
    ) -> Result<SendOutcome, CommandError> {
        self.run_turn(ctx, text, None).await
    }

    /// Shared by `send_message` and the correction-retry path.
    pub(crate) async fn run_turn(
        &self,
        ctx: &TenantContext,
        text: &str,
        correction: Option<String>,
    ) -> Result<SendOutcome, CommandError> {
        let runtime = self.runtime(ctx).await;

        // Accept phase: the user message is appended the moment the turn is
        // accepted, under the per-user lock, so transcript order is call
        // order regardless of how long the agent takes.
        let (epoch, session_uuid, placeholder_uuid, history) = {
            let mut rt = runtime.lock().await;
            if rt.active_turn.is_some() {
                return Err(CommandError::TurnInFlight);
            }

            let session = match self.sessions.active_session(ctx).await? {
                Some(session) => session,
                None => {
                    self.sessions
                        .create_session(ctx, &derive_title(text))
                        .await?
                }
            };

            let history = self.sessions.messages(ctx, &session.uuid).await?;

            let user_message = self
                .sessions
                .append_message(ctx, &session.uuid, NewMessage::user(text))
                .await?;
            self.emit(
                ctx,
                CommandEvent::MessageAppended {
                    session_uuid: session.uuid.clone(),
                    message: user_message,
                },
            )
            .await;

            let placeholder = self
                .sessions
                .append_message(ctx, &session.uuid, NewMessage::assistant_placeholder())
                .await?;
            self.emit(
                ctx,
                CommandEvent::MessageAppended {
                    session_uuid: session.uuid.clone(),
                    message: placeholder.clone(),
                },
            )
            .await;

            rt.active_turn = Some(ActiveTurn {
                epoch: rt.epoch,
                session_uuid: session.uuid.clone(),
                placeholder_uuid: placeholder.uuid.clone(),
                steps: Vec::new(),
            });

            (rt.epoch, session.uuid, placeholder.uuid, history)
        };

        // Dispatch phase: no lock held while the agent works, so the user can
        // still confirm actions, give feedback or leave the session.
        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        self.spawn_thinking_forwarder(
            ctx.clone(),
            runtime.clone(),
            placeholder_uuid.clone(),
            progress_rx,
        )
        .await;

        let request = AgentRequest {
            history: history_for_agent(&history),
            user_text: text.to_string(),
            correction,
            escritorio_id: ctx.escritorio_id,
        };
        let agent_result = self.agent.run(request, progress_tx).await;

        // Finalize phase: re-check that this turn is still the current one
        // and that its session is still the active one before writing.
        let mut rt = runtime.lock().await;

        let still_current = rt
            .active_turn
            .as_ref()
            .map(|turn| turn.epoch == epoch && turn.placeholder_uuid == placeholder_uuid)
            .unwrap_or(false);
        let active = match self.sessions.active_session(ctx).await {
            Ok(active) => active,
            Err(error) => {
                // never leave the conversation stuck in-flight, nor the
                // placeholder stuck loading
                if still_current {
                    rt.active_turn = None;
                }
                let _ = self
                    .sessions
                    .resolve_message(
                        ctx,
                        &placeholder_uuid,
                        MessageResolution::Failed {
                            error: error.to_string(),
                        },
                    )
                    .await;
                return Err(error.into());
            }
        };
        let still_active = active
            .map(|session| session.uuid == session_uuid)
            .unwrap_or(false);

        if !still_current || !still_active {
            tracing::warn!(
                "⚠️ Discarding stale agent response for session {} (user {})",
                session_uuid,
                ctx.user_id
            );
            // The placeholder must never stay loading; if the cancel path did
            // not already resolve it, mark it cancelled now.
            let _ = self
                .sessions
                .resolve_message(ctx, &placeholder_uuid, MessageResolution::Cancelled)
                .await;
            if still_current {
                rt.active_turn = None;
            }
            return Ok(SendOutcome::Discarded);
        }

        rt.active_turn = None;

        match agent_result {
            Ok(reply) => {
                self.sessions
                    .resolve_message(
                        ctx,
                        &placeholder_uuid,
                        MessageResolution::Reply {
                            content: reply.reply_text.clone(),
                            tool_results: reply.tool_results.clone(),
                        },
                    )
                    .await?;

                let was_empty = rt.stager.is_empty();
                let staged = reply.proposed_actions.len();
                for proposed in reply.proposed_actions {
                    rt.stager.stage(proposed);
                }
                if was_empty && staged > 0 {
                    if let Some(action) = rt.stager.current() {
                        self.emit(
                            ctx,
                            CommandEvent::ActionPresented {
                                action: action.clone(),
                                changes: preview_changes(action),
                            },
                        )
                        .await;
                    }
                }

                let message = self.sessions.message(ctx, &placeholder_uuid).await?;
                self.emit(
                    ctx,
                    CommandEvent::MessageResolved {
                        session_uuid: session_uuid.clone(),
                        message: message.clone(),
                        views: render_tool_results(&message),
                    },
                )
                .await;

                Ok(SendOutcome::Replied {
                    message,
                    staged_actions: staged,
                })
            }
            Err(error) => {
                tracing::error!("Agent call failed for user {}: {}", ctx.user_id, error);
                self.sessions
                    .resolve_message(
                        ctx,
                        &placeholder_uuid,
                        MessageResolution::Failed {
                            error: error.to_string(),
                        },
                    )
                    .await?;

                let message = self.sessions.message(ctx, &placeholder_uuid).await?;
                self.emit(
                    ctx,
                    CommandEvent::MessageResolved {
                        session_uuid: session_uuid.clone(),
                        message: message.clone(),
                        views: Vec::new(),
                    },
                )
                .await;

                Ok(SendOutcome::Failed { message })
            }
        }
    }

    /// Forward thinking steps into the runtime (for the projection) and out
    /// to the event channel, for as long as the originating turn is current.
    async fn spawn_thinking_forwarder(
        &self,
        ctx: TenantContext,
        runtime: Arc<Mutex<ConversationRuntime>>,
        placeholder_uuid: String,
        mut progress_rx: mpsc::UnboundedReceiver<ThinkingStep>,
    ) {
        let sender = {
            let senders = self.event_senders.read().await;
            senders.get(&context_key(&ctx)).cloned()
        };

        tokio::spawn(async move {
            while let Some(step) = progress_rx.recv().await {
                let mut rt = runtime.lock().await;
                let current = rt
                    .active_turn
                    .as_mut()
                    .filter(|turn| turn.placeholder_uuid == placeholder_uuid);
                match current {
                    Some(turn) => turn.steps.push(step.clone()),
                    None => continue,
                }
                drop(rt);

                if let Some(ref sender) = sender {
                    let _ = sender.send(CommandEvent::Thinking { step });
                }
            }
        });
    }

    /// Leave the user with no active session. The in-flight turn (if any) is
    /// marked discardable and its placeholder resolved to a cancellation
    /// marker; staged actions are dropped with it.
    pub async fn clear_chat(&self, ctx: &TenantContext) -> Result<(), CommandError> {
        let runtime = self.runtime(ctx).await;
        let mut rt = runtime.lock().await;

        rt.epoch += 1;
        if let Some(turn) = rt.active_turn.take() {
            tracing::warn!(
                "discarding in-flight turn for session {} (chat cleared)",
                turn.session_uuid
            );
            let _ = self
                .sessions
                .resolve_message(ctx, &turn.placeholder_uuid, MessageResolution::Cancelled)
                .await;
        }
        for action in rt.stager.clear() {
            self.emit(
                ctx,
                CommandEvent::ActionResolved {
                    action_id: action.id,
                    outcome: "cancelada".to_string(),
                    error: None,
                },
            )
            .await;
        }

        self.sessions.deactivate_active(ctx).await?;
        tracing::info!("🧹 Chat cleared for user {}", ctx.user_id);
        Ok(())
    }

    /// Make another session the active one and load its transcript. A reply
    /// still in flight for the previous session becomes stale.
    pub async fn switch_session(
        &self,
        ctx: &TenantContext,
        session_uuid: &str,
    ) -> Result<Vec<Message>, CommandError> {
        let runtime = self.runtime(ctx).await;
        let mut rt = runtime.lock().await;

        rt.epoch += 1;
        if let Some(turn) = rt.active_turn.take() {
            tracing::warn!(
                "discarding in-flight turn for session {} (switching to {})",
                turn.session_uuid,
                session_uuid
            );
            let _ = self
                .sessions
                .resolve_message(ctx, &turn.placeholder_uuid, MessageResolution::Cancelled)
                .await;
        }
        for action in rt.stager.clear() {
            self.emit(
                ctx,
                CommandEvent::ActionResolved {
                    action_id: action.id,
                    outcome: "cancelada".to_string(),
                    error: None,
                },
            )
            .await;
        }

        self.sessions.switch_session(ctx, session_uuid).await?;
        let messages = self.sessions.messages(ctx, session_uuid).await?;
        Ok(messages)
    }

    // ----- read-only projections for the UI layer -----

    /// Ordered messages of the active session, empty when there is none.
    pub async fn transcript(&self, ctx: &TenantContext) -> Result<Vec<Message>, CommandError> {
        match self.sessions.active_session(ctx).await? {
            Some(session) => Ok(self.sessions.messages(ctx, &session.uuid).await?),
            None => Ok(Vec::new()),
        }
    }

    pub async fn sessions(&self, ctx: &TenantContext) -> Result<Vec<Session>, CommandError> {
        Ok(self.sessions.list_sessions(ctx).await?)
    }

    /// Transcript of any of the user's sessions, active or not.
    pub async fn session_transcript(
        &self,
        ctx: &TenantContext,
        session_uuid: &str,
    ) -> Result<Vec<Message>, CommandError> {
        Ok(self.sessions.messages(ctx, session_uuid).await?)
    }

    /// The pending action currently presented to the user, with its diff
    /// preview, if any.
    pub async fn current_action(
        &self,
        ctx: &TenantContext,
    ) -> Option<(PendingAction, Vec<FieldChange>)> {
        let runtime = self.runtime(ctx).await;
        let rt = runtime.lock().await;
        rt.stager
            .current()
            .map(|action| (action.clone(), preview_changes(action)))
    }

    /// Live thinking steps of the in-flight turn; cleared when it resolves.
    pub async fn thinking_steps(&self, ctx: &TenantContext) -> Vec<ThinkingStep> {
        let runtime = self.runtime(ctx).await;
        let rt = runtime.lock().await;
        rt.active_turn
            .as_ref()
            .map(|turn| turn.steps.clone())
            .unwrap_or_default()
    }

    /// Lifecycle of the current turn as the UI polls it. Terminal failure and
    /// cancellation live on the resolved messages themselves.
    pub async fn turn_phase(&self, ctx: &TenantContext) -> TurnPhase {
        let runtime = self.runtime(ctx).await;
        let rt = runtime.lock().await;
        match &rt.active_turn {
            Some(turn) if turn.steps.is_empty() => TurnPhase::Pending,
            Some(turn) => TurnPhase::Streaming {
                steps: turn.steps.clone(),
            },
            None => TurnPhase::Done,
        }
    }
}

/// Every tool result reaches the UI through the renderer, one table each
fn render_tool_results(message: &Message) -> Vec<super::renderer::TableView> {
    message
        .tool_results
        .iter()
        .map(|result| super::renderer::render(&result.rows))
        .collect()
}

/// Session titles derive from the first user message
fn derive_title(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= TITLE_BUDGET {
        return trimmed.to_string();
    }
    let mut title: String = trimmed.chars().take(TITLE_BUDGET).collect();
    title.push('…');
    title
}

/// Prior resolved turns as the agent sees them. Placeholders, cancelled
/// turns and failed turns carry no content and are skipped.
fn history_for_agent(messages: &[Message]) -> Vec<AgentTurn> {
    messages
        .iter()
        .filter(|message| message.role != MessageRole::System)
        .filter_map(|message| {
            message.content.as_ref().map(|content| AgentTurn {
                role: message.role.as_str().to_string(),
                content: content.clone(),
            })
        })
        .collect()
}
