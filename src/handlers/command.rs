// src/handlers/command.rs
//! The Centro de Comando surface: a duplex WebSocket for the conversational
//! command flow (messages, confirmations, session control) plus REST
//! projections for the history panel.

use crate::command_center::orchestrator::CommandError;
use crate::command_center::types::CommandEvent;
use crate::handlers::auth::verify_jwt_token;
use crate::middleware::auth::auth_middleware;
use crate::models::auth::{ErrorResponse, TenantContext};
use crate::models::chat::{
    CorrectionRequest, FeedbackRequest, RenderedMessage, SessionSummary, TranscriptResponse,
};
use crate::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Extension, Path, Query,
    },
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use futures::{sink::SinkExt, stream::StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Deserialize)]
struct WebSocketQuery {
    token: String,
}

/// Commands the browser sends over the WebSocket
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientCommand {
    Message {
        texto: String,
    },
    ConfirmAction {
        acao_id: String,
        #[serde(default)]
        dupla_confirmacao: bool,
    },
    CancelAction {
        acao_id: String,
    },
    SetAcknowledgment {
        valor: bool,
    },
    ClearChat,
    SwitchSession {
        sessao_uuid: String,
    },
}

pub fn command_routes() -> Router {
    let public_routes = Router::new().route("/ws", get(websocket_handler));

    let protected_routes = Router::new()
        .route("/api/command/sessions", get(list_sessions))
        .route(
            "/api/command/sessions/:session_uuid/messages",
            get(session_messages),
        )
        .route(
            "/api/command/sessions/:session_uuid/activate",
            post(activate_session),
        )
        .route("/api/command/clear", post(clear_chat))
        .route("/api/command/action", get(current_action))
        .route("/api/command/turn", get(turn_phase))
        .route("/api/command/feedback", post(give_feedback))
        .route("/api/command/feedback/correction", post(submit_correction))
        .layer(axum::middleware::from_fn(auth_middleware));

    public_routes.merge(protected_routes)
}

async fn websocket_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WebSocketQuery>,
    Extension(state): Extension<Arc<AppState>>,
) -> impl IntoResponse {
    // The browser cannot set headers on a WebSocket upgrade, so the JWT
    // arrives as a query parameter
    let claims = match verify_jwt_token(&params.token) {
        Ok(claims) => claims,
        Err(e) => {
            tracing::warn!("WebSocket JWT verification failed: {}", e);
            return StatusCode::UNAUTHORIZED.into_response();
        }
    };
    let ctx = TenantContext::from(&claims);

    ws.on_upgrade(move |socket| websocket(socket, state, ctx))
        .into_response()
}

async fn websocket(stream: WebSocket, state: Arc<AppState>, ctx: TenantContext) {
    let (mut sender, mut receiver) = stream.split();

    tracing::info!(
        "🔌 Command-center socket connected (user {}, escritorio {})",
        ctx.user_id,
        ctx.escritorio_id
    );

    // Events flow through this channel: thinking steps, message updates and
    // presented actions, in the order the pipeline produced them
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    state
        .command_center
        .register_event_sender(&ctx, event_tx.clone())
        .await;

    loop {
        tokio::select! {
            Some(event) = event_rx.recv() => {
                let payload = match serde_json::to_string(&event) {
                    Ok(payload) => payload,
                    Err(e) => {
                        tracing::error!("Failed to serialize command event: {}", e);
                        continue;
                    }
                };
                if sender.send(Message::Text(payload)).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => {
                let message = match incoming {
                    Some(Ok(message)) => message,
                    _ => break,
                };
                let text = match message {
                    Message::Text(text) => text,
                    Message::Close(_) => break,
                    _ => continue,
                };

                let command = match serde_json::from_str::<ClientCommand>(&text) {
                    Ok(command) => command,
                    Err(e) => {
                        let _ = event_tx.send(CommandEvent::Error {
                            message: format!("comando inválido: {}", e),
                        });
                        continue;
                    }
                };

                dispatch_command(&state, &ctx, command, &event_tx);
            }
        }
    }

    state.command_center.unregister_event_sender(&ctx).await;
    tracing::info!("🔌 Command-center socket closed (user {})", ctx.user_id);
}

/// Run a client command without blocking the socket loop; a long agent turn
/// must not stall the delivery of its own thinking steps.
fn dispatch_command(
    state: &Arc<AppState>,
    ctx: &TenantContext,
    command: ClientCommand,
    event_tx: &mpsc::UnboundedSender<CommandEvent>,
) {
    let center = state.command_center.clone();
    let ctx = *ctx;
    let event_tx = event_tx.clone();

    tokio::spawn(async move {
        let result: Result<(), CommandError> = match command {
            ClientCommand::Message { texto } => {
                center.send_message(&ctx, &texto).await.map(|_| ())
            }
            ClientCommand::ConfirmAction {
                acao_id,
                dupla_confirmacao,
            } => center
                .confirm_action(&ctx, &acao_id, dupla_confirmacao)
                .await
                .map(|_| ()),
            ClientCommand::CancelAction { acao_id } => {
                center.cancel_action(&ctx, &acao_id).await.map(|_| ())
            }
            ClientCommand::SetAcknowledgment { valor } => {
                center.set_acknowledgment(&ctx, valor).await
            }
            ClientCommand::ClearChat => center.clear_chat(&ctx).await,
            ClientCommand::SwitchSession { sessao_uuid } => {
                center.switch_session(&ctx, &sessao_uuid).await.map(|_| ())
            }
        };

        if let Err(error) = result {
            let _ = event_tx.send(CommandEvent::Error {
                message: error.to_string(),
            });
        }
    });
}

// ----- REST projections -----

async fn list_sessions(
    Extension(state): Extension<Arc<AppState>>,
    Extension(ctx): Extension<TenantContext>,
) -> Result<Json<Vec<SessionSummary>>, (StatusCode, Json<ErrorResponse>)> {
    let sessions = state
        .command_center
        .sessions(&ctx)
        .await
        .map_err(command_error_response)?;
    Ok(Json(
        sessions.iter().map(SessionSummary::from_session).collect(),
    ))
}

async fn session_messages(
    Extension(state): Extension<Arc<AppState>>,
    Extension(ctx): Extension<TenantContext>,
    Path(session_uuid): Path<String>,
) -> Result<Json<TranscriptResponse>, (StatusCode, Json<ErrorResponse>)> {
    let messages = state
        .command_center
        .session_transcript(&ctx, &session_uuid)
        .await
        .map_err(command_error_response)?;
    Ok(Json(TranscriptResponse {
        session_uuid,
        messages: messages.into_iter().map(RenderedMessage::from_message).collect(),
    }))
}

async fn activate_session(
    Extension(state): Extension<Arc<AppState>>,
    Extension(ctx): Extension<TenantContext>,
    Path(session_uuid): Path<String>,
) -> Result<Json<TranscriptResponse>, (StatusCode, Json<ErrorResponse>)> {
    let messages = state
        .command_center
        .switch_session(&ctx, &session_uuid)
        .await
        .map_err(command_error_response)?;
    Ok(Json(TranscriptResponse {
        session_uuid,
        messages: messages.into_iter().map(RenderedMessage::from_message).collect(),
    }))
}

async fn clear_chat(
    Extension(state): Extension<Arc<AppState>>,
    Extension(ctx): Extension<TenantContext>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<ErrorResponse>)> {
    state
        .command_center
        .clear_chat(&ctx)
        .await
        .map_err(command_error_response)?;
    Ok(Json(json!({ "success": true })))
}

async fn current_action(
    Extension(state): Extension<Arc<AppState>>,
    Extension(ctx): Extension<TenantContext>,
) -> Json<serde_json::Value> {
    match state.command_center.current_action(&ctx).await {
        Some((action, changes)) => Json(json!({
            "action": action,
            "changes": changes,
        })),
        None => Json(json!({ "action": null })),
    }
}

async fn turn_phase(
    Extension(state): Extension<Arc<AppState>>,
    Extension(ctx): Extension<TenantContext>,
) -> Json<crate::command_center::types::TurnPhase> {
    Json(state.command_center.turn_phase(&ctx).await)
}

async fn give_feedback(
    Extension(state): Extension<Arc<AppState>>,
    Extension(ctx): Extension<TenantContext>,
    Json(payload): Json<FeedbackRequest>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<ErrorResponse>)> {
    let kind = match crate::command_center::types::FeedbackKind::from_str(&payload.kind) {
        Some(kind) => kind,
        None => {
            return Err((
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse {
                    success: false,
                    message: format!("tipo de feedback desconhecido: {}", payload.kind),
                }),
            ));
        }
    };

    state
        .command_center
        .record_feedback(&ctx, &payload.message_uuid, kind)
        .await
        .map_err(command_error_response)?;
    Ok(Json(json!({ "success": true })))
}

async fn submit_correction(
    Extension(state): Extension<Arc<AppState>>,
    Extension(ctx): Extension<TenantContext>,
    Json(payload): Json<CorrectionRequest>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<ErrorResponse>)> {
    let outcome = state
        .command_center
        .submit_correction(&ctx, &payload.message_uuid, &payload.texto)
        .await
        .map_err(command_error_response)?;

    let resubmitted = matches!(
        outcome,
        crate::command_center::feedback::CorrectionOutcome::Resubmitted(_)
    );
    Ok(Json(json!({ "success": true, "resubmitted": resubmitted })))
}

fn command_error_response(error: CommandError) -> (StatusCode, Json<ErrorResponse>) {
    let status = match &error {
        CommandError::TurnInFlight | CommandError::FeedbackConflict => StatusCode::CONFLICT,
        CommandError::NoSuchAction | CommandError::MessageNotFound => StatusCode::NOT_FOUND,
        CommandError::DoubleConfirmationRequired | CommandError::CorrectionRequired => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        CommandError::Session(session_error) => match session_error {
            crate::command_center::session_store::SessionError::SessionNotFound => {
                StatusCode::NOT_FOUND
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        },
    };
    (
        status,
        Json(ErrorResponse {
            success: false,
            message: error.to_string(),
        }),
    )
}
