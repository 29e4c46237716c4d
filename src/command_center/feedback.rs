// src/command_center/feedback.rs
//! Per-message feedback with the correction-retry loop. Feedback is
//! write-once: the first record wins and every later submission is rejected,
//! even under concurrent writers (the store serializes the conditional
//! write). A negative rating only becomes a record together with a
//! non-empty correction, which also triggers exactly one resubmission of the
//! original request.

use chrono::Utc;

use crate::models::auth::TenantContext;

use super::orchestrator::{CommandCenter, CommandError, SendOutcome};
use super::session_store::SessionError;
use super::types::{FeedbackKind, FeedbackRecord};

/// What happened to a submitted correction
#[derive(Debug)]
pub enum CorrectionOutcome {
    /// Empty text: nothing recorded, the message stays open to feedback
    Abandoned,
    /// Feedback recorded and the original request resubmitted once
    Resubmitted(SendOutcome),
}

impl CommandCenter {
    /// Record terminal feedback on an assistant message. `positivo` and
    /// `correcao` lock the message immediately; `negativo` is rejected here
    /// because it only exists together with a correction text.
    pub async fn record_feedback(
        &self,
        ctx: &TenantContext,
        message_uuid: &str,
        kind: FeedbackKind,
    ) -> Result<(), CommandError> {
        if kind == FeedbackKind::Negative {
            return Err(CommandError::CorrectionRequired);
        }

        self.sessions
            .set_feedback(
                ctx,
                message_uuid,
                FeedbackRecord {
                    kind,
                    correction: None,
                    created_at: Utc::now(),
                },
            )
            .await
            .map_err(feedback_error)
    }

    /// Resolve a negative rating. Non-empty text records the feedback with
    /// the correction attached and resubmits the original user request,
    /// annotated with the correction, for a revised answer.
    pub async fn submit_correction(
        &self,
        ctx: &TenantContext,
        message_uuid: &str,
        text: &str,
    ) -> Result<CorrectionOutcome, CommandError> {
        let correction = text.trim();
        if correction.is_empty() {
            // abandoned inline field: no record, no retry
            return Ok(CorrectionOutcome::Abandoned);
        }

        let original = self
            .sessions
            .preceding_user_message(ctx, message_uuid)
            .await?
            .ok_or(CommandError::MessageNotFound)?;
        let original_text = original.content.unwrap_or_default();

        // Record first: once the message is locked no concurrent writer can
        // trigger a second retry for it.
        self.sessions
            .set_feedback(
                ctx,
                message_uuid,
                FeedbackRecord {
                    kind: FeedbackKind::Negative,
                    correction: Some(correction.to_string()),
                    created_at: Utc::now(),
                },
            )
            .await
            .map_err(feedback_error)?;

        tracing::info!(
            "🔁 Negative feedback on message {}, resubmitting original request",
            message_uuid
        );

        let outcome = self
            .run_turn(ctx, &original_text, Some(correction.to_string()))
            .await?;

        Ok(CorrectionOutcome::Resubmitted(outcome))
    }
}

fn feedback_error(error: SessionError) -> CommandError {
    match error {
        SessionError::FeedbackConflict => CommandError::FeedbackConflict,
        SessionError::MessageNotFound => CommandError::MessageNotFound,
        other => CommandError::Session(other),
    }
}
