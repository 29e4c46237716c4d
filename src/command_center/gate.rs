// src/command_center/gate.rs
//! Lifecycle of a presented action: `presented → confirmed | cancelled`,
//! nothing else. Deletes are blocked until the secondary acknowledgment is
//! given — no code path executes a delete without it. A confirmed action is
//! attempted exactly once; failure is terminal and surfaced inline, never
//! retried by the pipeline.

use serde_json::Value;

use crate::data_store::{DataStore, StoreError};
use crate::models::auth::TenantContext;

use super::orchestrator::{CommandCenter, CommandError};
use super::session_store::NewMessage;
use super::stager::preview_changes;
use super::types::{ActionKind, ActionPayload, CommandEvent, PendingAction, Record};

/// Terminal state of a resolved action
#[derive(Debug)]
pub enum ActionOutcome {
    /// Confirmed and applied to the store
    Executed,
    /// Confirmed, attempted, rejected by the store
    Failed(StoreError),
    Cancelled,
}

impl ActionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionOutcome::Executed => "executada",
            ActionOutcome::Failed(_) => "falhou",
            ActionOutcome::Cancelled => "cancelada",
        }
    }
}

#[derive(Debug)]
pub struct ActionResolution {
    pub action: PendingAction,
    pub outcome: ActionOutcome,
}

impl CommandCenter {
    /// Toggle the delete acknowledgment for the presented action.
    pub async fn set_acknowledgment(
        &self,
        ctx: &TenantContext,
        value: bool,
    ) -> Result<(), CommandError> {
        let runtime = self.runtime(ctx).await;
        let mut rt = runtime.lock().await;
        if rt.stager.set_acknowledgment(value) {
            Ok(())
        } else {
            Err(CommandError::NoSuchAction)
        }
    }

    /// Confirm the presented action. For deletes the secondary
    /// acknowledgment must have been given (either as the call argument or
    /// via [`set_acknowledgment`]); otherwise the call is blocked and the
    /// action stays presented. Confirming executes the mutation; whatever
    /// the result, the action leaves the queue and the next one is promoted.
    pub async fn confirm_action(
        &self,
        ctx: &TenantContext,
        action_id: &str,
        double_confirmation: bool,
    ) -> Result<ActionResolution, CommandError> {
        let runtime = self.runtime(ctx).await;
        let mut rt = runtime.lock().await;

        let action = match rt.stager.current() {
            Some(current) if current.id == action_id => current.clone(),
            _ => return Err(CommandError::NoSuchAction),
        };

        if action.kind() == ActionKind::Delete && !double_confirmation && !rt.stager.acknowledged()
        {
            return Err(CommandError::DoubleConfirmationRequired);
        }

        let outcome = match execute_action(self.store.as_ref(), ctx, &action).await {
            Ok(()) => ActionOutcome::Executed,
            Err(error) => ActionOutcome::Failed(error),
        };

        rt.stager.resolve_current(action_id);
        self.emit(
            ctx,
            CommandEvent::ActionResolved {
                action_id: action.id.clone(),
                outcome: outcome.as_str().to_string(),
                error: match &outcome {
                    ActionOutcome::Failed(error) => Some(error.to_string()),
                    _ => None,
                },
            },
        )
        .await;
        self.promote_next(ctx, &rt.stager).await;

        self.append_outcome_notice(ctx, &action, &outcome).await;

        Ok(ActionResolution { action, outcome })
    }

    /// Cancel the presented action. Always available, for every kind; the
    /// acknowledgment state is cleared with it and the next queued action
    /// (from the same agent turn or a later one) is promoted.
    pub async fn cancel_action(
        &self,
        ctx: &TenantContext,
        action_id: &str,
    ) -> Result<ActionResolution, CommandError> {
        let runtime = self.runtime(ctx).await;
        let mut rt = runtime.lock().await;

        let action = match rt.stager.resolve_current(action_id) {
            Some(action) => action,
            None => return Err(CommandError::NoSuchAction),
        };

        self.emit(
            ctx,
            CommandEvent::ActionResolved {
                action_id: action.id.clone(),
                outcome: "cancelada".to_string(),
                error: None,
            },
        )
        .await;
        self.promote_next(ctx, &rt.stager).await;

        Ok(ActionResolution {
            action,
            outcome: ActionOutcome::Cancelled,
        })
    }

    async fn promote_next(&self, ctx: &TenantContext, stager: &super::stager::ActionStager) {
        if let Some(next) = stager.current() {
            self.emit(
                ctx,
                CommandEvent::ActionPresented {
                    action: next.clone(),
                    changes: preview_changes(next),
                },
            )
            .await;
        }
    }

    /// Execution outcomes land in the transcript: there is no separate error
    /// channel the user has to consult.
    async fn append_outcome_notice(
        &self,
        ctx: &TenantContext,
        action: &PendingAction,
        outcome: &ActionOutcome,
    ) {
        let notice = outcome_notice(action, outcome);

        let session = match self.sessions.active_session(ctx).await {
            Ok(Some(session)) => session,
            Ok(None) => {
                tracing::warn!("no active session to record action outcome for user {}", ctx.user_id);
                return;
            }
            Err(error) => {
                tracing::error!("failed to load active session for outcome notice: {}", error);
                return;
            }
        };

        match self
            .sessions
            .append_message(ctx, &session.uuid, NewMessage::assistant(&notice))
            .await
        {
            Ok(message) => {
                self.emit(
                    ctx,
                    CommandEvent::MessageAppended {
                        session_uuid: session.uuid,
                        message,
                    },
                )
                .await;
            }
            Err(error) => {
                tracing::warn!("could not append action outcome to transcript: {}", error);
            }
        }
    }
}

/// Apply a confirmed action against the data store. Updates apply only the
/// fields whose serialized value actually changed.
pub(crate) async fn execute_action(
    store: &dyn DataStore,
    ctx: &TenantContext,
    action: &PendingAction,
) -> Result<(), StoreError> {
    match &action.payload {
        ActionPayload::Insert { dados } => store.insert(ctx, &action.table, dados).await,
        ActionPayload::Update { antes, depois } => {
            let changes = super::stager::field_changes(antes, depois);
            if changes.is_empty() {
                // nothing differs; there is no mutation to attempt
                return Ok(());
            }
            let mut record = Record::new();
            for change in changes {
                record.insert(change.field, change.depois);
            }
            let id = record_id(antes)?;
            store.update(ctx, &action.table, &id, &record).await
        }
        ActionPayload::Delete { registro } => {
            let id = record_id(registro)?;
            store.delete(ctx, &action.table, &id).await
        }
    }
}

fn record_id(record: &Record) -> Result<String, StoreError> {
    match record.get("id") {
        Some(Value::String(id)) => Ok(id.clone()),
        Some(Value::Number(id)) => Ok(id.to_string()),
        _ => Err(StoreError::Validation(
            "a ação proposta não identifica o registro (campo id ausente)".to_string(),
        )),
    }
}

fn outcome_notice(action: &PendingAction, outcome: &ActionOutcome) -> String {
    match outcome {
        ActionOutcome::Executed => match action.kind() {
            ActionKind::Insert => format!("✅ Registro criado em {}.", action.table),
            ActionKind::Update => format!("✅ Registro atualizado em {}.", action.table),
            ActionKind::Delete => {
                format!("✅ Registro excluído permanentemente de {}.", action.table)
            }
        },
        ActionOutcome::Failed(error) => format!(
            "❌ Não foi possível executar a ação em {}: {}",
            action.table, error
        ),
        ActionOutcome::Cancelled => format!("Ação em {} cancelada.", action.table),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command_center::orchestrator::SendOutcome;
    use crate::command_center::test_support::{ctx, harness, MockTurn, StoreCall, TestHarness};
    use crate::command_center::types::ProposedAction;
    use serde_json::json;

    fn record(value: serde_json::Value) -> Record {
        value.as_object().expect("object literal").clone()
    }

    fn delete_action(table: &str, registro: serde_json::Value) -> ProposedAction {
        ProposedAction {
            table: table.to_string(),
            explanation: "excluir registro".to_string(),
            payload: ActionPayload::Delete {
                registro: record(registro),
            },
        }
    }

    fn insert_action(table: &str, dados: serde_json::Value) -> ProposedAction {
        ProposedAction {
            table: table.to_string(),
            explanation: "criar registro".to_string(),
            payload: ActionPayload::Insert {
                dados: record(dados),
            },
        }
    }

    /// One turn that stages the given actions; returns the presented id.
    async fn stage(h: &TestHarness, actions: Vec<ProposedAction>) -> String {
        h.agent
            .push(MockTurn::reply("proponho as seguintes ações").with_actions(actions));
        let outcome = h
            .center
            .send_message(&ctx(), "execute isso para mim")
            .await
            .unwrap();
        assert!(matches!(outcome, SendOutcome::Replied { .. }));
        let (action, _) = h.center.current_action(&ctx()).await.expect("presented action");
        action.id
    }

    #[tokio::test]
    async fn delete_is_blocked_without_the_double_confirmation() {
        let h = harness();
        let id = stage(
            &h,
            vec![delete_action("clientes", json!({"id": "42", "nome": "Acme"}))],
        )
        .await;

        // confirm without the checkbox: blocked, nothing reaches the store
        let blocked = h.center.confirm_action(&ctx(), &id, false).await;
        assert!(matches!(
            blocked,
            Err(CommandError::DoubleConfirmationRequired)
        ));
        assert_eq!(h.store.call_count(), 0);

        // the action is still presented
        let (still, _) = h.center.current_action(&ctx()).await.unwrap();
        assert_eq!(still.id, id);

        // checkbox set, then confirm: exactly one delete for id 42
        let resolution = h.center.confirm_action(&ctx(), &id, true).await.unwrap();
        assert!(matches!(resolution.outcome, ActionOutcome::Executed));
        assert_eq!(
            *h.store.calls.lock().unwrap(),
            vec![StoreCall::Delete {
                table: "clientes".to_string(),
                id: "42".to_string()
            }]
        );
        assert!(h.center.current_action(&ctx()).await.is_none());
    }

    #[tokio::test]
    async fn acknowledgment_can_come_through_the_toggle() {
        let h = harness();
        let id = stage(&h, vec![delete_action("clientes", json!({"id": "42"}))]).await;

        h.center.set_acknowledgment(&ctx(), true).await.unwrap();
        let resolution = h.center.confirm_action(&ctx(), &id, false).await.unwrap();
        assert!(matches!(resolution.outcome, ActionOutcome::Executed));
        assert_eq!(h.store.call_count(), 1);
    }

    #[tokio::test]
    async fn inserts_and_updates_confirm_without_preconditions() {
        let h = harness();
        let id = stage(
            &h,
            vec![insert_action("tarefas", json!({"titulo": "Protocolar petição"}))],
        )
        .await;

        let resolution = h.center.confirm_action(&ctx(), &id, false).await.unwrap();
        assert!(matches!(resolution.outcome, ActionOutcome::Executed));
        assert_eq!(
            *h.store.calls.lock().unwrap(),
            vec![StoreCall::Insert {
                table: "tarefas".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn updates_apply_only_the_changed_fields() {
        let h = harness();
        let id = stage(
            &h,
            vec![ProposedAction {
                table: "processos".to_string(),
                explanation: "atualizar status".to_string(),
                payload: ActionPayload::Update {
                    antes: record(json!({"id": 7, "status": "novo", "comarca": "São Paulo"})),
                    depois: record(json!({"id": 7, "status": "em_andamento", "comarca": "São Paulo"})),
                },
            }],
        )
        .await;

        let resolution = h.center.confirm_action(&ctx(), &id, false).await.unwrap();
        assert!(matches!(resolution.outcome, ActionOutcome::Executed));
        assert_eq!(
            *h.store.calls.lock().unwrap(),
            vec![StoreCall::Update {
                table: "processos".to_string(),
                id: "7".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn fifo_promotion_survives_confirm_and_cancel() {
        let h = harness();
        let first = stage(
            &h,
            vec![
                delete_action("clientes", json!({"id": "1"})),
                insert_action("tarefas", json!({"titulo": "b"})),
                delete_action("clientes", json!({"id": "3"})),
            ],
        )
        .await;

        // cancel A: B is promoted next, regardless of kind
        h.center.cancel_action(&ctx(), &first).await.unwrap();
        let (second, _) = h.center.current_action(&ctx()).await.unwrap();
        assert!(matches!(second.kind(), ActionKind::Insert));

        h.center.confirm_action(&ctx(), &second.id, false).await.unwrap();
        let (third, _) = h.center.current_action(&ctx()).await.unwrap();
        assert!(matches!(third.kind(), ActionKind::Delete));

        h.center.confirm_action(&ctx(), &third.id, true).await.unwrap();
        assert!(h.center.current_action(&ctx()).await.is_none());
    }

    #[tokio::test]
    async fn confirming_a_queued_action_out_of_turn_is_rejected() {
        let h = harness();
        let _first = stage(
            &h,
            vec![
                insert_action("tarefas", json!({"titulo": "a"})),
                insert_action("tarefas", json!({"titulo": "b"})),
            ],
        )
        .await;

        // find the queued (not presented) action by confirming a bogus id
        let result = h.center.confirm_action(&ctx(), "inexistente", false).await;
        assert!(matches!(result, Err(CommandError::NoSuchAction)));
        assert_eq!(h.store.call_count(), 0);
    }

    #[tokio::test]
    async fn execution_failure_is_terminal_and_surfaced_in_the_transcript() {
        let h = harness();
        let id = stage(&h, vec![delete_action("clientes", json!({"id": "42"}))]).await;

        h.store.fail_next(StoreError::NotFound);
        let resolution = h.center.confirm_action(&ctx(), &id, true).await.unwrap();

        // attempted and failed: the action does not return to presented
        match resolution.outcome {
            ActionOutcome::Failed(StoreError::NotFound) => {}
            other => panic!("expected not-found failure, got {:?}", other),
        }
        assert!(h.center.current_action(&ctx()).await.is_none());

        // the vanished row is reported inline, never a silent success
        let transcript = h.center.transcript(&ctx()).await.unwrap();
        let last = transcript.last().unwrap();
        assert!(last
            .content
            .as_deref()
            .unwrap()
            .contains("o registro não existe mais"));
    }

    #[tokio::test]
    async fn validation_errors_are_shown_verbatim() {
        let h = harness();
        let id = stage(
            &h,
            vec![insert_action("clientes", json!({"nome": null}))],
        )
        .await;

        h.store.fail_next(StoreError::Validation(
            "null value in column \"nome\" violates not-null constraint".to_string(),
        ));
        h.center.confirm_action(&ctx(), &id, false).await.unwrap();

        let transcript = h.center.transcript(&ctx()).await.unwrap();
        let last = transcript.last().unwrap();
        assert!(last
            .content
            .as_deref()
            .unwrap()
            .contains("violates not-null constraint"));
    }

    #[tokio::test]
    async fn cancel_clears_the_acknowledgment_for_the_next_action() {
        let h = harness();
        let first = stage(
            &h,
            vec![
                delete_action("clientes", json!({"id": "1"})),
                delete_action("clientes", json!({"id": "2"})),
            ],
        )
        .await;

        h.center.set_acknowledgment(&ctx(), true).await.unwrap();
        h.center.cancel_action(&ctx(), &first).await.unwrap();

        // the second delete must be re-acknowledged from scratch
        let (second, _) = h.center.current_action(&ctx()).await.unwrap();
        let blocked = h.center.confirm_action(&ctx(), &second.id, false).await;
        assert!(matches!(
            blocked,
            Err(CommandError::DoubleConfirmationRequired)
        ));
        assert_eq!(h.store.call_count(), 0);
    }

    #[tokio::test]
    async fn delete_without_record_id_fails_as_validation() {
        let h = harness();
        let id = stage(&h, vec![delete_action("clientes", json!({"nome": "Acme"}))]).await;

        let resolution = h.center.confirm_action(&ctx(), &id, true).await.unwrap();
        match resolution.outcome {
            ActionOutcome::Failed(StoreError::Validation(message)) => {
                assert!(message.contains("id"));
            }
            other => panic!("expected validation failure, got {:?}", other),
        }
        // nothing reached the store
        assert_eq!(h.store.call_count(), 0);
    }
}
