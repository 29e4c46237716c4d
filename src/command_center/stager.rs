// src/command_center/stager.rs
//! FIFO staging queue for agent-proposed mutations.
//! The oldest still-pending action is the one presented to the user; actions
//! are never reordered by kind or risk level.

use std::collections::VecDeque;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::types::{PendingAction, ProposedAction, Record};

/// One changed field of an `update` action, surfaced in the diff preview.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: String,
    pub antes: Option<Value>,
    pub depois: Value,
}

/// Canonical serialized form used for change detection. serde_json maps are
/// key-sorted, so deep-equal objects and arrays serialize identically.
fn canonical(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

/// Fields of `depois` whose canonical serialization differs from the same key
/// in `antes`. Unchanged keys are not surfaced.
pub fn field_changes(antes: &Record, depois: &Record) -> Vec<FieldChange> {
    depois
        .iter()
        .filter(|(key, depois_value)| match antes.get(*key) {
            Some(antes_value) => canonical(antes_value) != canonical(depois_value),
            None => true,
        })
        .map(|(key, depois_value)| FieldChange {
            field: key.clone(),
            antes: antes.get(key).cloned(),
            depois: depois_value.clone(),
        })
        .collect()
}

/// Diff preview for any action kind: inserts show every field as new, deletes
/// show no field changes (the full record is in the payload).
pub fn preview_changes(action: &PendingAction) -> Vec<FieldChange> {
    match &action.payload {
        super::types::ActionPayload::Insert { dados } => dados
            .iter()
            .map(|(key, value)| FieldChange {
                field: key.clone(),
                antes: None,
                depois: value.clone(),
            })
            .collect(),
        super::types::ActionPayload::Update { antes, depois } => field_changes(antes, depois),
        super::types::ActionPayload::Delete { .. } => Vec::new(),
    }
}

/// Staging queue for one conversation context. The front of the queue is the
/// presented action; everything behind it waits its turn.
#[derive(Debug, Default)]
pub struct ActionStager {
    queue: VecDeque<PendingAction>,
    /// Secondary acknowledgment ("I understand and wish to permanently
    /// delete") for the currently presented action. Cleared whenever the
    /// presented action changes.
    acknowledged: bool,
}

impl ActionStager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a proposed mutation and return its pending-action id. The
    /// first queued action is implicitly the presented one.
    pub fn stage(&mut self, proposed: ProposedAction) -> String {
        let action = PendingAction {
            id: Uuid::new_v4().to_string(),
            table: proposed.table,
            explanation: proposed.explanation,
            payload: proposed.payload,
            proposed_at: Utc::now(),
        };
        let id = action.id.clone();
        self.queue.push_back(action);
        id
    }

    /// The oldest still-pending action, i.e. the one presented to the user.
    pub fn current(&self) -> Option<&PendingAction> {
        self.queue.front()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn acknowledged(&self) -> bool {
        self.acknowledged
    }

    /// Toggle the delete acknowledgment for the presented action. Returns
    /// false when there is nothing presented.
    pub fn set_acknowledgment(&mut self, value: bool) -> bool {
        if self.queue.is_empty() {
            return false;
        }
        self.acknowledged = value;
        true
    }

    /// Remove the presented action (by id) from the queue, promoting the next
    /// one. The acknowledgment never carries over to the promoted action.
    pub fn resolve_current(&mut self, action_id: &str) -> Option<PendingAction> {
        match self.queue.front() {
            Some(front) if front.id == action_id => {
                self.acknowledged = false;
                self.queue.pop_front()
            }
            _ => None,
        }
    }

    /// Drop every queued action (chat cleared or session switched).
    pub fn clear(&mut self) -> Vec<PendingAction> {
        self.acknowledged = false;
        self.queue.drain(..).collect()
    }
}
