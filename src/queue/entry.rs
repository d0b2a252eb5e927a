use crate::components::ComponentId;
use crate::message::MessageTypeId;
use crate::queue::{Direction, EntryState, Outcome};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Monotonic queue entry identifier assigned by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(u64);

impl EntryId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Persisted unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: EntryId,
    pub message_type: MessageTypeId,
    pub direction: Direction,
    pub state: EntryState,
    /// Error text, or a continuation token a component stored for itself
    pub state_detail: Option<String>,
    /// Component owning the retry; set only while `state` is `Repeat`
    pub bound_handler: Option<ComponentId>,
    pub payload: String,
    pub created_at: DateTime<Utc>,
    pub changed_at: DateTime<Utc>,
}

impl QueueEntry {
    /// Materialize a new entry with a store-assigned id
    pub fn from_new(id: EntryId, new: NewQueueEntry, now: DateTime<Utc>) -> Self {
        Self {
            id,
            message_type: new.message_type,
            direction: new.direction,
            state: new.state,
            state_detail: new.state_detail,
            bound_handler: None,
            payload: new.payload,
            created_at: now,
            changed_at: now,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.state.is_pending()
    }

    /// Record the outcome reported by the component that claimed this entry.
    ///
    /// `Repeat` pins the entry to `component`; every other outcome releases it.
    pub fn record_outcome(
        &mut self,
        outcome: Outcome,
        component: &ComponentId,
        detail: Option<String>,
    ) {
        let state = outcome.entry_state();
        self.bound_handler = match state {
            EntryState::Repeat => Some(component.clone()),
            _ => None,
        };
        self.state = state;
        self.state_detail = detail;
        self.changed_at = Utc::now();
    }

    /// Move to the terminal `Error` state with the given reason
    pub fn fail(&mut self, detail: impl Into<String>) {
        self.state = EntryState::Error;
        self.bound_handler = None;
        self.state_detail = Some(detail.into());
        self.changed_at = Utc::now();
    }

    /// Make the entry eligible again for the full ordered component list
    pub fn reset(&mut self) {
        self.state = EntryState::NotProcessed;
        self.bound_handler = None;
        self.state_detail = None;
        self.changed_at = Utc::now();
    }

    /// Finalize a tentatively admitted entry
    pub fn finalize(&mut self, state: EntryState, detail: Option<String>) {
        debug_assert!(state != EntryState::Repeat && state != EntryState::IntermediateAdded);
        self.state = state;
        self.bound_handler = None;
        self.state_detail = detail;
        self.changed_at = Utc::now();
    }
}

/// Entry before the store assigns id and timestamps
#[derive(Debug, Clone, PartialEq)]
pub struct NewQueueEntry {
    pub message_type: MessageTypeId,
    pub direction: Direction,
    pub state: EntryState,
    pub state_detail: Option<String>,
    pub payload: String,
}

impl NewQueueEntry {
    /// Entry ready for its pipeline
    pub fn pending(message_type: MessageTypeId, direction: Direction, payload: String) -> Self {
        Self {
            message_type,
            direction,
            state: EntryState::NotProcessed,
            state_detail: None,
            payload,
        }
    }

    /// Tentative inbound entry written before a receiver confirms
    pub fn intermediate(message_type: MessageTypeId, payload: String) -> Self {
        Self {
            message_type,
            direction: Direction::Inbound,
            state: EntryState::IntermediateAdded,
            state_detail: None,
            payload,
        }
    }

    pub fn with_state(mut self, state: EntryState, detail: Option<String>) -> Self {
        self.state = state;
        self.state_detail = detail;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> QueueEntry {
        QueueEntry::from_new(
            EntryId::new(7),
            NewQueueEntry::pending(
                MessageTypeId::from_name("orders.created"),
                Direction::Outbound,
                "{}".to_string(),
            ),
            Utc::now(),
        )
    }

    #[test]
    fn test_repeat_binds_component() {
        let mut entry = entry();
        let smtp = ComponentId::new("smtp");

        entry.record_outcome(Outcome::Repeat, &smtp, Some("cursor=3".to_string()));
        assert_eq!(entry.state, EntryState::Repeat);
        assert_eq!(entry.bound_handler, Some(smtp.clone()));
        assert_eq!(entry.state_detail.as_deref(), Some("cursor=3"));

        entry.record_outcome(Outcome::Completed, &smtp, None);
        assert_eq!(entry.state, EntryState::Complete);
        assert!(entry.bound_handler.is_none());
    }

    #[test]
    fn test_fail_and_reset_release_binding() {
        let mut entry = entry();
        let smtp = ComponentId::new("smtp");
        entry.record_outcome(Outcome::Repeat, &smtp, None);

        entry.fail("mailbox full");
        assert_eq!(entry.state, EntryState::Error);
        assert!(entry.bound_handler.is_none());

        entry.reset();
        assert_eq!(entry.state, EntryState::NotProcessed);
        assert!(entry.state_detail.is_none());
    }

    #[test]
    fn test_intermediate_constructor() {
        let new = NewQueueEntry::intermediate(MessageTypeId::from_name("x"), "p".to_string());
        assert_eq!(new.direction, Direction::Inbound);
        assert_eq!(new.state, EntryState::IntermediateAdded);
    }
}
