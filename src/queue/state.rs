use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Lifecycle state of a queue entry
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EntryState {
    /// Waiting for its first pipeline run
    NotProcessed,
    /// Retried on the next run by the bound component only
    Repeat,
    /// Terminal: handled successfully
    Complete,
    /// Terminal: a component reported a functional error
    Error,
    /// Tentatively admitted by the receive pipeline, awaiting confirmation
    IntermediateAdded,
}

impl EntryState {
    /// States a pipeline picks up
    pub const PENDING: [EntryState; 2] = [EntryState::NotProcessed, EntryState::Repeat];

    pub fn is_pending(&self) -> bool {
        matches!(self, EntryState::NotProcessed | EntryState::Repeat)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, EntryState::Complete | EntryState::Error)
    }
}

/// Sub-result a component reports after claiming a message
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Outcome {
    Completed,
    Error,
    Repeat,
    /// Claimed without reporting anything; treated as completed
    #[default]
    NotHandled,
}

impl Outcome {
    /// State an entry moves to when a component claims it with this outcome
    pub fn entry_state(self) -> EntryState {
        match self {
            Outcome::Completed | Outcome::NotHandled => EntryState::Complete,
            Outcome::Error => EntryState::Error,
            Outcome::Repeat => EntryState::Repeat,
        }
    }
}

/// Which side of the queue an entry belongs to
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Direction {
    Outbound,
    Inbound,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_outcome_mapping() {
        assert_eq!(Outcome::Completed.entry_state(), EntryState::Complete);
        assert_eq!(Outcome::NotHandled.entry_state(), EntryState::Complete);
        assert_eq!(Outcome::Error.entry_state(), EntryState::Error);
        assert_eq!(Outcome::Repeat.entry_state(), EntryState::Repeat);
    }

    #[test]
    fn test_pending_and_terminal() {
        assert!(EntryState::NotProcessed.is_pending());
        assert!(EntryState::Repeat.is_pending());
        assert!(!EntryState::IntermediateAdded.is_pending());
        assert!(EntryState::Complete.is_terminal());
        assert!(EntryState::Error.is_terminal());
        assert!(!EntryState::Repeat.is_terminal());
    }

    #[test]
    fn test_state_names() {
        assert_eq!(EntryState::IntermediateAdded.to_string(), "intermediate_added");
        assert_eq!(
            EntryState::from_str("not_processed").unwrap(),
            EntryState::NotProcessed
        );
        assert_eq!(Direction::from_str("inbound").unwrap(), Direction::Inbound);
        assert!(EntryState::from_str("done").is_err());
    }
}
