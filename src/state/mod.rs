pub mod factory;
pub mod sled_store;
pub mod store;

pub use factory::{create_in_memory_store, create_store};
pub use sled_store::SledQueueStore;
pub use store::*;

use crate::error::Result;
use crate::message::MessageTypeId;
use crate::queue::{Direction, EntryId, EntryState, NewQueueEntry, QueueEntry};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Unit-of-work over persisted queue entries.
///
/// Every method is its own short-lived atomic scope. Nothing here joins an
/// ambient transaction, so a pipeline blocked on a slow component never holds
/// store locks between calls.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Insert one entry and return it with its assigned id
    async fn insert(&self, entry: NewQueueEntry) -> Result<QueueEntry>;

    /// Insert several entries in one atomic write
    async fn insert_batch(&self, entries: Vec<NewQueueEntry>) -> Result<Vec<QueueEntry>>;

    /// Get an entry by id
    async fn get(&self, id: EntryId) -> Result<Option<QueueEntry>>;

    /// List entries matching the filter in ascending id order
    async fn query(&self, filter: &EntryFilter) -> Result<Vec<QueueEntry>>;

    /// Count entries matching the filter
    async fn count(&self, filter: &EntryFilter) -> Result<u64>;

    /// Apply updates and deletes atomically. Fails without writing anything if
    /// an updated entry no longer exists.
    async fn commit(&self, batch: WriteBatch) -> Result<()>;

    /// Persist a single entry
    async fn save(&self, entry: &QueueEntry) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.update(entry.clone());
        self.commit(batch).await
    }

    /// Delete a single entry
    async fn delete(&self, id: EntryId) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.delete(id);
        self.commit(batch).await
    }
}

/// Filter for querying entries
#[derive(Debug, Clone, Default)]
pub struct EntryFilter {
    pub message_type: Option<MessageTypeId>,
    pub direction: Option<Direction>,
    pub states: Vec<EntryState>,
    pub changed_before: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl EntryFilter {
    /// Entries a pipeline picks up for one message type and direction
    pub fn pending(message_type: MessageTypeId, direction: Direction) -> Self {
        Self {
            message_type: Some(message_type),
            direction: Some(direction),
            states: EntryState::PENDING.to_vec(),
            ..Default::default()
        }
    }

    pub fn for_type(message_type: MessageTypeId) -> Self {
        Self {
            message_type: Some(message_type),
            ..Default::default()
        }
    }

    pub fn direction(mut self, direction: Direction) -> Self {
        self.direction = Some(direction);
        self
    }

    pub fn states(mut self, states: impl IntoIterator<Item = EntryState>) -> Self {
        self.states = states.into_iter().collect();
        self
    }

    pub fn changed_before(mut self, cutoff: DateTime<Utc>) -> Self {
        self.changed_before = Some(cutoff);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, entry: &QueueEntry) -> bool {
        let type_match = self
            .message_type
            .map_or(true, |message_type| entry.message_type == message_type);
        let direction_match = self
            .direction
            .map_or(true, |direction| entry.direction == direction);
        let state_match = self.states.is_empty() || self.states.contains(&entry.state);
        let age_match = self
            .changed_before
            .map_or(true, |cutoff| entry.changed_at < cutoff);

        type_match && direction_match && state_match && age_match
    }
}

/// Accumulated entry changes applied by one `commit`
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    pub updates: Vec<QueueEntry>,
    pub deletes: Vec<EntryId>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, entry: QueueEntry) {
        self.updates.push(entry);
    }

    pub fn delete(&mut self, id: EntryId) {
        self.deletes.push(id);
    }

    pub fn len(&self) -> usize {
        self.updates.len() + self.deletes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty() && self.deletes.is_empty()
    }

    /// Hand the accumulated changes over, leaving this batch empty
    pub fn take(&mut self) -> WriteBatch {
        std::mem::take(self)
    }
}
