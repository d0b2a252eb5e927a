use crate::error::{AppError, Result};
use crate::queue::{EntryId, NewQueueEntry, QueueEntry};
use crate::state::{EntryFilter, QueueStore, WriteBatch};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// In-memory queue store (for embedding and testing)
#[derive(Clone)]
pub struct InMemoryQueueStore {
    entries: Arc<RwLock<BTreeMap<EntryId, QueueEntry>>>,
    next_id: Arc<AtomicU64>,
}

impl InMemoryQueueStore {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(BTreeMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    fn allocate(&self, entry: NewQueueEntry) -> QueueEntry {
        let id = EntryId::new(self.next_id.fetch_add(1, Ordering::SeqCst));
        QueueEntry::from_new(id, entry, Utc::now())
    }

    /// Number of stored entries regardless of state
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Default for InMemoryQueueStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueueStore for InMemoryQueueStore {
    async fn insert(&self, entry: NewQueueEntry) -> Result<QueueEntry> {
        let entry = self.allocate(entry);
        self.entries.write().insert(entry.id, entry.clone());

        tracing::debug!(entry_id = %entry.id, state = %entry.state, "Queue entry inserted");
        Ok(entry)
    }

    async fn insert_batch(&self, entries: Vec<NewQueueEntry>) -> Result<Vec<QueueEntry>> {
        let created: Vec<QueueEntry> = entries.into_iter().map(|e| self.allocate(e)).collect();

        let mut guard = self.entries.write();
        for entry in &created {
            guard.insert(entry.id, entry.clone());
        }

        Ok(created)
    }

    async fn get(&self, id: EntryId) -> Result<Option<QueueEntry>> {
        Ok(self.entries.read().get(&id).cloned())
    }

    async fn query(&self, filter: &EntryFilter) -> Result<Vec<QueueEntry>> {
        let guard = self.entries.read();
        let matching = guard.values().filter(|entry| filter.matches(entry)).cloned();

        Ok(match filter.limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        })
    }

    async fn count(&self, filter: &EntryFilter) -> Result<u64> {
        let guard = self.entries.read();
        Ok(guard.values().filter(|entry| filter.matches(entry)).count() as u64)
    }

    async fn commit(&self, batch: WriteBatch) -> Result<()> {
        let mut guard = self.entries.write();

        if let Some(missing) = batch.updates.iter().find(|e| !guard.contains_key(&e.id)) {
            return Err(AppError::NotFound(format!(
                "Queue entry {} not found",
                missing.id
            )));
        }

        for entry in batch.updates {
            guard.insert(entry.id, entry);
        }
        for id in batch.deletes {
            guard.remove(&id);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageTypeId;
    use crate::queue::{Direction, EntryState};

    fn new_entry(direction: Direction) -> NewQueueEntry {
        NewQueueEntry::pending(
            MessageTypeId::from_name("orders.created"),
            direction,
            "{}".to_string(),
        )
    }

    #[tokio::test]
    async fn test_ids_are_monotonic() {
        let store = InMemoryQueueStore::new();
        let a = store.insert(new_entry(Direction::Outbound)).await.unwrap();
        let b = store.insert(new_entry(Direction::Outbound)).await.unwrap();
        let batch = store
            .insert_batch(vec![new_entry(Direction::Inbound), new_entry(Direction::Inbound)])
            .await
            .unwrap();

        assert!(a.id < b.id);
        assert!(b.id < batch[0].id);
        assert!(batch[0].id < batch[1].id);
        assert_eq!(store.len(), 4);
    }

    #[tokio::test]
    async fn test_commit_is_all_or_nothing() {
        let store = InMemoryQueueStore::new();
        let mut existing = store.insert(new_entry(Direction::Outbound)).await.unwrap();
        let mut ghost = existing.clone();
        ghost.id = EntryId::new(999);

        existing.fail("boom");
        let mut batch = WriteBatch::new();
        batch.update(existing.clone());
        batch.update(ghost);

        assert!(matches!(
            store.commit(batch).await,
            Err(AppError::NotFound(_))
        ));
        let stored = store.get(existing.id).await.unwrap().unwrap();
        assert_eq!(stored.state, EntryState::NotProcessed);
    }

    #[tokio::test]
    async fn test_query_respects_filter_order_and_limit() {
        let store = InMemoryQueueStore::new();
        for _ in 0..5 {
            store.insert(new_entry(Direction::Outbound)).await.unwrap();
        }
        store.insert(new_entry(Direction::Inbound)).await.unwrap();

        let filter = EntryFilter::pending(
            MessageTypeId::from_name("orders.created"),
            Direction::Outbound,
        )
        .limit(3);
        let rows = store.query(&filter).await.unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows.windows(2).all(|w| w[0].id < w[1].id));

        let inbound = EntryFilter::for_type(MessageTypeId::from_name("orders.created"))
            .direction(Direction::Inbound);
        assert_eq!(store.count(&inbound).await.unwrap(), 1);
    }
}
