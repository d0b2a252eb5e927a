use crate::error::{AppError, Result};
use crate::queue::{EntryId, NewQueueEntry, QueueEntry};
use crate::state::{EntryFilter, QueueStore, WriteBatch};
use async_trait::async_trait;
use chrono::Utc;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::Db;
use std::path::Path;
use std::sync::Arc;

/// Persistent queue store using Sled embedded database
#[derive(Clone)]
pub struct SledQueueStore {
    db: Arc<Db>,
    entries_tree: sled::Tree,
}

impl SledQueueStore {
    /// Create a new Sled store at the specified path
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let db = sled::open(path_ref).map_err(|e| {
            AppError::Store(format!("Failed to open Sled database: {}", e))
        })?;

        let entries_tree = db.open_tree("queue_entries").map_err(|e| {
            AppError::Store(format!("Failed to open queue_entries tree: {}", e))
        })?;

        tracing::info!("Initialized Sled queue store at {:?}", path_ref);

        Ok(Self {
            db: Arc::new(db),
            entries_tree,
        })
    }

    /// Big-endian keys keep tree iteration in id order
    fn entry_key(id: EntryId) -> [u8; 8] {
        id.as_u64().to_be_bytes()
    }

    fn serialize_entry(entry: &QueueEntry) -> Result<Vec<u8>> {
        bincode::serialize(entry).map_err(|e| {
            AppError::Serialization(format!("Failed to serialize queue entry: {}", e))
        })
    }

    fn deserialize_entry(bytes: &[u8]) -> Result<QueueEntry> {
        bincode::deserialize(bytes).map_err(|e| {
            AppError::Serialization(format!("Failed to deserialize queue entry: {}", e))
        })
    }

    fn allocate(&self, entry: NewQueueEntry) -> Result<QueueEntry> {
        // generate_id starts at 0; ids are kept strictly positive
        let raw = self.db.generate_id().map_err(|e| {
            AppError::Store(format!("Failed to generate entry id: {}", e))
        })?;
        Ok(QueueEntry::from_new(EntryId::new(raw + 1), entry, Utc::now()))
    }

    /// Flush pending writes to disk
    pub async fn flush(&self) -> Result<()> {
        self.entries_tree.flush_async().await.map_err(|e| {
            AppError::Store(format!("Failed to flush queue entries: {}", e))
        })?;
        Ok(())
    }

    /// Get database size in bytes
    pub fn size_on_disk(&self) -> Result<u64> {
        self.db.size_on_disk().map_err(|e| {
            AppError::Store(format!("Failed to get database size: {}", e))
        })
    }

    fn scan(&self, filter: &EntryFilter) -> Result<Vec<QueueEntry>> {
        let mut matching = Vec::new();

        for item in self.entries_tree.iter() {
            let (_, bytes) = item.map_err(|e| {
                AppError::Store(format!("Failed to read queue entries: {}", e))
            })?;
            let entry = Self::deserialize_entry(&bytes)?;
            if filter.matches(&entry) {
                matching.push(entry);
                if filter.limit.is_some_and(|limit| matching.len() >= limit) {
                    break;
                }
            }
        }

        Ok(matching)
    }
}

#[async_trait]
impl QueueStore for SledQueueStore {
    async fn insert(&self, entry: NewQueueEntry) -> Result<QueueEntry> {
        let entry = self.allocate(entry)?;
        let value = Self::serialize_entry(&entry)?;

        self.entries_tree
            .insert(Self::entry_key(entry.id), value)
            .map_err(|e| AppError::Store(format!("Failed to insert queue entry: {}", e)))?;
        self.flush().await?;

        tracing::debug!(entry_id = %entry.id, state = %entry.state, "Queue entry saved to Sled");
        Ok(entry)
    }

    async fn insert_batch(&self, entries: Vec<NewQueueEntry>) -> Result<Vec<QueueEntry>> {
        let mut batch = sled::Batch::default();
        let mut created = Vec::with_capacity(entries.len());

        for entry in entries {
            let entry = self.allocate(entry)?;
            batch.insert(&Self::entry_key(entry.id)[..], Self::serialize_entry(&entry)?);
            created.push(entry);
        }

        self.entries_tree
            .apply_batch(batch)
            .map_err(|e| AppError::Store(format!("Failed to insert queue entries: {}", e)))?;
        self.flush().await?;

        Ok(created)
    }

    async fn get(&self, id: EntryId) -> Result<Option<QueueEntry>> {
        match self.entries_tree.get(Self::entry_key(id)) {
            Ok(Some(bytes)) => Ok(Some(Self::deserialize_entry(&bytes)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(AppError::Store(format!("Failed to get queue entry: {}", e))),
        }
    }

    async fn query(&self, filter: &EntryFilter) -> Result<Vec<QueueEntry>> {
        self.scan(filter)
    }

    async fn count(&self, filter: &EntryFilter) -> Result<u64> {
        let unlimited = EntryFilter {
            limit: None,
            ..filter.clone()
        };
        Ok(self.scan(&unlimited)?.len() as u64)
    }

    async fn commit(&self, batch: WriteBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        // Encode outside the transaction closure, which sled may retry
        let mut updates = Vec::with_capacity(batch.updates.len());
        for entry in &batch.updates {
            updates.push((entry.id, Self::entry_key(entry.id), Self::serialize_entry(entry)?));
        }
        let deletes: Vec<[u8; 8]> = batch.deletes.iter().map(|id| Self::entry_key(*id)).collect();

        self.entries_tree
            .transaction(|tx| {
                for (id, key, value) in &updates {
                    if tx.get(&key[..])?.is_none() {
                        return Err(ConflictableTransactionError::Abort(AppError::NotFound(
                            format!("Queue entry {} not found", id),
                        )));
                    }
                    tx.insert(&key[..], value.as_slice())?;
                }
                for key in &deletes {
                    tx.remove(&key[..])?;
                }
                Ok(())
            })
            .map_err(|e| match e {
                TransactionError::Abort(err) => err,
                TransactionError::Storage(err) => {
                    AppError::Store(format!("Failed to commit queue entries: {}", err))
                }
            })?;

        self.flush().await?;

        tracing::debug!(
            updates = batch.updates.len(),
            deletes = batch.deletes.len(),
            "Queue entries committed to Sled"
        );
        Ok(())
    }
}
