use crate::config::{StateBackend, StateConfig};
use crate::error::{AppError, Result};
use crate::state::{InMemoryQueueStore, QueueStore, SledQueueStore};
use std::sync::Arc;

/// Create a queue store based on configuration
pub fn create_store(config: &StateConfig) -> Result<Arc<dyn QueueStore>> {
    match config.backend {
        StateBackend::Sled => {
            let path = config.path.as_ref().ok_or_else(|| {
                AppError::Configuration("Sled backend requires 'path' configuration".to_string())
            })?;

            tracing::info!(path = ?path, "Initializing Sled queue store");

            let store = SledQueueStore::new(path)?;
            Ok(Arc::new(store))
        }

        StateBackend::Memory => {
            tracing::warn!("In-memory queue store selected; entries are lost on restart");
            Ok(create_in_memory_store())
        }
    }
}

/// Create an in-memory store (for testing and development)
pub fn create_in_memory_store() -> Arc<dyn QueueStore> {
    tracing::info!("Initializing in-memory queue store");
    Arc::new(InMemoryQueueStore::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::EntryFilter;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_create_sled_store() {
        let temp_dir = TempDir::new().unwrap();
        let config = StateConfig {
            backend: StateBackend::Sled,
            path: Some(temp_dir.path().to_path_buf()),
        };

        let store = create_store(&config).unwrap();
        assert_eq!(store.count(&EntryFilter::default()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_create_in_memory_store() {
        let store = create_in_memory_store();
        assert!(store.count(&EntryFilter::default()).await.is_ok());
    }

    #[test]
    fn test_sled_requires_path() {
        let config = StateConfig {
            backend: StateBackend::Sled,
            path: None,
        };

        assert!(create_store(&config).is_err());
    }
}
