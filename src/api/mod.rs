pub mod handlers;
pub mod routes;

pub use routes::*;

use crate::directory::ServiceDirectory;
use crate::error::{AppError, Result};
use crate::relay::RelayMessage;
use crate::service::MessageService;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub directory: ServiceDirectory,
    pub relays: Arc<HashMap<String, MessageService<RelayMessage>>>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(directory: ServiceDirectory) -> Self {
        Self {
            directory,
            relays: Arc::new(HashMap::new()),
            started_at: Instant::now(),
        }
    }

    /// Expose relay services for enqueueing over HTTP
    pub fn with_relays(mut self, relays: impl IntoIterator<Item = MessageService<RelayMessage>>) -> Self {
        self.relays = Arc::new(
            relays
                .into_iter()
                .map(|service| (service.name().to_string(), service))
                .collect(),
        );
        self
    }

    pub fn relay(&self, name: &str) -> Result<&MessageService<RelayMessage>> {
        self.relays
            .get(name)
            .ok_or_else(|| AppError::NotFound(format!("Relay '{}'", name)))
    }
}
