//! Explicit registry of the message services hosted by a process.

use crate::error::{AppError, Result};
use crate::message::{MessageTypeId, QueueMessage};
use crate::pipeline::RunReport;
use crate::service::{MessageService, PendingCounts};
use crate::status::StatusReport;
use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};

/// Type-erased view of a [`MessageService`]
#[async_trait]
pub trait ManagedService: Send + Sync {
    fn name(&self) -> &str;

    fn message_type(&self) -> MessageTypeId;

    async fn start(&self) -> Result<()>;

    async fn stop(&self) -> Result<()>;

    async fn run_all(&self) -> Vec<RunReport>;

    async fn pending_counts(&self) -> Result<PendingCounts>;

    fn status(&self) -> Option<StatusReport>;
}

#[async_trait]
impl<M: QueueMessage> ManagedService for MessageService<M> {
    fn name(&self) -> &str {
        MessageService::name(self)
    }

    fn message_type(&self) -> MessageTypeId {
        MessageService::message_type(self)
    }

    async fn start(&self) -> Result<()> {
        MessageService::start(self).await
    }

    async fn stop(&self) -> Result<()> {
        MessageService::stop(self).await
    }

    async fn run_all(&self) -> Vec<RunReport> {
        MessageService::run_all(self).await
    }

    async fn pending_counts(&self) -> Result<PendingCounts> {
        MessageService::pending_counts(self).await
    }

    fn status(&self) -> Option<StatusReport> {
        MessageService::status(self)
    }
}

/// Point-in-time view of one service
#[derive(Debug, Clone, Serialize)]
pub struct ServiceSnapshot {
    pub name: String,
    pub message_type: String,
    pub status: Option<StatusReport>,
    /// `None` when the store could not be queried
    pub pending: Option<PendingCounts>,
}

/// Result of a fan-out tick for one service
#[derive(Debug, Clone, Serialize)]
pub struct TickReport {
    pub service: String,
    pub runs: Vec<RunReport>,
}

/// Services known to this process, handed to whoever needs to enumerate them
#[derive(Clone, Default)]
pub struct ServiceDirectory {
    services: Arc<RwLock<Vec<Arc<dyn ManagedService>>>>,
}

impl ServiceDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a service. Names and message types must be unique.
    pub fn register(&self, service: Arc<dyn ManagedService>) -> Result<()> {
        let mut services = self.services.write();

        if let Some(existing) = services
            .iter()
            .find(|s| s.name() == service.name() || s.message_type() == service.message_type())
        {
            return Err(AppError::Validation(format!(
                "Service '{}' ({}) conflicts with registered service '{}' ({})",
                service.name(),
                service.message_type(),
                existing.name(),
                existing.message_type()
            )));
        }

        info!(service = service.name(), message_type = %service.message_type(), "Service registered");
        services.push(service);
        Ok(())
    }

    pub fn find(&self, name: &str) -> Option<Arc<dyn ManagedService>> {
        self.services.read().iter().find(|s| s.name() == name).cloned()
    }

    pub fn services(&self) -> Vec<Arc<dyn ManagedService>> {
        self.services.read().clone()
    }

    pub fn len(&self) -> usize {
        self.services.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.read().is_empty()
    }

    /// Start every service, stopping at the first failure
    pub async fn start_all(&self) -> Result<()> {
        for service in self.services() {
            service.start().await?;
        }
        Ok(())
    }

    /// Stop every service; failures are logged and do not stop the others
    pub async fn stop_all(&self) {
        for service in self.services() {
            if let Err(e) = service.stop().await {
                error!(service = service.name(), error = %e, "Failed to stop service");
            }
        }
    }

    /// Run every pipeline of every service now
    pub async fn tick_all(&self) -> Vec<TickReport> {
        let services = self.services();
        join_all(services.iter().map(|service| async move {
            TickReport {
                service: service.name().to_string(),
                runs: service.run_all().await,
            }
        }))
        .await
    }

    pub async fn snapshots(&self) -> Vec<ServiceSnapshot> {
        let mut snapshots = Vec::new();
        for service in self.services() {
            let pending = match service.pending_counts().await {
                Ok(pending) => Some(pending),
                Err(e) => {
                    error!(service = service.name(), error = %e, "Failed to count pending entries");
                    None
                }
            };
            snapshots.push(ServiceSnapshot {
                name: service.name().to_string(),
                message_type: service.message_type().to_string(),
                status: service.status(),
                pending,
            });
        }
        snapshots
    }
}
