//! Generic JSON relay hosted by the daemon.
//!
//! Each configured relay is a [`MessageService`] of [`RelayMessage`] whose
//! message type identity is derived from the relay name, so relays sharing a
//! store never see each other's entries.

use crate::components::{ComponentRegistry, WebhookComponent};
use crate::config::{EngineSettings, RelayConfig};
use crate::error::Result;
use crate::message::{MessageTypeId, QueueMessage};
use crate::scheduler::TaskScheduler;
use crate::service::MessageService;
use crate::state::QueueStore;
use crate::status::StatusSink;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use validator::{Validate, ValidationError};

/// Opaque JSON document with optional string headers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct RelayMessage {
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[validate(custom(function = "validate_body"))]
    pub body: serde_json::Value,
}

impl QueueMessage for RelayMessage {
    const MESSAGE_TYPE: &'static str = "relay.message";
}

impl RelayMessage {
    pub fn new(body: serde_json::Value) -> Self {
        Self {
            headers: BTreeMap::new(),
            body,
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

fn validate_body(body: &serde_json::Value) -> std::result::Result<(), ValidationError> {
    if body.is_null() {
        return Err(ValidationError::new("body_required"));
    }
    Ok(())
}

/// Message type identity of a relay's queue
pub fn relay_message_type(name: &str) -> MessageTypeId {
    MessageTypeId::from_name(&format!("relay:{}", name))
}

/// Shared collaborators every relay service is built with
#[derive(Clone)]
pub struct RelayDependencies {
    pub store: Arc<dyn QueueStore>,
    pub scheduler: Arc<dyn TaskScheduler>,
    pub status_sink: Arc<dyn StatusSink>,
    pub settings: EngineSettings,
}

/// Build the message service of one relay with its webhook components
pub fn build_relay_service(
    relay: &RelayConfig,
    deps: &RelayDependencies,
) -> Result<MessageService<RelayMessage>> {
    let mut registry = ComponentRegistry::new();

    if let Some(url) = &relay.outbound_webhook {
        let webhook =
            WebhookComponent::new(format!("{}.outbound-webhook", relay.name), url, relay.timeout_secs)?;
        registry.register_sender(Arc::new(webhook), 0)?;
    }
    if let Some(url) = &relay.inbound_webhook {
        let webhook =
            WebhookComponent::new(format!("{}.inbound-webhook", relay.name), url, relay.timeout_secs)?;
        registry.register_handler(Arc::new(webhook), 0)?;
    }

    MessageService::builder(relay.name.clone())
        .message_type(relay_message_type(&relay.name))
        .store(deps.store.clone())
        .scheduler(deps.scheduler.clone())
        .status_sink(deps.status_sink.clone())
        .settings(deps.settings.clone())
        .registry(registry)
        .build()
}
