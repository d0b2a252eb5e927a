use crate::components::{ComponentId, Delivery, Handler, Sender};
use crate::error::{AppError, Result};
use crate::message::QueueMessage;
use crate::queue::Outcome;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::time::Duration;
use tracing::{error, info, warn};

/// Posts queue entries to an HTTP endpoint.
///
/// Works as a sender for outbound relays and as a handler for inbound ones.
/// The response status decides the reported outcome; transport failures
/// surface as errors so the next candidate gets a chance.
#[derive(Clone)]
pub struct WebhookComponent {
    id: ComponentId,
    url: String,
    pub(crate) client: Client,
    pub(crate) timeout_secs: u64,
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a, M> {
    message_type: String,
    entry_id: u64,
    timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    continuation: Option<&'a str>,
    message: &'a M,
}

impl WebhookComponent {
    /// Create a new webhook component
    pub fn new(id: impl Into<String>, url: impl Into<String>, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| AppError::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            id: ComponentId::new(id),
            url: url.into(),
            client,
            timeout_secs,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn build_payload<'a, M>(&self, delivery: &'a Delivery<M>) -> WebhookPayload<'a, M> {
        WebhookPayload {
            message_type: delivery.message_type().to_string(),
            entry_id: delivery.entry_id().as_u64(),
            timestamp: Utc::now().to_rfc3339(),
            continuation: delivery.continuation(),
            message: delivery.message(),
        }
    }

    async fn deliver<M: Serialize>(&self, delivery: &mut Delivery<M>) -> Result<bool> {
        let payload = self.build_payload(delivery);

        let response = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .header("User-Agent", concat!("msgqueue-engine/", env!("CARGO_PKG_VERSION")))
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                let message = if e.is_timeout() {
                    format!("Webhook request timed out after {} seconds", self.timeout_secs)
                } else if e.is_connect() {
                    format!("Failed to connect to webhook URL: {}", e)
                } else {
                    format!("Webhook request failed: {}", e)
                };
                error!(
                    component = %self.id,
                    entry_id = %delivery.entry_id(),
                    url = %self.url,
                    error = %message,
                    "Webhook delivery failed"
                );
                AppError::component(self.id.as_str(), message)
            })?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let (outcome, detail) = classify(status, &body);

        match outcome {
            Outcome::Completed => info!(
                component = %self.id,
                entry_id = %delivery.entry_id(),
                status = status.as_u16(),
                "Webhook delivered"
            ),
            _ => warn!(
                component = %self.id,
                entry_id = %delivery.entry_id(),
                status = status.as_u16(),
                outcome = %outcome,
                "Webhook rejected delivery"
            ),
        }

        delivery.report(outcome, detail);
        Ok(true)
    }
}

/// Map an HTTP response onto the outcome reported for the entry
pub fn classify(status: StatusCode, body: &str) -> (Outcome, Option<String>) {
    let describe = || {
        if body.is_empty() {
            format!("HTTP {}", status.as_u16())
        } else {
            format!("HTTP {}: {}", status.as_u16(), body)
        }
    };

    if status.is_success() {
        (Outcome::Completed, None)
    } else if status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
    {
        (Outcome::Repeat, Some(describe()))
    } else {
        (Outcome::Error, Some(describe()))
    }
}

#[async_trait]
impl<M> Sender<M> for WebhookComponent
where
    M: QueueMessage + Serialize,
{
    fn id(&self) -> ComponentId {
        self.id.clone()
    }

    async fn send(&self, delivery: &mut Delivery<M>) -> Result<bool> {
        self.deliver(delivery).await
    }
}

#[async_trait]
impl<M> Handler<M> for WebhookComponent
where
    M: QueueMessage + Serialize,
{
    fn id(&self) -> ComponentId {
        self.id.clone()
    }

    async fn on_prepare(&self, delivery: &mut Delivery<M>) -> Result<bool> {
        self.deliver(delivery).await
    }
}
