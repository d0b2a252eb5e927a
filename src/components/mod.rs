//! Pluggable sender, receiver and handler contracts.
//!
//! A component claims a message by returning `Ok(true)` and reports what
//! happened through the [`Delivery`] it was handed. `Ok(false)` passes the
//! message on to the next candidate. `Err` is treated the same as `Ok(false)`
//! by the pipelines, after logging.

pub mod channel;
pub mod registry;
pub mod webhook;

pub use channel::ChannelReceiver;
pub use registry::{ComponentRegistry, Registered};
pub use webhook::WebhookComponent;

use crate::error::Result;
use crate::message::{MessageTypeId, QueueMessage};
use crate::queue::{EntryId, EntryState, Outcome, QueueEntry};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Stable identity of a component, persisted as an entry's bound handler
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComponentId(String);

impl ComponentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ComponentId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Delivers outbound messages to an external system
#[async_trait]
pub trait Sender<M: QueueMessage>: Send + Sync {
    fn id(&self) -> ComponentId;

    async fn send(&self, delivery: &mut Delivery<M>) -> Result<bool>;
}

/// Processes inbound messages locally
#[async_trait]
pub trait Handler<M: QueueMessage>: Send + Sync {
    fn id(&self) -> ComponentId;

    async fn on_prepare(&self, delivery: &mut Delivery<M>) -> Result<bool>;
}

/// Pulls a finite batch from a source that already owns redelivery
#[async_trait]
pub trait BatchReceiver<M: QueueMessage>: Send + Sync {
    fn id(&self) -> ComponentId;

    async fn receive_batch(&self) -> Result<Vec<Envelope<M>>>;
}

/// Pulls messages one at a time with an explicit confirmation round-trip.
///
/// `end_receive` is always called after `begin_receive` returned an envelope,
/// with `insert_succeeded = false` when the tentative write failed. Returning
/// `Ok(true)` confirms the admission; anything else rolls it back.
#[async_trait]
pub trait StreamingReceiver<M: QueueMessage>: Send + Sync {
    fn id(&self) -> ComponentId;

    async fn begin_receive(&self) -> Result<Option<Envelope<M>>>;

    async fn end_receive(&self, insert_succeeded: bool, envelope: &Envelope<M>) -> Result<bool>;
}

/// The two receive shapes a receiver may implement
pub enum ReceiverKind<M: QueueMessage> {
    Batch(Arc<dyn BatchReceiver<M>>),
    Streaming(Arc<dyn StreamingReceiver<M>>),
}

impl<M: QueueMessage> ReceiverKind<M> {
    pub fn id(&self) -> ComponentId {
        match self {
            ReceiverKind::Batch(receiver) => receiver.id(),
            ReceiverKind::Streaming(receiver) => receiver.id(),
        }
    }
}

impl<M: QueueMessage> Clone for ReceiverKind<M> {
    fn clone(&self) -> Self {
        match self {
            ReceiverKind::Batch(receiver) => ReceiverKind::Batch(Arc::clone(receiver)),
            ReceiverKind::Streaming(receiver) => ReceiverKind::Streaming(Arc::clone(receiver)),
        }
    }
}

/// A decoded queue entry offered to a sender or handler
#[derive(Debug)]
pub struct Delivery<M> {
    entry_id: EntryId,
    message_type: MessageTypeId,
    message: M,
    continuation: Option<String>,
    outcome: Outcome,
    detail: Option<String>,
}

impl<M> Delivery<M> {
    pub fn new(entry: &QueueEntry, message: M) -> Self {
        let continuation = match entry.state {
            EntryState::Repeat => entry.state_detail.clone(),
            _ => None,
        };

        Self {
            entry_id: entry.id,
            message_type: entry.message_type,
            message,
            continuation,
            outcome: Outcome::NotHandled,
            detail: None,
        }
    }

    pub fn entry_id(&self) -> EntryId {
        self.entry_id
    }

    pub fn message_type(&self) -> MessageTypeId {
        self.message_type
    }

    pub fn message(&self) -> &M {
        &self.message
    }

    /// Token the bound component stored when it last asked for a repeat
    pub fn continuation(&self) -> Option<&str> {
        self.continuation.as_deref()
    }

    pub fn complete(&mut self) {
        self.report(Outcome::Completed, None);
    }

    /// Ask to be called again on the next run; `token` comes back through
    /// [`Delivery::continuation`]
    pub fn repeat(&mut self, token: Option<String>) {
        self.report(Outcome::Repeat, token);
    }

    pub fn fail(&mut self, reason: impl Into<String>) {
        self.report(Outcome::Error, Some(reason.into()));
    }

    pub fn report(&mut self, outcome: Outcome, detail: Option<String>) {
        self.outcome = outcome;
        self.detail = detail;
    }

    pub fn outcome(&self) -> Outcome {
        self.outcome
    }

    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    /// Clear whatever a previous, unsuccessful candidate reported
    pub(crate) fn reset_report(&mut self) {
        self.outcome = Outcome::NotHandled;
        self.detail = None;
    }

    pub(crate) fn take_report(&mut self) -> (Outcome, Option<String>) {
        (
            std::mem::take(&mut self.outcome),
            std::mem::take(&mut self.detail),
        )
    }
}

/// A message pulled from an external source by a receiver
#[derive(Debug, Clone)]
pub struct Envelope<M> {
    pub message: M,
    /// Sub-result declared by the receiver; `None` admits the entry for handlers
    pub disposition: Option<Outcome>,
    pub detail: Option<String>,
    /// Receiver-private correlation such as an acknowledgement handle
    pub delivery_tag: Option<String>,
}

impl<M> Envelope<M> {
    pub fn new(message: M) -> Self {
        Self {
            message,
            disposition: None,
            detail: None,
            delivery_tag: None,
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.delivery_tag = Some(tag.into());
        self
    }

    pub fn with_disposition(mut self, outcome: Outcome, detail: Option<String>) -> Self {
        self.disposition = Some(outcome);
        self.detail = detail;
        self
    }

    /// State the entry takes once admission is confirmed.
    ///
    /// `Repeat` admits as `NotProcessed`: no handler owns the entry yet.
    pub fn admitted_state(&self) -> EntryState {
        match self.disposition {
            None | Some(Outcome::Repeat) => EntryState::NotProcessed,
            Some(outcome) => outcome.entry_state(),
        }
    }
}
