use crate::components::{ComponentId, Envelope, StreamingReceiver};
use crate::error::Result;
use crate::message::QueueMessage;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// In-process source with acknowledgement semantics.
///
/// Messages pushed here are handed out one at a time by `begin_receive` and
/// held as in-flight until `end_receive` acks them. A failed admission puts
/// the message back at the front so it is offered again first.
pub struct ChannelReceiver<M> {
    id: ComponentId,
    queue: Mutex<VecDeque<M>>,
    in_flight: Mutex<HashMap<String, M>>,
    next_tag: AtomicU64,
    acked: AtomicU64,
}

impl<M: Clone> ChannelReceiver<M> {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: ComponentId::new(id),
            queue: Mutex::new(VecDeque::new()),
            in_flight: Mutex::new(HashMap::new()),
            next_tag: AtomicU64::new(1),
            acked: AtomicU64::new(0),
        }
    }

    pub fn push(&self, message: M) {
        self.queue.lock().push_back(message);
    }

    /// Messages not yet handed out
    pub fn queued(&self) -> usize {
        self.queue.lock().len()
    }

    /// Messages handed out and awaiting acknowledgement
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }

    pub fn acked(&self) -> u64 {
        self.acked.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl<M> StreamingReceiver<M> for ChannelReceiver<M>
where
    M: QueueMessage + Clone,
{
    fn id(&self) -> ComponentId {
        self.id.clone()
    }

    async fn begin_receive(&self) -> Result<Option<Envelope<M>>> {
        let Some(message) = self.queue.lock().pop_front() else {
            return Ok(None);
        };

        let tag = self.next_tag.fetch_add(1, Ordering::Relaxed).to_string();
        self.in_flight.lock().insert(tag.clone(), message.clone());

        Ok(Some(Envelope::new(message).with_tag(tag)))
    }

    async fn end_receive(&self, insert_succeeded: bool, envelope: &Envelope<M>) -> Result<bool> {
        let Some(tag) = envelope.delivery_tag.as_deref() else {
            return Ok(insert_succeeded);
        };
        let Some(message) = self.in_flight.lock().remove(tag) else {
            return Ok(false);
        };

        if insert_succeeded {
            self.acked.fetch_add(1, Ordering::Relaxed);
            debug!(receiver = %self.id, tag = tag, "Message acknowledged");
            Ok(true)
        } else {
            self.queue.lock().push_front(message);
            debug!(receiver = %self.id, tag = tag, "Message returned to channel");
            Ok(false)
        }
    }
}
