use crate::components::{
    BatchReceiver, ComponentId, Handler, ReceiverKind, Sender, StreamingReceiver,
};
use crate::error::{AppError, Result};
use crate::message::QueueMessage;
use std::sync::Arc;
use tracing::info;

/// A component with its identity and ordering priority
pub struct Registered<C> {
    pub id: ComponentId,
    /// Lower runs first; ties keep registration order
    pub priority: i32,
    pub component: C,
}

/// Ordered senders, receivers and handlers for one message type.
///
/// Built by the composition root and frozen when the owning service is
/// constructed; pipelines only read the resolved lists.
pub struct ComponentRegistry<M: QueueMessage> {
    senders: Vec<Registered<Arc<dyn Sender<M>>>>,
    receivers: Vec<Registered<ReceiverKind<M>>>,
    handlers: Vec<Registered<Arc<dyn Handler<M>>>>,
}

impl<M: QueueMessage> ComponentRegistry<M> {
    pub fn new() -> Self {
        Self {
            senders: Vec::new(),
            receivers: Vec::new(),
            handlers: Vec::new(),
        }
    }

    pub fn register_sender(&mut self, sender: Arc<dyn Sender<M>>, priority: i32) -> Result<()> {
        let id = sender.id();
        insert_ordered(&mut self.senders, "sender", id, priority, sender)
    }

    pub fn register_handler(&mut self, handler: Arc<dyn Handler<M>>, priority: i32) -> Result<()> {
        let id = handler.id();
        insert_ordered(&mut self.handlers, "handler", id, priority, handler)
    }

    pub fn register_batch_receiver(
        &mut self,
        receiver: Arc<dyn BatchReceiver<M>>,
        priority: i32,
    ) -> Result<()> {
        let id = receiver.id();
        insert_ordered(
            &mut self.receivers,
            "receiver",
            id,
            priority,
            ReceiverKind::Batch(receiver),
        )
    }

    pub fn register_streaming_receiver(
        &mut self,
        receiver: Arc<dyn StreamingReceiver<M>>,
        priority: i32,
    ) -> Result<()> {
        let id = receiver.id();
        insert_ordered(
            &mut self.receivers,
            "receiver",
            id,
            priority,
            ReceiverKind::Streaming(receiver),
        )
    }

    pub fn with_sender(mut self, sender: Arc<dyn Sender<M>>, priority: i32) -> Result<Self> {
        self.register_sender(sender, priority)?;
        Ok(self)
    }

    pub fn with_handler(mut self, handler: Arc<dyn Handler<M>>, priority: i32) -> Result<Self> {
        self.register_handler(handler, priority)?;
        Ok(self)
    }

    pub fn senders(&self) -> &[Registered<Arc<dyn Sender<M>>>] {
        &self.senders
    }

    pub fn receivers(&self) -> &[Registered<ReceiverKind<M>>] {
        &self.receivers
    }

    pub fn handlers(&self) -> &[Registered<Arc<dyn Handler<M>>>] {
        &self.handlers
    }

    /// Senders to offer an entry to; a bound entry only sees its own sender
    pub fn sender_candidates(
        &self,
        bound: Option<&ComponentId>,
    ) -> Vec<&Registered<Arc<dyn Sender<M>>>> {
        candidates(&self.senders, bound)
    }

    /// Handlers to offer an entry to; a bound entry only sees its own handler
    pub fn handler_candidates(
        &self,
        bound: Option<&ComponentId>,
    ) -> Vec<&Registered<Arc<dyn Handler<M>>>> {
        candidates(&self.handlers, bound)
    }

    pub fn is_empty(&self) -> bool {
        self.senders.is_empty() && self.receivers.is_empty() && self.handlers.is_empty()
    }
}

impl<M: QueueMessage> Default for ComponentRegistry<M> {
    fn default() -> Self {
        Self::new()
    }
}

fn insert_ordered<C>(
    list: &mut Vec<Registered<C>>,
    role: &str,
    id: ComponentId,
    priority: i32,
    component: C,
) -> Result<()> {
    if list.iter().any(|registered| registered.id == id) {
        return Err(AppError::Validation(format!(
            "A {} with id '{}' is already registered",
            role, id
        )));
    }

    info!(component = %id, role = role, priority = priority, "Registering component");

    list.push(Registered {
        id,
        priority,
        component,
    });
    // stable sort keeps registration order among equal priorities
    list.sort_by_key(|registered| registered.priority);
    Ok(())
}

fn candidates<'a, C>(
    list: &'a [Registered<C>],
    bound: Option<&ComponentId>,
) -> Vec<&'a Registered<C>> {
    match bound {
        Some(id) => list.iter().filter(|registered| &registered.id == id).collect(),
        None => list.iter().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::Delivery;
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};
    use validator::Validate;

    #[derive(Debug, Serialize, Deserialize)]
    struct Ping;

    impl Validate for Ping {
        fn validate(&self) -> std::result::Result<(), validator::ValidationErrors> {
            Ok(())
        }
    }

    impl QueueMessage for Ping {
        const MESSAGE_TYPE: &'static str = "test.ping";
    }

    struct NamedSender(&'static str);

    #[async_trait]
    impl Sender<Ping> for NamedSender {
        fn id(&self) -> ComponentId {
            ComponentId::new(self.0)
        }

        async fn send(&self, _delivery: &mut Delivery<Ping>) -> Result<bool> {
            Ok(false)
        }
    }

    fn ids(list: &[&Registered<Arc<dyn Sender<Ping>>>]) -> Vec<String> {
        list.iter().map(|r| r.id.to_string()).collect()
    }

    #[test]
    fn test_senders_ordered_by_priority_then_registration() {
        let mut registry = ComponentRegistry::<Ping>::new();
        registry.register_sender(Arc::new(NamedSender("late")), 20).unwrap();
        registry.register_sender(Arc::new(NamedSender("first")), 10).unwrap();
        registry.register_sender(Arc::new(NamedSender("second")), 10).unwrap();

        assert_eq!(
            ids(&registry.sender_candidates(None)),
            vec!["first", "second", "late"]
        );
    }

    #[test]
    fn test_bound_entry_narrows_to_single_sender() {
        let registry = ComponentRegistry::<Ping>::new()
            .with_sender(Arc::new(NamedSender("smtp")), 0)
            .unwrap()
            .with_sender(Arc::new(NamedSender("sms")), 1)
            .unwrap();

        let bound = ComponentId::new("sms");
        assert_eq!(ids(&registry.sender_candidates(Some(&bound))), vec!["sms"]);

        let gone = ComponentId::new("fax");
        assert!(registry.sender_candidates(Some(&gone)).is_empty());
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let mut registry = ComponentRegistry::<Ping>::new();
        registry.register_sender(Arc::new(NamedSender("smtp")), 0).unwrap();
        let err = registry
            .register_sender(Arc::new(NamedSender("smtp")), 5)
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }
}
