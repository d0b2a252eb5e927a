//! Durable message queue engine.
//!
//! Messages are persisted as queue entries before anything else happens to
//! them. Three pipelines per message type then move the entries through their
//! lifecycle:
//!
//! - **outbound** hands pending outbound entries to the registered senders
//! - **receive** pulls messages from receivers into the store
//! - **handle** hands pending inbound entries to the registered handlers
//!
//! Components claim a message by returning `true` and report a
//! [`queue::Outcome`]; a `Repeat` outcome binds the entry to that component
//! until it reports something else.

pub mod api;
pub mod components;
pub mod config;
pub mod directory;
pub mod error;
pub mod gate;
pub mod message;
pub mod metrics;
pub mod pipeline;
pub mod queue;
pub mod relay;
pub mod scheduler;
pub mod service;
pub mod state;
pub mod status;

pub use components::{
    BatchReceiver, ComponentId, ComponentRegistry, Delivery, Envelope, Handler, Sender,
    StreamingReceiver,
};
pub use config::{Config, EngineSettings};
pub use directory::{ManagedService, ServiceDirectory};
pub use error::{AppError, Result};
pub use gate::PipelineKind;
pub use message::{JsonCodec, MessageTypeId, PayloadCodec, QueueMessage};
pub use pipeline::{RunOutcome, RunReport, RunStats};
pub use queue::{Direction, EntryId, EntryState, Outcome, QueueEntry};
pub use scheduler::{TaskScheduler, TokioTaskScheduler};
pub use service::{MessageService, MessageServiceBuilder, PendingCounts};
pub use state::{InMemoryQueueStore, QueueStore};
pub use status::{ServiceStatus, StatusReport, StatusSink};
