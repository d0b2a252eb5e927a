//! Common test utilities for queue engine integration tests
//!
//! Scripted components, a store wrapper that counts and fails writes on
//! demand, and helpers to assemble services around them.

#![allow(dead_code)]

use async_trait::async_trait;
use msgqueue_engine::{
    config::EngineSettings,
    error::{AppError, Result},
    queue::{Direction, EntryId, EntryState, NewQueueEntry, Outcome, QueueEntry},
    scheduler::TokioTaskScheduler,
    state::{EntryFilter, InMemoryQueueStore, QueueStore, WriteBatch},
    status::InMemoryStatusSink,
    BatchReceiver, ComponentId, ComponentRegistry, Delivery, Envelope, Handler, MessageService,
    MessageTypeId, QueueMessage, Sender, StreamingReceiver,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use validator::Validate;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct OrderPlaced {
    pub id: u32,
    #[validate(length(min = 1))]
    pub sku: String,
}

impl QueueMessage for OrderPlaced {
    const MESSAGE_TYPE: &'static str = "tests.order_placed";
}

pub fn order(id: u32) -> OrderPlaced {
    OrderPlaced {
        id,
        sku: format!("SKU-{}", id),
    }
}

pub fn order_type() -> MessageTypeId {
    MessageTypeId::of::<OrderPlaced>()
}

/// What a scripted component does with a message
#[derive(Debug, Clone)]
pub enum Behavior {
    Decline,
    Claim(Outcome, Option<String>),
    /// Claim without reporting anything
    ClaimSilently,
    Fail(String),
}

type Script = Box<dyn Fn(&OrderPlaced, Option<&str>) -> Behavior + Send + Sync>;

/// Sender and handler whose reaction is decided per message by a closure
pub struct ScriptedComponent {
    id: ComponentId,
    script: Script,
    delay: Option<Duration>,
    calls: Mutex<Vec<(u32, Option<String>)>>,
}

impl ScriptedComponent {
    pub fn new(
        id: &str,
        script: impl Fn(&OrderPlaced, Option<&str>) -> Behavior + Send + Sync + 'static,
    ) -> Self {
        Self {
            id: ComponentId::new(id),
            script: Box::new(script),
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn always(id: &str, behavior: Behavior) -> Self {
        Self::new(id, move |_, _| behavior.clone())
    }

    /// Sleep this long (tokio time) on every call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Message ids seen, in call order
    pub fn seen(&self) -> Vec<u32> {
        self.calls.lock().iter().map(|(id, _)| *id).collect()
    }

    /// Continuation tokens seen, in call order
    pub fn continuations(&self) -> Vec<Option<String>> {
        self.calls.lock().iter().map(|(_, token)| token.clone()).collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    async fn act(&self, delivery: &mut Delivery<OrderPlaced>) -> Result<bool> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.calls.lock().push((
            delivery.message().id,
            delivery.continuation().map(str::to_string),
        ));

        match (self.script)(delivery.message(), delivery.continuation()) {
            Behavior::Decline => Ok(false),
            Behavior::Claim(outcome, detail) => {
                delivery.report(outcome, detail);
                Ok(true)
            }
            Behavior::ClaimSilently => Ok(true),
            Behavior::Fail(reason) => Err(AppError::component(self.id.to_string(), reason)),
        }
    }
}

#[async_trait]
impl Sender<OrderPlaced> for ScriptedComponent {
    fn id(&self) -> ComponentId {
        self.id.clone()
    }

    async fn send(&self, delivery: &mut Delivery<OrderPlaced>) -> Result<bool> {
        self.act(delivery).await
    }
}

#[async_trait]
impl Handler<OrderPlaced> for ScriptedComponent {
    fn id(&self) -> ComponentId {
        self.id.clone()
    }

    async fn on_prepare(&self, delivery: &mut Delivery<OrderPlaced>) -> Result<bool> {
        self.act(delivery).await
    }
}

/// Batch receiver handing out queued batches, one per call
pub struct QueuedBatchReceiver {
    id: ComponentId,
    batches: Mutex<VecDeque<Vec<Envelope<OrderPlaced>>>>,
    fail: AtomicBool,
}

impl QueuedBatchReceiver {
    pub fn new(id: &str) -> Self {
        Self {
            id: ComponentId::new(id),
            batches: Mutex::new(VecDeque::new()),
            fail: AtomicBool::new(false),
        }
    }

    pub fn push_batch(&self, batch: Vec<Envelope<OrderPlaced>>) {
        self.batches.lock().push_back(batch);
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl BatchReceiver<OrderPlaced> for QueuedBatchReceiver {
    fn id(&self) -> ComponentId {
        self.id.clone()
    }

    async fn receive_batch(&self) -> Result<Vec<Envelope<OrderPlaced>>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(AppError::component(self.id.to_string(), "broker unreachable"));
        }
        Ok(self.batches.lock().pop_front().unwrap_or_default())
    }
}

/// How a scripted streaming receiver answers `end_receive`
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Ack {
    /// Confirm whenever the tentative write succeeded
    Confirm,
    Reject,
    Error,
}

/// Streaming receiver over a fixed list of envelopes. With `redelivering`
/// a message that was not confirmed goes back to the front of the list, the
/// way a broker hands an unacknowledged message straight back.
pub struct ScriptedStream {
    id: ComponentId,
    pending: Mutex<VecDeque<Envelope<OrderPlaced>>>,
    ack: Mutex<Ack>,
    ends: Mutex<Vec<(u32, bool)>>,
    redeliver: bool,
    begins: AtomicUsize,
}

impl ScriptedStream {
    pub fn new(id: &str, ack: Ack, messages: impl IntoIterator<Item = Envelope<OrderPlaced>>) -> Self {
        Self {
            id: ComponentId::new(id),
            pending: Mutex::new(messages.into_iter().collect()),
            ack: Mutex::new(ack),
            ends: Mutex::new(Vec::new()),
            redeliver: false,
            begins: AtomicUsize::new(0),
        }
    }

    pub fn redelivering(mut self) -> Self {
        self.redeliver = true;
        self
    }

    /// Number of `begin_receive` calls that handed out a message
    pub fn begins(&self) -> usize {
        self.begins.load(Ordering::SeqCst)
    }

    pub fn set_ack(&self, ack: Ack) {
        *self.ack.lock() = ack;
    }

    /// `(message id, insert_succeeded)` of every `end_receive` call
    pub fn ends(&self) -> Vec<(u32, bool)> {
        self.ends.lock().clone()
    }

    pub fn remaining(&self) -> usize {
        self.pending.lock().len()
    }
}

#[async_trait]
impl StreamingReceiver<OrderPlaced> for ScriptedStream {
    fn id(&self) -> ComponentId {
        self.id.clone()
    }

    async fn begin_receive(&self) -> Result<Option<Envelope<OrderPlaced>>> {
        let next = self.pending.lock().pop_front();
        if next.is_some() {
            self.begins.fetch_add(1, Ordering::SeqCst);
        }
        Ok(next)
    }

    async fn end_receive(&self, insert_succeeded: bool, envelope: &Envelope<OrderPlaced>) -> Result<bool> {
        self.ends.lock().push((envelope.message.id, insert_succeeded));
        let ack = *self.ack.lock();
        let confirmed = match ack {
            Ack::Confirm => insert_succeeded,
            Ack::Reject => false,
            Ack::Error => return Err(AppError::component(self.id.to_string(), "channel closed")),
        };
        if !confirmed && self.redeliver {
            self.pending.lock().push_front(envelope.clone());
        }
        Ok(confirmed)
    }
}

/// Store wrapper counting writes and failing them on demand
#[derive(Default)]
pub struct RecordingStore {
    inner: InMemoryQueueStore,
    pub commits: Mutex<Vec<usize>>,
    pub insert_batches: Mutex<Vec<usize>>,
    pub saves: AtomicUsize,
    pub fail_inserts: AtomicBool,
    pub fail_commits: AtomicBool,
    pub fail_queries: AtomicBool,
}

impl RecordingStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn commit_sizes(&self) -> Vec<usize> {
        self.commits.lock().clone()
    }

    pub fn insert_batch_sizes(&self) -> Vec<usize> {
        self.insert_batches.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    fn check(flag: &AtomicBool, what: &str) -> Result<()> {
        if flag.load(Ordering::SeqCst) {
            return Err(AppError::Store(format!("{} unavailable", what)));
        }
        Ok(())
    }
}

#[async_trait]
impl QueueStore for RecordingStore {
    async fn insert(&self, entry: NewQueueEntry) -> Result<QueueEntry> {
        Self::check(&self.fail_inserts, "insert")?;
        self.inner.insert(entry).await
    }

    async fn insert_batch(&self, entries: Vec<NewQueueEntry>) -> Result<Vec<QueueEntry>> {
        Self::check(&self.fail_inserts, "insert")?;
        self.insert_batches.lock().push(entries.len());
        self.inner.insert_batch(entries).await
    }

    async fn get(&self, id: EntryId) -> Result<Option<QueueEntry>> {
        self.inner.get(id).await
    }

    async fn query(&self, filter: &EntryFilter) -> Result<Vec<QueueEntry>> {
        Self::check(&self.fail_queries, "query")?;
        self.inner.query(filter).await
    }

    async fn count(&self, filter: &EntryFilter) -> Result<u64> {
        Self::check(&self.fail_queries, "query")?;
        self.inner.count(filter).await
    }

    async fn commit(&self, batch: WriteBatch) -> Result<()> {
        Self::check(&self.fail_commits, "commit")?;
        self.commits.lock().push(batch.len());
        self.inner.commit(batch).await
    }

    async fn save(&self, entry: &QueueEntry) -> Result<()> {
        Self::check(&self.fail_commits, "commit")?;
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.inner.save(entry).await
    }
}

pub fn test_settings() -> EngineSettings {
    EngineSettings {
        trigger_delay: Duration::from_secs(5),
        ..EngineSettings::default()
    }
}

/// Service over `store` with a tokio scheduler and a recording status sink
pub fn build_service(
    name: &str,
    store: Arc<dyn QueueStore>,
    registry: ComponentRegistry<OrderPlaced>,
    settings: EngineSettings,
) -> (MessageService<OrderPlaced>, Arc<TokioTaskScheduler>, Arc<InMemoryStatusSink>) {
    let scheduler = Arc::new(TokioTaskScheduler::new());
    let sink = Arc::new(InMemoryStatusSink::new());
    let service = MessageService::builder(name)
        .store(store)
        .registry(registry)
        .scheduler(scheduler.clone())
        .status_sink(sink.clone())
        .settings(settings)
        .build()
        .unwrap();
    (service, scheduler, sink)
}

/// Insert pending rows for `ids` straight into the store
pub async fn seed(store: &dyn QueueStore, direction: Direction, ids: impl IntoIterator<Item = u32>) -> Vec<EntryId> {
    let mut created = Vec::new();
    for id in ids {
        let payload = serde_json::to_string(&order(id)).unwrap();
        let entry = store
            .insert(NewQueueEntry::pending(order_type(), direction, payload))
            .await
            .unwrap();
        created.push(entry.id);
    }
    created
}

/// All rows of the test type in id order
pub async fn rows(store: &dyn QueueStore) -> Vec<QueueEntry> {
    store.query(&EntryFilter::for_type(order_type())).await.unwrap()
}

pub async fn states(store: &dyn QueueStore) -> Vec<EntryState> {
    rows(store).await.into_iter().map(|entry| entry.state).collect()
}

/// Map from message id to its row
pub async fn rows_by_message(store: &dyn QueueStore) -> HashMap<u32, QueueEntry> {
    rows(store)
        .await
        .into_iter()
        .map(|entry| {
            let message: OrderPlaced = serde_json::from_str(&entry.payload).unwrap();
            (message.id, entry)
        })
        .collect()
}

/// Helper to parse Prometheus exposition format into metric name -> lines
pub fn parse_prometheus_output(output: &str) -> HashMap<String, Vec<String>> {
    let mut metrics: HashMap<String, Vec<String>> = HashMap::new();
    let mut current_metric = String::new();

    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if line.starts_with("# HELP") || line.starts_with("# TYPE") {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() >= 3 {
                current_metric = parts[2].to_string();
                metrics.entry(current_metric.clone()).or_default().push(line.to_string());
            }
        } else if !current_metric.is_empty() {
            metrics.entry(current_metric.clone()).or_default().push(line.to_string());
        }
    }

    metrics
}
