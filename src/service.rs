//! One message type's queue: enqueue entry points, the three pipelines and
//! their scheduling, and status reporting.

use crate::components::ComponentRegistry;
use crate::config::EngineSettings;
use crate::error::{AppError, Result};
use crate::gate::{ConcurrencyGate, PipelineKind};
use crate::message::{JsonCodec, MessageTypeId, PayloadCodec, QueueMessage};
use crate::metrics::PIPELINE_METRICS;
use crate::pipeline::{
    HandlePipeline, OutboundPipeline, PipelineContext, ReceivePipeline, RunReport,
};
use crate::queue::{Direction, NewQueueEntry};
use crate::scheduler::{Task, TaskScheduler, TokioTaskScheduler};
use crate::state::{EntryFilter, QueueStore};
use crate::status::{StatusReport, StatusSink, StatusTracker, TracingStatusSink};
use futures::FutureExt;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, warn};
use validator::Validate;

/// Entries waiting in each direction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PendingCounts {
    pub outbound: u64,
    pub inbound: u64,
}

/// Queue engine for one message type.
///
/// Cloning is cheap; all clones drive the same pipelines.
pub struct MessageService<M: QueueMessage> {
    inner: Arc<ServiceInner<M>>,
}

impl<M: QueueMessage> Clone for MessageService<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct ServiceInner<M: QueueMessage> {
    ctx: Arc<PipelineContext<M>>,
    outbound: OutboundPipeline<M>,
    receive: ReceivePipeline<M>,
    handle: HandlePipeline<M>,
    scheduler: Arc<dyn TaskScheduler>,
    status: StatusTracker,
    started: AtomicBool,
    this: Weak<ServiceInner<M>>,
}

impl<M> MessageService<M>
where
    M: QueueMessage + Serialize + DeserializeOwned,
{
    /// Builder using the JSON payload codec
    pub fn builder(name: impl Into<String>) -> MessageServiceBuilder<M> {
        MessageServiceBuilder::with_codec(name, Arc::new(JsonCodec::<M>::new()))
    }
}

impl<M: QueueMessage> MessageService<M> {
    pub fn name(&self) -> &str {
        &self.inner.ctx.service
    }

    pub fn message_type(&self) -> MessageTypeId {
        self.inner.ctx.message_type
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.inner.ctx.settings
    }

    /// Queue a message for the senders. Returns false, after logging, when
    /// the message is invalid or could not be persisted.
    pub async fn enqueue_outbound(&self, message: &M) -> bool {
        self.inner.enqueue(message, Direction::Outbound).await
    }

    /// Queue a message for the handlers. Returns false, after logging, when
    /// the message is invalid or could not be persisted.
    pub async fn enqueue_inbound(&self, message: &M) -> bool {
        self.inner.enqueue(message, Direction::Inbound).await
    }

    pub async fn pending_outbound_count(&self) -> Result<u64> {
        self.inner.pending_count(Direction::Outbound).await
    }

    pub async fn pending_inbound_count(&self) -> Result<u64> {
        self.inner.pending_count(Direction::Inbound).await
    }

    pub async fn pending_counts(&self) -> Result<PendingCounts> {
        Ok(PendingCounts {
            outbound: self.pending_outbound_count().await?,
            inbound: self.pending_inbound_count().await?,
        })
    }

    pub async fn run_outbound(&self) -> RunReport {
        self.inner.run(PipelineKind::Outbound).await
    }

    pub async fn run_receive(&self) -> RunReport {
        self.inner.run(PipelineKind::Receive).await
    }

    pub async fn run_handle(&self) -> RunReport {
        self.inner.run(PipelineKind::Handle).await
    }

    /// Run all three pipelines concurrently
    pub async fn run_all(&self) -> Vec<RunReport> {
        let (outbound, receive, handle) =
            tokio::join!(self.run_outbound(), self.run_receive(), self.run_handle());
        vec![outbound, receive, handle]
    }

    /// Register the periodic jobs of every pipeline
    pub async fn start(&self) -> Result<()> {
        self.inner.start().await
    }

    /// Unregister every job of this service and report shutdown. Runs in
    /// progress are not interrupted.
    pub async fn stop(&self) -> Result<()> {
        self.inner.stop().await
    }

    pub fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> Option<StatusReport> {
        self.inner.status.current()
    }

    /// Scheduler job name of a pipeline's periodic tick
    pub fn job_name(&self, kind: PipelineKind) -> String {
        periodic_job_name(self.name(), kind)
    }

    /// Scheduler job name of a pipeline's one-shot trigger
    pub fn trigger_name(&self, kind: PipelineKind) -> String {
        trigger_job_name(self.name(), kind)
    }
}

fn periodic_job_name(service: &str, kind: PipelineKind) -> String {
    format!("{}.{}", service, kind)
}

fn trigger_job_name(service: &str, kind: PipelineKind) -> String {
    format!("{}.{}.trigger", service, kind)
}

impl<M: QueueMessage> ServiceInner<M> {
    async fn enqueue(&self, message: &M, direction: Direction) -> bool {
        let ctx = &self.ctx;

        if let Err(e) = message.validate() {
            warn!(service = %ctx.service, direction = %direction, error = %e, "Rejected invalid message");
            return false;
        }

        let payload = match ctx.codec.encode(message) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(service = %ctx.service, direction = %direction, error = %e, "Failed to encode message");
                return false;
            }
        };

        if payload.len() > ctx.settings.max_payload_bytes {
            warn!(
                service = %ctx.service,
                direction = %direction,
                size = payload.len(),
                limit = ctx.settings.max_payload_bytes,
                "Rejected oversized message"
            );
            return false;
        }

        let entry = match ctx
            .store
            .insert(NewQueueEntry::pending(ctx.message_type, direction, payload))
            .await
        {
            Ok(entry) => entry,
            Err(e) => {
                error!(service = %ctx.service, direction = %direction, error = %e, "Failed to persist message");
                return false;
            }
        };
        debug!(service = %ctx.service, entry_id = %entry.id, direction = %direction, "Message enqueued");

        let kind = match direction {
            Direction::Outbound => PipelineKind::Outbound,
            Direction::Inbound => PipelineKind::Handle,
        };
        self.request_run(kind).await;
        true
    }

    /// Schedule a near-immediate run unless one is already waiting
    async fn request_run(&self, kind: PipelineKind) {
        if self.ctx.gate.mark_pending(kind) {
            self.arm_trigger(kind).await;
        }
    }

    async fn arm_trigger(&self, kind: PipelineKind) {
        let name = trigger_job_name(&self.ctx.service, kind);
        if let Err(e) = self
            .scheduler
            .schedule_once(&name, self.ctx.settings.trigger_delay, self.task(kind))
            .await
        {
            // the periodic tick still picks the work up
            warn!(service = %self.ctx.service, job_name = %name, error = %e, "Failed to schedule trigger");
        }
    }

    fn task(&self, kind: PipelineKind) -> Task {
        let service = self.this.clone();
        Arc::new(move || {
            let service = service.clone();
            async move {
                if let Some(service) = service.upgrade() {
                    service.run(kind).await;
                }
            }
            .boxed()
        })
    }

    async fn run(&self, kind: PipelineKind) -> RunReport {
        let report = match kind {
            PipelineKind::Outbound => self.outbound.run().await,
            PipelineKind::Receive => self.receive.run().await,
            PipelineKind::Handle => self.handle.run().await,
        };

        if report.is_skipped() {
            // work queued while the active run was going still needs a trigger
            if self.ctx.gate.pending(kind) > 0 {
                self.arm_trigger(kind).await;
            }
            return report;
        }

        match report.failure() {
            Some(detail) => self.status.record_failure(kind, detail),
            None => self.status.record_success(kind, report.summary()),
        }

        if kind == PipelineKind::Receive && report.stats.ready > 0 {
            self.request_run(PipelineKind::Handle).await;
        }

        report
    }

    async fn pending_count(&self, direction: Direction) -> Result<u64> {
        let count = self
            .ctx
            .store
            .count(&EntryFilter::pending(self.ctx.message_type, direction))
            .await?;
        PIPELINE_METRICS.set_pending(&self.ctx.service, &direction.to_string(), count);
        Ok(count)
    }

    async fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!(service = %self.ctx.service, "Service already started");
            return Ok(());
        }

        let interval = self.ctx.settings.tick_interval;
        for kind in PipelineKind::ALL {
            let name = periodic_job_name(&self.ctx.service, kind);
            if let Err(e) = self
                .scheduler
                .schedule_periodic(&name, interval, self.task(kind))
                .await
            {
                self.started.store(false, Ordering::SeqCst);
                return Err(e.into());
            }
        }

        info!(
            service = %self.ctx.service,
            message_type = %self.ctx.message_type,
            tick_secs = interval.as_secs(),
            "Message service started"
        );
        self.status.record_success(PipelineKind::Outbound, None);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        if !self.started.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        for kind in PipelineKind::ALL {
            self.scheduler
                .cancel(&periodic_job_name(&self.ctx.service, kind))
                .await?;
            self.scheduler
                .cancel(&trigger_job_name(&self.ctx.service, kind))
                .await?;
        }

        self.status.shutdown();
        info!(service = %self.ctx.service, "Message service stopped");
        Ok(())
    }
}

/// Assembles a [`MessageService`]
pub struct MessageServiceBuilder<M: QueueMessage> {
    name: String,
    message_type: Option<MessageTypeId>,
    store: Option<Arc<dyn QueueStore>>,
    registry: ComponentRegistry<M>,
    scheduler: Option<Arc<dyn TaskScheduler>>,
    status_sink: Option<Arc<dyn StatusSink>>,
    settings: EngineSettings,
    codec: Arc<dyn PayloadCodec<M>>,
}

impl<M: QueueMessage> MessageServiceBuilder<M> {
    pub fn with_codec(name: impl Into<String>, codec: Arc<dyn PayloadCodec<M>>) -> Self {
        Self {
            name: name.into(),
            message_type: None,
            store: None,
            registry: ComponentRegistry::new(),
            scheduler: None,
            status_sink: None,
            settings: EngineSettings::default(),
            codec,
        }
    }

    /// Override the type identity, by default derived from `M::MESSAGE_TYPE`
    pub fn message_type(mut self, message_type: MessageTypeId) -> Self {
        self.message_type = Some(message_type);
        self
    }

    pub fn store(mut self, store: Arc<dyn QueueStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn registry(mut self, registry: ComponentRegistry<M>) -> Self {
        self.registry = registry;
        self
    }

    pub fn scheduler(mut self, scheduler: Arc<dyn TaskScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn status_sink(mut self, sink: Arc<dyn StatusSink>) -> Self {
        self.status_sink = Some(sink);
        self
    }

    pub fn settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn codec(mut self, codec: Arc<dyn PayloadCodec<M>>) -> Self {
        self.codec = codec;
        self
    }

    pub fn build(self) -> Result<MessageService<M>> {
        if self.name.trim().is_empty() {
            return Err(AppError::Validation("Service name must not be empty".to_string()));
        }
        let store = self
            .store
            .ok_or_else(|| AppError::Configuration(format!("Service '{}' has no store", self.name)))?;

        let ctx = Arc::new(PipelineContext {
            service: self.name.clone(),
            message_type: self.message_type.unwrap_or_else(MessageTypeId::of::<M>),
            store,
            registry: Arc::new(self.registry),
            codec: self.codec,
            gate: Arc::new(ConcurrencyGate::new()),
            settings: self.settings,
        });

        let scheduler = self
            .scheduler
            .unwrap_or_else(|| Arc::new(TokioTaskScheduler::new()));
        let sink = self
            .status_sink
            .unwrap_or_else(|| Arc::new(TracingStatusSink));
        let status = StatusTracker::new(self.name, sink, ctx.settings.heartbeat_interval);

        let inner = Arc::new_cyclic(|this| ServiceInner {
            outbound: OutboundPipeline::new(ctx.clone()),
            receive: ReceivePipeline::new(ctx.clone()),
            handle: HandlePipeline::new(ctx.clone()),
            ctx,
            scheduler,
            status,
            started: AtomicBool::new(false),
            this: this.clone(),
        });

        Ok(MessageService { inner })
    }
}
