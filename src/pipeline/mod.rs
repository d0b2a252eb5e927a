//! The three pipelines that move queue entries through their lifecycle.

pub mod handle;
pub mod outbound;
pub mod receive;

pub use handle::HandlePipeline;
pub use outbound::OutboundPipeline;
pub use receive::{reclaim_abandoned, ReceivePipeline, ReclaimStats};

use crate::components::{ComponentRegistry, Delivery, Handler, Registered, Sender};
use crate::config::EngineSettings;
use crate::error::Result;
use crate::gate::{ConcurrencyGate, PipelineKind};
use crate::message::{MessageTypeId, PayloadCodec, QueueMessage};
use crate::metrics::PIPELINE_METRICS;
use crate::queue::{EntryState, QueueEntry};
use crate::state::QueueStore;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Everything a pipeline run needs, shared by the three pipelines of a service
pub struct PipelineContext<M: QueueMessage> {
    pub service: String,
    pub message_type: MessageTypeId,
    pub store: Arc<dyn QueueStore>,
    pub registry: Arc<ComponentRegistry<M>>,
    pub codec: Arc<dyn PayloadCodec<M>>,
    pub gate: Arc<ConcurrencyGate>,
    pub settings: EngineSettings,
}

/// How a pipeline run ended
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "error", rename_all = "snake_case")]
pub enum RunOutcome {
    /// Another run of the same pipeline was in progress
    Skipped,
    Completed,
    /// The run was aborted; checkpointed entries keep their new state
    Failed(String),
}

/// Counters collected during one run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunStats {
    pub examined: u64,
    pub completed: u64,
    pub failed: u64,
    pub repeated: u64,
    /// Offered to every candidate without being claimed
    pub unclaimed: u64,
    /// Pinned to a component that is no longer registered
    pub stale_bindings: u64,
    pub received: u64,
    pub admitted: u64,
    /// Admitted entries now waiting for handlers
    pub ready: u64,
    pub rolled_back: u64,
    pub insert_failures: u64,
    pub reclaimed: u64,
    pub checkpoints: u64,
}

impl RunStats {
    fn record_state(&mut self, state: EntryState) {
        match state {
            EntryState::Complete => self.completed += 1,
            EntryState::Error => self.failed += 1,
            EntryState::Repeat => self.repeated += 1,
            EntryState::NotProcessed | EntryState::IntermediateAdded => {}
        }
    }

    /// Whether the run changed anything worth reporting
    pub fn has_activity(&self) -> bool {
        self.completed + self.failed + self.repeated + self.admitted + self.rolled_back + self.reclaimed
            > 0
    }
}

/// Result of one pipeline run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub pipeline: PipelineKind,
    pub outcome: RunOutcome,
    pub stats: RunStats,
    /// Non-fatal failures such as a single receiver erroring out
    pub errors: Vec<String>,
    #[serde(with = "duration_millis")]
    pub elapsed: Duration,
}

impl RunReport {
    pub(crate) fn skipped(service: &str, pipeline: PipelineKind) -> Self {
        debug!(service = service, pipeline = %pipeline, "Run already in progress, skipping");
        PIPELINE_METRICS.record_skipped(service, pipeline.as_str());

        Self {
            pipeline,
            outcome: RunOutcome::Skipped,
            stats: RunStats::default(),
            errors: Vec::new(),
            elapsed: Duration::ZERO,
        }
    }

    pub(crate) fn finish(
        service: &str,
        pipeline: PipelineKind,
        started: Instant,
        stats: RunStats,
        errors: Vec<String>,
        result: Result<()>,
    ) -> Self {
        let elapsed = started.elapsed();
        let outcome = match result {
            Ok(()) => RunOutcome::Completed,
            Err(e) => {
                tracing::error!(
                    service = service,
                    pipeline = %pipeline,
                    error = %e,
                    "Pipeline run aborted"
                );
                RunOutcome::Failed(e.to_string())
            }
        };

        let label = match (&outcome, errors.is_empty()) {
            (RunOutcome::Failed(_), _) | (_, false) => "failed",
            _ => "ok",
        };
        PIPELINE_METRICS.record_run(service, pipeline.as_str(), label, elapsed.as_secs_f64());

        Self {
            pipeline,
            outcome,
            stats,
            errors,
            elapsed,
        }
    }

    pub fn is_skipped(&self) -> bool {
        self.outcome == RunOutcome::Skipped
    }

    /// Text describing why the run degraded the service, if it did
    pub fn failure(&self) -> Option<String> {
        match &self.outcome {
            RunOutcome::Failed(error) => Some(error.clone()),
            _ if !self.errors.is_empty() => Some(self.errors.join("; ")),
            _ => None,
        }
    }

    /// Short human readable summary when the run moved entries
    pub fn summary(&self) -> Option<String> {
        if !self.stats.has_activity() {
            return None;
        }
        let s = &self.stats;
        Some(match self.pipeline {
            PipelineKind::Receive => format!(
                "receive: {} admitted, {} rolled back, {} reclaimed",
                s.admitted, s.rolled_back, s.reclaimed
            ),
            pipeline => format!(
                "{}: {} completed, {} failed, {} repeating, {} unclaimed",
                pipeline, s.completed, s.failed, s.repeated, s.unclaimed
            ),
        })
    }
}

mod duration_millis {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }
}

/// A component able to claim a decoded entry
#[async_trait]
pub(crate) trait Claimant<M: QueueMessage>: Send + Sync {
    async fn claim(&self, delivery: &mut Delivery<M>) -> Result<bool>;
}

#[async_trait]
impl<M: QueueMessage> Claimant<M> for Arc<dyn Sender<M>> {
    async fn claim(&self, delivery: &mut Delivery<M>) -> Result<bool> {
        self.send(delivery).await
    }
}

#[async_trait]
impl<M: QueueMessage> Claimant<M> for Arc<dyn Handler<M>> {
    async fn claim(&self, delivery: &mut Delivery<M>) -> Result<bool> {
        self.on_prepare(delivery).await
    }
}

/// Offer one pending entry to its candidates in order.
///
/// Returns true when the entry changed and must be persisted. A component
/// returning `Err` counts as not claiming and leaves nothing behind.
pub(crate) async fn dispatch<M, C>(
    ctx: &PipelineContext<M>,
    pipeline: PipelineKind,
    entry: &mut QueueEntry,
    candidates: Vec<&Registered<C>>,
    stats: &mut RunStats,
) -> bool
where
    M: QueueMessage,
    C: Claimant<M>,
{
    let message = match ctx.codec.decode(&entry.payload) {
        Ok(message) => message,
        Err(e) => {
            warn!(
                service = %ctx.service,
                entry_id = %entry.id,
                error = %e,
                "Failed to decode queue entry payload"
            );
            entry.fail(e.to_string());
            record_transition(ctx, pipeline, entry.state, stats);
            return true;
        }
    };

    if candidates.is_empty() {
        match &entry.bound_handler {
            Some(bound) => {
                warn!(
                    service = %ctx.service,
                    entry_id = %entry.id,
                    component = %bound,
                    "Entry is bound to a component that is no longer registered"
                );
                stats.stale_bindings += 1;
            }
            None => stats.unclaimed += 1,
        }
        return false;
    }

    let mut delivery = Delivery::new(entry, message);

    for candidate in candidates {
        delivery.reset_report();
        match candidate.component.claim(&mut delivery).await {
            Ok(true) => {
                let (outcome, detail) = delivery.take_report();
                entry.record_outcome(outcome, &candidate.id, detail);
                debug!(
                    service = %ctx.service,
                    entry_id = %entry.id,
                    component = %candidate.id,
                    outcome = %outcome,
                    state = %entry.state,
                    "Entry claimed"
                );
                record_transition(ctx, pipeline, entry.state, stats);
                return true;
            }
            Ok(false) => continue,
            Err(e) => {
                warn!(
                    service = %ctx.service,
                    entry_id = %entry.id,
                    component = %candidate.id,
                    error = %e,
                    "Component failed, trying next candidate"
                );
            }
        }
    }

    stats.unclaimed += 1;
    false
}

fn record_transition<M: QueueMessage>(
    ctx: &PipelineContext<M>,
    pipeline: PipelineKind,
    state: EntryState,
    stats: &mut RunStats,
) {
    stats.record_state(state);
    PIPELINE_METRICS.record_entry(&ctx.service, pipeline.as_str(), &state.to_string());
}
