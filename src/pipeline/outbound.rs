use crate::error::Result;
use crate::gate::PipelineKind;
use crate::message::QueueMessage;
use crate::metrics::PIPELINE_METRICS;
use crate::pipeline::{dispatch, PipelineContext, RunReport, RunStats};
use crate::queue::Direction;
use crate::state::{EntryFilter, WriteBatch};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info};

/// Drains pending outbound entries through the registered senders.
///
/// State changes are accumulated in memory and committed every
/// `checkpoint_interval` of wall-clock progress, plus once at the end.
pub struct OutboundPipeline<M: QueueMessage> {
    ctx: Arc<PipelineContext<M>>,
}

impl<M: QueueMessage> OutboundPipeline<M> {
    pub fn new(ctx: Arc<PipelineContext<M>>) -> Self {
        Self { ctx }
    }

    pub async fn run(&self) -> RunReport {
        let kind = PipelineKind::Outbound;
        let Some(_guard) = self.ctx.gate.enter(kind) else {
            return RunReport::skipped(&self.ctx.service, kind);
        };
        self.ctx.gate.reset_pending(kind);

        let started = Instant::now();
        let mut stats = RunStats::default();
        let result = self.process(&mut stats).await;

        RunReport::finish(&self.ctx.service, kind, started, stats, Vec::new(), result)
    }

    async fn process(&self, stats: &mut RunStats) -> Result<()> {
        let ctx = &self.ctx;
        let rows = ctx
            .store
            .query(&EntryFilter::pending(ctx.message_type, Direction::Outbound))
            .await?;

        if rows.is_empty() {
            return Ok(());
        }
        debug!(service = %ctx.service, pending = rows.len(), "Outbound run started");

        let mut batch = WriteBatch::new();
        let mut last_checkpoint = Instant::now();

        for mut entry in rows {
            stats.examined += 1;

            // the query only yields pending rows; anything else passes through untouched
            if entry.is_pending() {
                let candidates = ctx.registry.sender_candidates(entry.bound_handler.as_ref());
                if dispatch(ctx, PipelineKind::Outbound, &mut entry, candidates, stats).await {
                    batch.update(entry);
                }
            }

            if last_checkpoint.elapsed() >= ctx.settings.checkpoint_interval {
                self.checkpoint(&mut batch, stats).await?;
                last_checkpoint = Instant::now();
            }
        }

        self.checkpoint(&mut batch, stats).await?;

        info!(
            service = %ctx.service,
            examined = stats.examined,
            completed = stats.completed,
            failed = stats.failed,
            repeated = stats.repeated,
            unclaimed = stats.unclaimed,
            checkpoints = stats.checkpoints,
            "Outbound run finished"
        );
        Ok(())
    }

    async fn checkpoint(&self, batch: &mut WriteBatch, stats: &mut RunStats) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let pending = batch.take();
        let rows = pending.len();
        self.ctx.store.commit(pending).await?;

        stats.checkpoints += 1;
        PIPELINE_METRICS.record_checkpoint(&self.ctx.service);
        debug!(service = %self.ctx.service, rows = rows, "Outbound checkpoint committed");
        Ok(())
    }
}
