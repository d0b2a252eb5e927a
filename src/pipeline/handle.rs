use crate::error::Result;
use crate::gate::PipelineKind;
use crate::message::QueueMessage;
use crate::pipeline::{dispatch, PipelineContext, RunReport, RunStats};
use crate::queue::Direction;
use crate::state::EntryFilter;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::info;

/// Drains pending inbound entries through the registered handlers.
///
/// Handlers are local and fast, so every changed entry is saved right away.
pub struct HandlePipeline<M: QueueMessage> {
    ctx: Arc<PipelineContext<M>>,
}

impl<M: QueueMessage> HandlePipeline<M> {
    pub fn new(ctx: Arc<PipelineContext<M>>) -> Self {
        Self { ctx }
    }

    pub async fn run(&self) -> RunReport {
        let kind = PipelineKind::Handle;
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
            .query(&EntryFilter::pending(ctx.message_type, Direction::Inbound))
            .await?;

        if rows.is_empty() {
            return Ok(());
        }

        for mut entry in rows {
            stats.examined += 1;
            if !entry.is_pending() {
                continue;
            }

            let candidates = ctx.registry.handler_candidates(entry.bound_handler.as_ref());
            if dispatch(ctx, PipelineKind::Handle, &mut entry, candidates, stats).await {
                ctx.store.save(&entry).await?;
            }
        }

        info!(
            service = %ctx.service,
            examined = stats.examined,
            completed = stats.completed,
            failed = stats.failed,
            repeated = stats.repeated,
            unclaimed = stats.unclaimed,
            "Handle run finished"
        );
        Ok(())
    }
}
