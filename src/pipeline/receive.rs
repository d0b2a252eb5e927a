use crate::components::{BatchReceiver, ComponentId, Envelope, ReceiverKind, StreamingReceiver};
use crate::config::AbandonedIntakePolicy;
use crate::error::{AppError, Result};
use crate::gate::PipelineKind;
use crate::message::{MessageTypeId, QueueMessage};
use crate::metrics::PIPELINE_METRICS;
use crate::pipeline::{PipelineContext, RunReport, RunStats};
use crate::queue::{Direction, EntryState, NewQueueEntry};
use crate::state::{EntryFilter, QueueStore, WriteBatch};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Consecutive failed tentative writes after which a streaming receiver is
/// given up on for the rest of the run
const MAX_CONSECUTIVE_INSERT_FAILURES: u32 = 3;

/// Pulls new inbound messages from the registered receivers.
///
/// Batch receivers hand over messages their source can redeliver, so those
/// are inserted directly. Streaming receivers go through a tentative write
/// in `IntermediateAdded` followed by an explicit confirmation. A receiver
/// that rejects a confirmation is not pulled from again in the same run.
pub struct ReceivePipeline<M: QueueMessage> {
    ctx: Arc<PipelineContext<M>>,
}

impl<M: QueueMessage> ReceivePipeline<M> {
    pub fn new(ctx: Arc<PipelineContext<M>>) -> Self {
        Self { ctx }
    }

    pub async fn run(&self) -> RunReport {
        let kind = PipelineKind::Receive;
        let Some(_guard) = self.ctx.gate.enter(kind) else {
            return RunReport::skipped(&self.ctx.service, kind);
        };
        self.ctx.gate.reset_pending(kind);

        let started = Instant::now();
        let mut stats = RunStats::default();
        let mut errors = Vec::new();
        self.process(&mut stats, &mut errors).await;

        RunReport::finish(&self.ctx.service, kind, started, stats, errors, Ok(()))
    }

    async fn process(&self, stats: &mut RunStats, errors: &mut Vec<String>) {
        let ctx = &self.ctx;

        match reclaim_abandoned(
            ctx.store.as_ref(),
            Some(ctx.message_type),
            ctx.settings.intermediate_grace,
            ctx.settings.abandoned_intake_policy,
        )
        .await
        {
            Ok(reclaimed) => {
                stats.reclaimed += reclaimed.total();
                stats.ready += reclaimed.promoted;
            }
            Err(e) => {
                warn!(service = %ctx.service, error = %e, "Failed to reclaim abandoned intake");
                errors.push(format!("reclaim failed: {}", e));
            }
        }

        for registered in ctx.registry.receivers() {
            let result = match &registered.component {
                ReceiverKind::Batch(receiver) => self.receive_batch(receiver.as_ref(), stats).await,
                ReceiverKind::Streaming(receiver) => {
                    self.receive_stream(receiver.as_ref(), stats).await
                }
            };

            if let Err(e) = result {
                warn!(
                    service = %ctx.service,
                    receiver = %registered.id,
                    error = %e,
                    "Receiver failed, moving to next receiver"
                );
                errors.push(format!("receiver '{}' failed: {}", registered.id, e));
            }
        }

        if stats.received > 0 || stats.reclaimed > 0 {
            info!(
                service = %ctx.service,
                received = stats.received,
                admitted = stats.admitted,
                rolled_back = stats.rolled_back,
                insert_failures = stats.insert_failures,
                reclaimed = stats.reclaimed,
                "Receive run finished"
            );
        }
    }

    async fn receive_batch(&self, receiver: &dyn BatchReceiver<M>, stats: &mut RunStats) -> Result<()> {
        let ctx = &self.ctx;
        let envelopes = receiver.receive_batch().await?;
        if envelopes.is_empty() {
            return Ok(());
        }
        stats.received += envelopes.len() as u64;

        let mut rows = Vec::with_capacity(envelopes.len());
        for envelope in &envelopes {
            let payload = ctx.codec.encode(&envelope.message)?;
            let state = envelope.admitted_state();
            rows.push(
                NewQueueEntry::pending(ctx.message_type, Direction::Inbound, payload)
                    .with_state(state, admitted_detail(envelope, state)),
            );
        }

        for chunk in rows.chunks(ctx.settings.receive_batch_size) {
            let created = ctx.store.insert_batch(chunk.to_vec()).await?;
            for entry in &created {
                self.record_admission(entry.state, stats);
            }
        }

        debug!(
            service = %ctx.service,
            receiver = %receiver.id(),
            count = envelopes.len(),
            "Batch admitted"
        );
        Ok(())
    }

    async fn receive_stream(
        &self,
        receiver: &dyn StreamingReceiver<M>,
        stats: &mut RunStats,
    ) -> Result<()> {
        let ctx = &self.ctx;
        let receiver_id = receiver.id();
        let mut consecutive_failures = 0u32;

        while let Some(envelope) = receiver.begin_receive().await? {
            stats.received += 1;

            // durability point: once this write succeeds the message survives a crash
            let tentative = match ctx.codec.encode(&envelope.message) {
                Ok(payload) => {
                    ctx.store
                        .insert(NewQueueEntry::intermediate(ctx.message_type, payload))
                        .await
                }
                Err(e) => Err(e),
            };
            let tentative = match tentative {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(
                        service = %ctx.service,
                        receiver = %receiver_id,
                        error = %e,
                        "Tentative insert failed"
                    );
                    stats.insert_failures += 1;
                    None
                }
            };

            let confirm = receiver.end_receive(tentative.is_some(), &envelope).await;

            let Some(mut entry) = tentative else {
                consecutive_failures += 1;
                if let Err(e) = confirm {
                    warn!(service = %ctx.service, receiver = %receiver_id, error = %e, "Negative acknowledgement failed");
                }
                if consecutive_failures >= MAX_CONSECUTIVE_INSERT_FAILURES {
                    return Err(AppError::Store(format!(
                        "{} consecutive tentative inserts failed",
                        consecutive_failures
                    )));
                }
                continue;
            };
            consecutive_failures = 0;

            match confirm {
                Ok(true) => {
                    let state = envelope.admitted_state();
                    entry.finalize(state, admitted_detail(&envelope, state));
                    ctx.store.save(&entry).await?;
                    self.record_admission(state, stats);
                    debug!(service = %ctx.service, entry_id = %entry.id, state = %state, "Intake confirmed");
                }
                Ok(false) => {
                    self.rollback(&receiver_id, entry.id, stats).await?;
                    // the source keeps the message and may hand it straight back
                    debug!(
                        service = %ctx.service,
                        receiver = %receiver_id,
                        "Confirmation rejected, receiver paused until next run"
                    );
                    return Ok(());
                }
                Err(e) => {
                    self.rollback(&receiver_id, entry.id, stats).await?;
                    return Err(e);
                }
            }
        }

        Ok(())
    }

    async fn rollback(
        &self,
        receiver: &ComponentId,
        id: crate::queue::EntryId,
        stats: &mut RunStats,
    ) -> Result<()> {
        self.ctx.store.delete(id).await?;
        stats.rolled_back += 1;
        PIPELINE_METRICS.record_entry(&self.ctx.service, PipelineKind::Receive.as_str(), "rolled_back");
        debug!(service = %self.ctx.service, receiver = %receiver, entry_id = %id, "Intake rolled back");
        Ok(())
    }

    fn record_admission(&self, state: EntryState, stats: &mut RunStats) {
        stats.admitted += 1;
        if state == EntryState::NotProcessed {
            stats.ready += 1;
        }
        stats.record_state(state);
        PIPELINE_METRICS.record_entry(
            &self.ctx.service,
            PipelineKind::Receive.as_str(),
            &state.to_string(),
        );
    }
}

/// Rows ready for handlers carry no detail
fn admitted_detail<M>(envelope: &Envelope<M>, state: EntryState) -> Option<String> {
    match state {
        EntryState::NotProcessed => None,
        _ => envelope.detail.clone(),
    }
}

/// Outcome of an abandoned intake sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReclaimStats {
    pub discarded: u64,
    pub promoted: u64,
}

impl ReclaimStats {
    pub fn total(&self) -> u64 {
        self.discarded + self.promoted
    }
}

/// Apply the abandoned intake policy to `IntermediateAdded` rows older than
/// `grace`. `None` sweeps every message type.
pub async fn reclaim_abandoned(
    store: &dyn QueueStore,
    message_type: Option<MessageTypeId>,
    grace: Duration,
    policy: AbandonedIntakePolicy,
) -> Result<ReclaimStats> {
    let grace = chrono::Duration::from_std(grace)
        .map_err(|e| AppError::Configuration(format!("Invalid intermediate grace period: {}", e)))?;

    let filter = EntryFilter {
        message_type,
        ..EntryFilter::default()
    }
    .direction(Direction::Inbound)
    .states([EntryState::IntermediateAdded])
    .changed_before(Utc::now() - grace);

    let abandoned = store.query(&filter).await?;
    let mut stats = ReclaimStats::default();
    if abandoned.is_empty() {
        return Ok(stats);
    }

    let mut batch = WriteBatch::new();
    for mut entry in abandoned {
        match policy {
            AbandonedIntakePolicy::Discard => {
                batch.delete(entry.id);
                stats.discarded += 1;
            }
            AbandonedIntakePolicy::Promote => {
                entry.reset();
                batch.update(entry);
                stats.promoted += 1;
            }
        }
    }
    store.commit(batch).await?;

    warn!(
        discarded = stats.discarded,
        promoted = stats.promoted,
        "Reclaimed abandoned intake rows"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::InMemoryQueueStore;

    #[tokio::test]
    async fn test_reclaim_respects_grace_and_policy() {
        let store = InMemoryQueueStore::new();
        let message_type = MessageTypeId::from_name("orders.created");

        let mut old = store
            .insert(NewQueueEntry::intermediate(message_type, "{}".to_string()))
            .await
            .unwrap();
        old.changed_at = Utc::now() - chrono::Duration::hours(1);
        store.save(&old).await.unwrap();
        let fresh = store
            .insert(NewQueueEntry::intermediate(message_type, "{}".to_string()))
            .await
            .unwrap();

        let stats = reclaim_abandoned(
            &store,
            Some(message_type),
            Duration::from_secs(600),
            AbandonedIntakePolicy::Promote,
        )
        .await
        .unwrap();

        assert_eq!(stats, ReclaimStats { discarded: 0, promoted: 1 });
        assert_eq!(
            store.get(old.id).await.unwrap().unwrap().state,
            EntryState::NotProcessed
        );
        assert_eq!(
            store.get(fresh.id).await.unwrap().unwrap().state,
            EntryState::IntermediateAdded
        );
    }

    #[tokio::test]
    async fn test_reclaim_discard_deletes() {
        let store = InMemoryQueueStore::new();
        let message_type = MessageTypeId::from_name("orders.created");
        let mut entry = store
            .insert(NewQueueEntry::intermediate(message_type, "{}".to_string()))
            .await
            .unwrap();
        entry.changed_at = Utc::now() - chrono::Duration::seconds(1);
        store.save(&entry).await.unwrap();

        let stats = reclaim_abandoned(&store, None, Duration::ZERO, AbandonedIntakePolicy::Discard)
            .await
            .unwrap();

        assert_eq!(stats.discarded, 1);
        assert!(store.get(entry.id).await.unwrap().is_none());
    }
}
