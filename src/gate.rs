//! Non-reentrant, self-coalescing run counters for one service's pipelines.
//!
//! The gate is advisory and local to the process. It keeps a pipeline from
//! running concurrently with itself and collapses bursts of enqueues into a
//! single near-immediate trigger.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use strum::{Display, EnumString};

/// The three independently gated pipelines of a service
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PipelineKind {
    Outbound,
    Receive,
    Handle,
}

impl PipelineKind {
    pub const ALL: [PipelineKind; 3] = [
        PipelineKind::Outbound,
        PipelineKind::Receive,
        PipelineKind::Handle,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineKind::Outbound => "outbound",
            PipelineKind::Receive => "receive",
            PipelineKind::Handle => "handle",
        }
    }

    fn slot(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Default)]
pub struct ConcurrencyGate {
    running: [AtomicU64; 3],
    pending: [AtomicU64; 3],
}

impl ConcurrencyGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the run slot. Returns false if a run is already in progress.
    pub fn try_enter(&self, kind: PipelineKind) -> bool {
        self.running[kind.slot()].fetch_add(1, Ordering::SeqCst) == 0
    }

    /// Release the run slot, whatever the run's outcome
    pub fn leave(&self, kind: PipelineKind) {
        self.running[kind.slot()].store(0, Ordering::SeqCst);
    }

    /// Claim the run slot for the lifetime of the returned guard
    pub fn enter(&self, kind: PipelineKind) -> Option<RunGuard<'_>> {
        if self.try_enter(kind) {
            Some(RunGuard { gate: self, kind })
        } else {
            None
        }
    }

    pub fn is_running(&self, kind: PipelineKind) -> bool {
        self.running[kind.slot()].load(Ordering::SeqCst) > 0
    }

    /// Record waiting work. Returns true only for the 0 -> 1 transition, in
    /// which case the caller schedules exactly one trigger.
    pub fn mark_pending(&self, kind: PipelineKind) -> bool {
        self.pending[kind.slot()].fetch_add(1, Ordering::SeqCst) == 0
    }

    /// Clear waiting work at the start of a run and return how much there was
    pub fn reset_pending(&self, kind: PipelineKind) -> u64 {
        self.pending[kind.slot()].swap(0, Ordering::SeqCst)
    }

    pub fn pending(&self, kind: PipelineKind) -> u64 {
        self.pending[kind.slot()].load(Ordering::SeqCst)
    }
}

/// Holds a pipeline's run slot; dropping it calls [`ConcurrencyGate::leave`]
#[must_use = "the run slot is released as soon as the guard is dropped"]
pub struct RunGuard<'a> {
    gate: &'a ConcurrencyGate,
    kind: PipelineKind,
}

impl RunGuard<'_> {
    pub fn kind(&self) -> PipelineKind {
        self.kind
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.gate.leave(self.kind);
    }
}
