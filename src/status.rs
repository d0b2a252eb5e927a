//! Service health reporting.
//!
//! Status text is the only channel through which pipeline failures become
//! visible, so every service owns a [`StatusTracker`] that folds run results
//! into a single status and forwards changes to a [`StatusSink`].

use crate::gate::PipelineKind;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use strum::Display;
use tokio::time::Instant;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ServiceStatus {
    RunningIdeal,
    RunningWithErrors,
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub status: ServiceStatus,
    pub detail: String,
    pub reported_at: DateTime<Utc>,
}

/// Receives status reports; implemented by whatever monitors the services
pub trait StatusSink: Send + Sync {
    fn report(&self, service: &str, status: ServiceStatus, detail: &str);
}

/// Writes status reports to the log
#[derive(Debug, Default, Clone)]
pub struct TracingStatusSink;

impl StatusSink for TracingStatusSink {
    fn report(&self, service: &str, status: ServiceStatus, detail: &str) {
        match status {
            ServiceStatus::RunningWithErrors => {
                error!(service = service, status = %status, detail = detail, "Service degraded")
            }
            ServiceStatus::Shutdown => {
                warn!(service = service, status = %status, detail = detail, "Service stopped")
            }
            ServiceStatus::RunningIdeal => {
                info!(service = service, status = %status, detail = detail, "Service status")
            }
        }
    }
}

/// Keeps every report; handy for tests and for the HTTP status view
#[derive(Debug, Default)]
pub struct InMemoryStatusSink {
    reports: Mutex<Vec<(String, StatusReport)>>,
}

impl InMemoryStatusSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<(String, StatusReport)> {
        self.reports.lock().clone()
    }

    pub fn reports_for(&self, service: &str) -> Vec<StatusReport> {
        self.reports
            .lock()
            .iter()
            .filter(|(name, _)| name == service)
            .map(|(_, report)| report.clone())
            .collect()
    }

    pub fn last(&self, service: &str) -> Option<StatusReport> {
        self.reports
            .lock()
            .iter()
            .rev()
            .find(|(name, _)| name == service)
            .map(|(_, report)| report.clone())
    }
}

impl StatusSink for InMemoryStatusSink {
    fn report(&self, service: &str, status: ServiceStatus, detail: &str) {
        self.reports.lock().push((
            service.to_string(),
            StatusReport {
                status,
                detail: detail.to_string(),
                reported_at: Utc::now(),
            },
        ));
    }
}

#[derive(Default)]
struct TrackerState {
    last: Option<StatusReport>,
    last_reported: Option<Instant>,
    failures: BTreeMap<PipelineKind, String>,
}

/// Folds pipeline run results into one service status.
///
/// The service is degraded while the most recent run of any pipeline failed.
/// Quiet, healthy periods are re-reported once per heartbeat interval.
pub struct StatusTracker {
    service: String,
    sink: Arc<dyn StatusSink>,
    heartbeat_interval: Duration,
    state: Mutex<TrackerState>,
}

impl StatusTracker {
    pub fn new(
        service: impl Into<String>,
        sink: Arc<dyn StatusSink>,
        heartbeat_interval: Duration,
    ) -> Self {
        Self {
            service: service.into(),
            sink,
            heartbeat_interval,
            state: Mutex::new(TrackerState::default()),
        }
    }

    /// A run of `kind` finished without a run-level failure. `summary` is set
    /// when the run actually moved entries.
    pub fn record_success(&self, kind: PipelineKind, summary: Option<String>) {
        let mut state = self.state.lock();
        state.failures.remove(&kind);

        if !state.failures.is_empty() {
            let detail = Self::failure_detail(&state.failures);
            self.publish_if_changed(&mut state, ServiceStatus::RunningWithErrors, detail);
            return;
        }

        match summary {
            Some(detail) => self.publish(&mut state, ServiceStatus::RunningIdeal, detail),
            None => {
                let recovering = state
                    .last
                    .as_ref()
                    .map_or(true, |last| last.status != ServiceStatus::RunningIdeal);
                let heartbeat_due = state
                    .last_reported
                    .map_or(true, |at| at.elapsed() >= self.heartbeat_interval);

                if recovering || heartbeat_due {
                    self.publish(&mut state, ServiceStatus::RunningIdeal, "idle".to_string());
                }
            }
        }
    }

    /// A run of `kind` failed or a receiver inside it failed
    pub fn record_failure(&self, kind: PipelineKind, detail: impl Into<String>) {
        let mut state = self.state.lock();
        state.failures.insert(kind, detail.into());
        let detail = Self::failure_detail(&state.failures);
        self.publish(&mut state, ServiceStatus::RunningWithErrors, detail);
    }

    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        state.failures.clear();
        self.publish(&mut state, ServiceStatus::Shutdown, "stopped".to_string());
    }

    pub fn current(&self) -> Option<StatusReport> {
        self.state.lock().last.clone()
    }

    fn failure_detail(failures: &BTreeMap<PipelineKind, String>) -> String {
        failures
            .iter()
            .map(|(kind, detail)| format!("{}: {}", kind, detail))
            .collect::<Vec<_>>()
            .join("; ")
    }

    fn publish_if_changed(&self, state: &mut TrackerState, status: ServiceStatus, detail: String) {
        let unchanged = state
            .last
            .as_ref()
            .is_some_and(|last| last.status == status && last.detail == detail);
        if !unchanged {
            self.publish(state, status, detail);
        }
    }

    fn publish(&self, state: &mut TrackerState, status: ServiceStatus, detail: String) {
        self.sink.report(&self.service, status, &detail);
        state.last = Some(StatusReport {
            status,
            detail,
            reported_at: Utc::now(),
        });
        state.last_reported = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> (StatusTracker, Arc<InMemoryStatusSink>) {
        let sink = Arc::new(InMemoryStatusSink::new());
        let tracker = StatusTracker::new("orders", sink.clone(), Duration::from_secs(3600));
        (tracker, sink)
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_heartbeat_only_after_interval() {
        let (tracker, sink) = tracker();

        tracker.record_success(PipelineKind::Outbound, None);
        tracker.record_success(PipelineKind::Outbound, None);
        assert_eq!(sink.reports_for("orders").len(), 1);

        tokio::time::advance(Duration::from_secs(3601)).await;
        tracker.record_success(PipelineKind::Handle, None);

        let reports = sink.reports_for("orders");
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[1].status, ServiceStatus::RunningIdeal);
        assert_eq!(reports[1].detail, "idle");
    }

    #[tokio::test]
    async fn test_failure_persists_until_same_pipeline_recovers() {
        let (tracker, sink) = tracker();

        tracker.record_failure(PipelineKind::Outbound, "store unavailable");
        tracker.record_success(PipelineKind::Handle, Some("handled 3".to_string()));
        assert_eq!(
            tracker.current().unwrap().status,
            ServiceStatus::RunningWithErrors
        );
        assert_eq!(tracker.current().unwrap().detail, "outbound: store unavailable");

        tracker.record_success(PipelineKind::Outbound, None);
        let last = sink.last("orders").unwrap();
        assert_eq!(last.status, ServiceStatus::RunningIdeal);
        assert_eq!(last.detail, "idle");
    }

    #[tokio::test]
    async fn test_shutdown_reported() {
        let (tracker, sink) = tracker();
        tracker.record_failure(PipelineKind::Receive, "receiver 'q' failed");
        tracker.shutdown();
        assert_eq!(sink.last("orders").unwrap().status, ServiceStatus::Shutdown);
    }
}
