//! Timer boundary used to drive pipeline runs.
//!
//! Services register named periodic jobs on start and arm named one-shot jobs
//! after an enqueue. The engine only needs "run this at or after time T", so
//! two interchangeable backends are provided:
//!
//! - [`CronTaskScheduler`] on top of tokio-cron-scheduler
//! - [`TokioTaskScheduler`] on plain tokio timers

mod core;
mod error;
mod timer;

pub use self::core::CronTaskScheduler;
pub use error::{SchedulerError, SchedulerResult};
pub use timer::TokioTaskScheduler;

use crate::config::{SchedulerBackend, SchedulerConfig};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;

/// A repeatable unit of scheduled work
pub type Task = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Named job scheduling.
///
/// Scheduling a name that is already registered replaces the previous job.
/// Cancelling or replacing a job never interrupts an execution in progress.
#[async_trait]
pub trait TaskScheduler: Send + Sync {
    async fn schedule_periodic(
        &self,
        name: &str,
        interval: Duration,
        task: Task,
    ) -> SchedulerResult<()>;

    async fn schedule_once(&self, name: &str, delay: Duration, task: Task) -> SchedulerResult<()>;

    /// Cancel a job; unknown names are ignored
    async fn cancel(&self, name: &str) -> SchedulerResult<()>;

    async fn shutdown(&self) -> SchedulerResult<()> {
        Ok(())
    }
}

/// Create and start the configured scheduler backend
pub async fn create_scheduler(config: &SchedulerConfig) -> SchedulerResult<Arc<dyn TaskScheduler>> {
    match config.backend {
        SchedulerBackend::Cron => {
            let scheduler = CronTaskScheduler::new().await?;
            scheduler.start().await?;
            Ok(Arc::new(scheduler))
        }
        SchedulerBackend::Tokio => Ok(Arc::new(TokioTaskScheduler::new())),
    }
}
