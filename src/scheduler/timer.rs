use super::{
    error::{SchedulerError, SchedulerResult},
    Task, TaskScheduler,
};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::debug;

struct TimerJob {
    generation: u64,
    timer: AbortHandle,
}

/// Scheduler built on tokio timers.
///
/// Each job owns a timer task. When the timer fires the work is spawned as
/// its own task, so cancelling the timer never aborts a run in progress.
/// Works with a paused tokio clock, which makes it the scheduler of choice
/// in tests.
#[derive(Default)]
pub struct TokioTaskScheduler {
    jobs: Arc<DashMap<String, TimerJob>>,
    generation: AtomicU64,
}

impl TokioTaskScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn job_names(&self) -> Vec<String> {
        self.jobs.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn is_scheduled(&self, name: &str) -> bool {
        self.jobs.contains_key(name)
    }

    fn install(&self, name: &str, generation: u64, timer: AbortHandle) {
        if let Some(previous) = self
            .jobs
            .insert(name.to_string(), TimerJob { generation, timer })
        {
            previous.timer.abort();
        }
    }
}

#[async_trait]
impl TaskScheduler for TokioTaskScheduler {
    async fn schedule_periodic(
        &self,
        name: &str,
        interval: Duration,
        task: Task,
    ) -> SchedulerResult<()> {
        // tokio intervals panic on a zero period
        if interval.is_zero() {
            return Err(SchedulerError::InvalidInterval {
                job: name.to_string(),
                interval,
            });
        }

        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let job_name = name.to_string();

        let timer = tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                debug!(job_name = %job_name, "Executing periodic job");
                tokio::spawn(task());
            }
        });

        self.install(name, generation, timer.abort_handle());
        Ok(())
    }

    async fn schedule_once(&self, name: &str, delay: Duration, task: Task) -> SchedulerResult<()> {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let job_name = name.to_string();
        let jobs = self.jobs.clone();

        let timer = tokio::spawn(async move {
            time::sleep(delay).await;
            jobs.remove_if(&job_name, |_, job| job.generation == generation);
            debug!(job_name = %job_name, "Executing one-shot job");
            tokio::spawn(task());
        });

        self.install(name, generation, timer.abort_handle());
        Ok(())
    }

    async fn cancel(&self, name: &str) -> SchedulerResult<()> {
        if let Some((_, job)) = self.jobs.remove(name) {
            job.timer.abort();
            debug!(job_name = name, "Job cancelled");
        }
        Ok(())
    }

    async fn shutdown(&self) -> SchedulerResult<()> {
        self.jobs.retain(|_, job| {
            job.timer.abort();
            false
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::atomic::AtomicUsize;

    fn counting_task(counter: Arc<AtomicUsize>) -> Task {
        Arc::new(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            .boxed()
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_shot_fires_once() {
        let scheduler = TokioTaskScheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));

        scheduler
            .schedule_once("orders.outbound.trigger", Duration::from_secs(5), counting_task(counter.clone()))
            .await
            .unwrap();
        assert!(scheduler.is_scheduled("orders.outbound.trigger"));

        time::sleep(Duration::from_secs(4)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        time::sleep(Duration::from_secs(2)).await;
        tokio::task::yield_now().await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(!scheduler.is_scheduled("orders.outbound.trigger"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_until_cancelled() {
        let scheduler = TokioTaskScheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));

        scheduler
            .schedule_periodic("orders.outbound", Duration::from_secs(60), counting_task(counter.clone()))
            .await
            .unwrap();

        time::sleep(Duration::from_secs(181)).await;
        tokio::task::yield_now().await;
        assert_eq!(counter.load(Ordering::SeqCst), 3);

        scheduler.cancel("orders.outbound").await.unwrap();
        time::sleep(Duration::from_secs(120)).await;
        tokio::task::yield_now().await;
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_zero_interval_is_rejected() {
        let scheduler = TokioTaskScheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let result = scheduler
            .schedule_periodic("orders.outbound", Duration::ZERO, counting_task(counter))
            .await;

        assert!(matches!(result, Err(SchedulerError::InvalidInterval { .. })));
        assert!(!scheduler.is_scheduled("orders.outbound"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rescheduling_replaces_pending_job() {
        let scheduler = TokioTaskScheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            scheduler
                .schedule_once("orders.handle.trigger", Duration::from_secs(5), counting_task(counter.clone()))
                .await
                .unwrap();
        }

        time::sleep(Duration::from_secs(10)).await;
        tokio::task::yield_now().await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
