//! tokio-cron-scheduler backed task scheduler

use super::{
    error::{SchedulerError, SchedulerResult},
    Task, TaskScheduler,
};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Scheduler that registers pipeline jobs with a [`JobScheduler`]
pub struct CronTaskScheduler {
    /// Underlying tokio-cron-scheduler instance
    scheduler: JobScheduler,

    /// Job name to scheduler job id
    jobs: Arc<DashMap<String, Uuid>>,

    /// Whether the scheduler is running
    running: Arc<tokio::sync::RwLock<bool>>,
}

impl CronTaskScheduler {
    pub async fn new() -> SchedulerResult<Self> {
        info!("Initializing cron task scheduler");

        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| SchedulerError::Backend(e.to_string()))?;

        Ok(Self {
            scheduler,
            jobs: Arc::new(DashMap::new()),
            running: Arc::new(tokio::sync::RwLock::new(false)),
        })
    }

    /// Start the scheduler
    pub async fn start(&self) -> SchedulerResult<()> {
        {
            let mut running = self.running.write().await;
            if *running {
                warn!("Scheduler is already running");
                return Ok(());
            }
            *running = true;
        }

        self.scheduler
            .start()
            .await
            .map_err(|e| SchedulerError::Backend(e.to_string()))?;

        info!("Cron task scheduler started");
        Ok(())
    }

    /// Check if scheduler is running
    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// Names of the currently registered jobs
    pub fn job_names(&self) -> Vec<String> {
        self.jobs.iter().map(|entry| entry.key().clone()).collect()
    }

    async fn register(&self, name: &str, job: Job) -> SchedulerResult<()> {
        if let Some((_, previous)) = self.jobs.remove(name) {
            self.unschedule(name, previous).await;
        }

        let job_id = self
            .scheduler
            .add(job)
            .await
            .map_err(|e| SchedulerError::registration(name, e))?;
        self.jobs.insert(name.to_string(), job_id);

        debug!(job_name = name, job_id = %job_id, "Job registered");
        Ok(())
    }

    async fn unschedule(&self, name: &str, job_id: Uuid) {
        // a fired one-shot may already be gone
        if let Err(e) = self.scheduler.remove(&job_id).await {
            debug!(job_name = name, job_id = %job_id, error = %e, "Job removal skipped");
        }
    }
}

#[async_trait]
impl TaskScheduler for CronTaskScheduler {
    async fn schedule_periodic(
        &self,
        name: &str,
        interval: Duration,
        task: Task,
    ) -> SchedulerResult<()> {
        if interval.is_zero() {
            return Err(SchedulerError::InvalidInterval {
                job: name.to_string(),
                interval,
            });
        }

        let job_name = name.to_string();
        let job = Job::new_repeated_async(interval, move |_uuid, _l| {
            let task = task.clone();
            let job_name = job_name.clone();
            Box::pin(async move {
                debug!(job_name = %job_name, "Executing periodic job");
                task().await;
            })
        })
        .map_err(|e: JobSchedulerError| SchedulerError::registration(name, e))?;

        info!(job_name = name, interval_secs = interval.as_secs(), "Scheduling periodic job");
        self.register(name, job).await
    }

    async fn schedule_once(&self, name: &str, delay: Duration, task: Task) -> SchedulerResult<()> {
        let job_name = name.to_string();
        let jobs = self.jobs.clone();
        let job = Job::new_one_shot_async(delay, move |uuid, _l| {
            let task = task.clone();
            let job_name = job_name.clone();
            let jobs = jobs.clone();
            Box::pin(async move {
                jobs.remove_if(&job_name, |_, registered| *registered == uuid);
                debug!(job_name = %job_name, "Executing one-shot job");
                task().await;
            })
        })
        .map_err(|e: JobSchedulerError| SchedulerError::registration(name, e))?;

        self.register(name, job).await
    }

    async fn cancel(&self, name: &str) -> SchedulerResult<()> {
        if let Some((_, job_id)) = self.jobs.remove(name) {
            self.unschedule(name, job_id).await;
            info!(job_name = name, "Job cancelled");
        }
        Ok(())
    }

    async fn shutdown(&self) -> SchedulerResult<()> {
        {
            let mut running = self.running.write().await;
            if !*running {
                return Ok(());
            }
            *running = false;
        }

        self.jobs.clear();
        let mut scheduler = self.scheduler.clone();
        scheduler
            .shutdown()
            .await
            .map_err(|e| SchedulerError::Backend(e.to_string()))?;

        info!("Cron task scheduler shut down");
        Ok(())
    }
}
