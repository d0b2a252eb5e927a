//! Scheduler failures

use crate::error::AppError;
use std::time::Duration;

pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// The job runner behind the scheduler could not be started or stopped
    #[error("Scheduler backend unavailable: {0}")]
    Backend(String),

    #[error("Cannot register job '{job}': {reason}")]
    Registration { job: String, reason: String },

    /// Periodic jobs need a positive interval
    #[error("Job '{job}' has an invalid interval of {interval:?}")]
    InvalidInterval { job: String, interval: Duration },
}

impl SchedulerError {
    pub(crate) fn registration(job: &str, reason: impl ToString) -> Self {
        SchedulerError::Registration {
            job: job.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl From<SchedulerError> for AppError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::InvalidInterval { .. } => AppError::Configuration(err.to_string()),
            _ => AppError::Scheduler(err.to_string()),
        }
    }
}
