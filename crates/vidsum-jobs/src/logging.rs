//! Structured job logging.

use std::time::Duration;
use tracing::{error, info, warn};
use vidsum_models::{JobId, Stage};

/// Consistent lifecycle logging for one job, with job id and stage attached
/// to every line.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    stage: &'static str,
}

impl JobLogger {
    pub fn new(job_id: &JobId, stage: Stage) -> Self {
        Self {
            job_id: job_id.to_string(),
            stage: stage.as_str(),
        }
    }

    pub fn published(&self, subject: &str) {
        info!(
            job_id = %self.job_id,
            stage = %self.stage,
            subject,
            "Job published"
        );
    }

    pub fn completed(&self) {
        info!(job_id = %self.job_id, stage = %self.stage, "Job completed");
    }

    pub fn retry_scheduled(&self, attempt: u32, max_retries: u32, delay: Duration) {
        warn!(
            job_id = %self.job_id,
            stage = %self.stage,
            attempt = attempt + 1,
            max_retries,
            ?delay,
            "Retry scheduled"
        );
    }

    pub fn dead_lettered(&self, error: &str) {
        error!(
            job_id = %self.job_id,
            stage = %self.stage,
            error,
            "Job failed permanently, sent to DLQ"
        );
    }
}
