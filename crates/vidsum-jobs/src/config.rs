//! Orchestrator configuration.

use std::time::Duration;

/// Retry policy and subject layout for the orchestrator.
#[derive(Debug, Clone)]
pub struct JobsConfig {
    /// Retry budget per job
    pub max_retries: u32,
    /// Base delay for exponential backoff (doubles each attempt)
    pub backoff_base: Duration,
    /// Cap on the backoff delay
    pub backoff_max: Duration,
    /// Subject workers publish success callbacks to
    pub result_subject: String,
    /// Subject workers publish failure callbacks to
    pub error_subject: String,
    /// Dead-letter subject
    pub dlq_subject: String,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: Duration::from_millis(1000),
            backoff_max: Duration::from_secs(60),
            result_subject: "jobs.result".to_string(),
            error_subject: "jobs.error".to_string(),
            dlq_subject: "jobs.dlq".to_string(),
        }
    }
}

impl JobsConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_retries: std::env::var("JOBS_MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_retries),
            backoff_base: Duration::from_millis(
                std::env::var("JOBS_BACKOFF_BASE_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(1000),
            ),
            backoff_max: Duration::from_millis(
                std::env::var("JOBS_BACKOFF_MAX_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(60_000),
            ),
            result_subject: std::env::var("JOBS_RESULT_SUBJECT")
                .unwrap_or(defaults.result_subject),
            error_subject: std::env::var("JOBS_ERROR_SUBJECT").unwrap_or(defaults.error_subject),
            dlq_subject: std::env::var("JOBS_DLQ_SUBJECT").unwrap_or(defaults.dlq_subject),
        }
    }
}
