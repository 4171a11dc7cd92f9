//! Orchestrator error types.

use thiserror::Error;
use vidsum_models::{JobId, VideoId};
use vidsum_transport::TransportError;

pub type JobsResult<T> = Result<T, JobsError>;

#[derive(Debug, Error)]
pub enum JobsError {
    #[error("A pipeline run is already in flight for video {0}")]
    DuplicateRun(VideoId),

    #[error("Unknown job: {0}")]
    UnknownJob(JobId),

    #[error("No pipeline run for video {0}")]
    UnknownRun(VideoId),

    #[error("Job {0} is not dead-lettered")]
    NotDeadLettered(JobId),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
