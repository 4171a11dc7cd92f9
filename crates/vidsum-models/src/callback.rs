//! Worker callback messages.
//!
//! Workers are external black boxes: they consume stage jobs and report
//! outcomes back on the `jobs.result` and `jobs.error` subjects.

use serde::{Deserialize, Serialize};

use crate::{JobId, VideoId};

/// Success callback published by a worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerResult {
    /// Job that finished
    pub job_id: JobId,
    /// Owning video
    pub video_id: VideoId,
    /// Stage output, passed through to subscribers
    #[serde(default)]
    pub result: serde_json::Value,
}

/// Failure callback published by a worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerError {
    /// Job that failed
    pub job_id: JobId,
    /// Owning video
    pub video_id: VideoId,
    /// Failure reason
    pub error: String,
    /// Attempt count as seen by the worker
    #[serde(default)]
    pub retries: u32,
    /// Retry budget as seen by the worker
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_max_retries() -> u32 {
    3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_error_defaults() {
        let json = serde_json::json!({
            "jobId": "job-1",
            "videoId": "v1",
            "error": "boom"
        });
        let err: WorkerError = serde_json::from_value(json).unwrap();

        assert_eq!(err.retries, 0);
        assert_eq!(err.max_retries, 3);
    }
}
