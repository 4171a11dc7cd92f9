//! Dead-letter records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{JobId, VideoId};

/// A job that exhausted its retry budget, published to `jobs.dlq`.
///
/// Terminal: requires operator-triggered replay or manual intervention.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterRecord {
    /// Job that was parked
    pub job_id: JobId,
    /// Last failure reason
    pub error: String,
    /// Owning video
    pub video_id: VideoId,
    /// When the job was dead-lettered
    pub timestamp: DateTime<Utc>,
}

impl DeadLetterRecord {
    /// Record a dead-lettered job as of now.
    pub fn new(job_id: JobId, error: impl Into<String>, video_id: VideoId) -> Self {
        Self {
            job_id,
            error: error.into(),
            video_id,
            timestamp: Utc::now(),
        }
    }
}
