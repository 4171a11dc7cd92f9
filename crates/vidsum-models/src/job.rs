//! Job definitions for the processing pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::VideoId;

/// Unique identifier for a job.
///
/// Stable across retries of the same logical task: a retry republishes the
/// same `JobId` with an incremented attempt count.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One named step of the video-processing pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Probe video for metadata
    Probe,
    /// ASR transcription
    Asr,
    /// Speaker diarization
    Diarization,
    /// Scene segmentation
    Segmentation,
    /// Summarization
    Summarization,
    /// Highlight detection
    Highlight,
}

impl Stage {
    /// All stages in pipeline order.
    pub const ALL: [Stage; 6] = [
        Stage::Probe,
        Stage::Asr,
        Stage::Diarization,
        Stage::Segmentation,
        Stage::Summarization,
        Stage::Highlight,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Probe => "probe",
            Stage::Asr => "asr",
            Stage::Diarization => "diarization",
            Stage::Segmentation => "segmentation",
            Stage::Summarization => "summarization",
            Stage::Highlight => "highlight",
        }
    }

    /// Broker subject this stage's jobs are published to.
    pub fn subject(&self) -> String {
        format!("jobs.{}", self.as_str())
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "probe" => Ok(Stage::Probe),
            "asr" => Ok(Stage::Asr),
            "diarization" => Ok(Stage::Diarization),
            "segmentation" => Ok(Stage::Segmentation),
            "summarization" => Ok(Stage::Summarization),
            "highlight" => Ok(Stage::Highlight),
            other => Err(format!("unknown stage: {other}")),
        }
    }
}

/// Logical state of a job as tracked by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Job created but not yet published
    #[default]
    Pending,
    /// Job published, awaiting a worker callback
    Running,
    /// Job completed successfully
    Completed,
    /// Job failed and a delayed republish is scheduled
    Retrying,
    /// Job exhausted its retry budget and was parked on the DLQ
    DeadLettered,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Retrying => "retrying",
            JobState::DeadLettered => "dead_lettered",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::DeadLettered)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Opaque data the worker needs; always carries the owning video.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobPayload {
    /// Owning video ID
    #[serde(rename = "videoId")]
    pub video_id: VideoId,
    /// Stage-specific fields, passed through untouched
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl JobPayload {
    /// Payload carrying only the video ID.
    pub fn for_video(video_id: VideoId) -> Self {
        Self {
            video_id,
            extra: serde_json::Map::new(),
        }
    }
}

/// A unit of work dispatched to a worker over `jobs.<stage>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Unique job ID, stable across retries
    pub id: JobId,

    /// Pipeline stage
    #[serde(rename = "type")]
    pub stage: Stage,

    /// Worker payload
    pub data: JobPayload,

    /// Attempts already made
    pub retries: u32,

    /// Retry budget
    pub max_retries: u32,

    /// Timestamp of (re)publication
    pub created_at: DateTime<Utc>,

    /// Tenant identifier for authorization and fan-out scoping
    pub org_id: String,

    /// Owner identifier
    pub user_id: String,
}

impl Job {
    /// Create a new job for one stage of a video's pipeline.
    pub fn new(
        stage: Stage,
        video_id: VideoId,
        org_id: impl Into<String>,
        user_id: impl Into<String>,
        max_retries: u32,
    ) -> Self {
        Self {
            id: JobId::new(),
            stage,
            data: JobPayload::for_video(video_id),
            retries: 0,
            max_retries,
            created_at: Utc::now(),
            org_id: org_id.into(),
            user_id: user_id.into(),
        }
    }

    /// Broker subject for this job.
    pub fn subject(&self) -> String {
        self.stage.subject()
    }

    /// Owning video ID.
    pub fn video_id(&self) -> &VideoId {
        &self.data.video_id
    }

    /// The republished form of this job for its next attempt.
    ///
    /// Keeps the same id, increments the attempt count and refreshes the
    /// publication timestamp.
    pub fn next_attempt(&self) -> Self {
        let mut next = self.clone();
        next.retries += 1;
        next.created_at = Utc::now();
        next
    }

    /// Whether another attempt remains in the retry budget.
    pub fn can_retry(&self) -> bool {
        self.retries < self.max_retries
    }
}
