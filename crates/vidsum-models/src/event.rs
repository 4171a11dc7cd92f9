//! Realtime fan-out events.
//!
//! Job lifecycle transitions pushed to subscribers scoped by video, org or
//! user. Delivery is at-most-once and best-effort; these events are not a
//! replay log.

use serde::{Deserialize, Serialize};

use crate::{JobId, Stage, VideoId};

/// A job lifecycle event delivered over a per-video channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum JobEvent {
    /// Job published to its stage subject
    #[serde(rename = "job:started", rename_all = "camelCase")]
    Started {
        job_id: JobId,
        stage: Stage,
        video_id: VideoId,
    },

    /// Worker reported success
    #[serde(rename = "job:completed", rename_all = "camelCase")]
    Completed {
        job_id: JobId,
        video_id: VideoId,
        result: serde_json::Value,
    },

    /// Job exhausted its retry budget; terminal failure
    #[serde(rename = "job:failed", rename_all = "camelCase")]
    Failed {
        job_id: JobId,
        video_id: VideoId,
        error: String,
    },
}

impl JobEvent {
    /// Create a `job:started` event.
    pub fn started(job_id: JobId, stage: Stage, video_id: VideoId) -> Self {
        JobEvent::Started {
            job_id,
            stage,
            video_id,
        }
    }

    /// Create a `job:completed` event.
    pub fn completed(job_id: JobId, video_id: VideoId, result: serde_json::Value) -> Self {
        JobEvent::Completed {
            job_id,
            video_id,
            result,
        }
    }

    /// Create a `job:failed` event.
    pub fn failed(job_id: JobId, video_id: VideoId, error: impl Into<String>) -> Self {
        JobEvent::Failed {
            job_id,
            video_id,
            error: error.into(),
        }
    }

    /// The job this event concerns.
    pub fn job_id(&self) -> &JobId {
        match self {
            JobEvent::Started { job_id, .. } => job_id,
            JobEvent::Completed { job_id, .. } => job_id,
            JobEvent::Failed { job_id, .. } => job_id,
        }
    }

    /// The video channel this event belongs to.
    pub fn video_id(&self) -> &VideoId {
        match self {
            JobEvent::Started { video_id, .. } => video_id,
            JobEvent::Completed { video_id, .. } => video_id,
            JobEvent::Failed { video_id, .. } => video_id,
        }
    }

    /// Event name on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            JobEvent::Started { .. } => "job:started",
            JobEvent::Completed { .. } => "job:completed",
            JobEvent::Failed { .. } => "job:failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_serialization_uses_colon_tags() {
        let event = JobEvent::started(
            JobId::from_string("job-1"),
            Stage::Asr,
            VideoId::from_string("v1"),
        );
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["type"], "job:started");
        assert_eq!(json["jobId"], "job-1");
        assert_eq!(json["stage"], "asr");
        assert_eq!(json["videoId"], "v1");
    }

    #[test]
    fn failed_event_carries_error() {
        let event = JobEvent::failed(
            JobId::from_string("job-1"),
            VideoId::from_string("v1"),
            "GPU timeout",
        );
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["type"], "job:failed");
        assert_eq!(json["error"], "GPU timeout");
    }
}
