//! Per-stage pipeline status.
//!
//! Fan-out is not a replay log, so reconnecting clients query this snapshot
//! instead. Partial success stays visible as a stage-level breakdown rather
//! than a single pipeline-wide boolean.

use serde::{Deserialize, Serialize};

use crate::{JobId, JobState, Stage, VideoId};

/// Status of one stage of a pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageStatus {
    pub stage: Stage,
    pub job_id: JobId,
    pub state: JobState,
    pub retries: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Overall phase of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    /// At least one stage has not reached a terminal state
    Processing,
    /// Every stage completed
    Completed,
    /// Every stage is terminal and at least one was dead-lettered
    Failed,
}

impl RunPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunPhase::Processing => "processing",
            RunPhase::Completed => "completed",
            RunPhase::Failed => "failed",
        }
    }
}

/// Snapshot of a pipeline run, one entry per stage in pipeline order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStatus {
    pub video_id: VideoId,
    pub phase: RunPhase,
    pub stages: Vec<StageStatus>,
    /// Last error of the first dead-lettered stage, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PipelineStatus {
    /// Derive the overall phase from the per-stage breakdown.
    pub fn from_stages(video_id: VideoId, stages: Vec<StageStatus>) -> Self {
        let all_terminal = stages.iter().all(|s| s.state.is_terminal());
        let first_dead = stages
            .iter()
            .find(|s| s.state == JobState::DeadLettered)
            .and_then(|s| s.error.clone());

        let phase = if !all_terminal {
            RunPhase::Processing
        } else if first_dead.is_some() {
            RunPhase::Failed
        } else {
            RunPhase::Completed
        };

        Self {
            video_id,
            phase,
            stages,
            error: first_dead,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.phase != RunPhase::Processing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage(stage: Stage, state: JobState, error: Option<&str>) -> StageStatus {
        StageStatus {
            stage,
            job_id: JobId::new(),
            state,
            retries: 0,
            error: error.map(String::from),
        }
    }

    #[test]
    fn processing_until_every_stage_is_terminal() {
        let status = PipelineStatus::from_stages(
            VideoId::from_string("v1"),
            vec![
                stage(Stage::Probe, JobState::Completed, None),
                stage(Stage::Asr, JobState::Running, None),
            ],
        );
        assert_eq!(status.phase, RunPhase::Processing);
        assert!(!status.is_terminal());
    }

    #[test]
    fn partial_success_surfaces_as_failed_with_stage_breakdown() {
        let status = PipelineStatus::from_stages(
            VideoId::from_string("v1"),
            vec![
                stage(Stage::Probe, JobState::Completed, None),
                stage(Stage::Asr, JobState::DeadLettered, Some("GPU timeout")),
            ],
        );
        assert_eq!(status.phase, RunPhase::Failed);
        assert_eq!(status.error.as_deref(), Some("GPU timeout"));
        assert_eq!(status.stages.len(), 2);
    }

    #[test]
    fn completed_when_all_stages_complete() {
        let status = PipelineStatus::from_stages(
            VideoId::from_string("v1"),
            vec![stage(Stage::Probe, JobState::Completed, None)],
        );
        assert_eq!(status.phase, RunPhase::Completed);
    }
}
