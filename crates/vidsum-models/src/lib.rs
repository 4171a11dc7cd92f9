//! Shared data models for the VidSum pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Jobs and pipeline stages
//! - Dead-letter records
//! - Worker callback messages
//! - Realtime fan-out events
//! - Per-stage pipeline status

pub mod callback;
pub mod dlq;
pub mod event;
pub mod job;
pub mod status;
pub mod video;

// Re-export common types
pub use callback::{WorkerError, WorkerResult};
pub use dlq::DeadLetterRecord;
pub use event::JobEvent;
pub use job::{Job, JobId, JobPayload, JobState, Stage};
pub use status::{PipelineStatus, RunPhase, StageStatus};
pub use video::VideoId;
