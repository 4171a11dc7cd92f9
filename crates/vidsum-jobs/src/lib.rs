//! Job orchestration for the VidSum pipeline.
//!
//! This crate provides:
//! - [`JobOrchestrator`]: pipeline start, retry/backoff scheduling,
//!   dead-letter handoff and replay, stage-level status
//! - [`spawn_callback_subscriptions`]: wiring of worker callbacks to the
//!   orchestrator over the transport
//! - [`JobsConfig`] / [`BackoffPolicy`]: retry policy configuration

pub mod backoff;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod orchestrator;
mod store;

pub use backoff::BackoffPolicy;
pub use config::JobsConfig;
pub use dispatch::spawn_callback_subscriptions;
pub use error::{JobsError, JobsResult};
pub use logging::JobLogger;
pub use orchestrator::JobOrchestrator;
