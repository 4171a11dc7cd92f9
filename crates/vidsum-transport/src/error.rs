//! Transport error types.

use std::time::Duration;
use thiserror::Error;

pub type TransportResult<T> = Result<T, TransportError>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Transport is closed")]
    NotConnected,

    #[error("Publish to {subject} failed: {reason}")]
    PublishFailed { subject: String, reason: String },

    #[error("Request to {subject} timed out after {timeout:?}")]
    Timeout { subject: String, timeout: Duration },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TransportError {
    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::ConnectionFailed(msg.into())
    }

    pub fn publish_failed(subject: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PublishFailed {
            subject: subject.into(),
            reason: reason.into(),
        }
    }
}
