//! The transport abstraction.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::TransportResult;

/// Callback invoked once per received, well-formed message.
///
/// Malformed (non-deserializable) payloads are logged and dropped by the
/// transport before this is called, so a broken message never reaches the
/// handler.
pub type MessageHandler = Arc<dyn Fn(serde_json::Value) + Send + Sync>;

/// Handle for an active subscription. Dropping it stops delivery.
pub struct Subscription {
    subject: String,
    pump: JoinHandle<()>,
}

impl Subscription {
    pub(crate) fn new(subject: impl Into<String>, pump: JoinHandle<()>) -> Self {
        Self {
            subject: subject.into(),
            pump,
        }
    }

    /// Subject this subscription listens on.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Stop delivering messages to the handler.
    pub fn unsubscribe(self) {
        debug!(subject = %self.subject, "Unsubscribing");
        self.pump.abort();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("subject", &self.subject)
            .finish()
    }
}

/// Envelope for request-reply over a pub/sub broker.
///
/// The requester subscribes to a fresh reply subject, then publishes the
/// request body wrapped in this envelope; the responder publishes its reply
/// to `reply_to`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestEnvelope {
    /// Subject the single reply must be published to
    pub reply_to: String,
    /// Request body
    pub body: serde_json::Value,
}

/// Delivery of JSON-serializable messages to named subjects.
///
/// At-most-once: "accepted by broker" is the only confirmation a publisher
/// gets, and subscribers not connected at publish time never see the message.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Fire-and-forget publish of a serialized message.
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> TransportResult<()>;

    /// Register a callback invoked once per received message.
    async fn subscribe(&self, subject: &str, handler: MessageHandler)
        -> TransportResult<Subscription>;

    /// Publish and wait for a single reply, failing with
    /// [`TransportError::Timeout`](crate::TransportError::Timeout) if none
    /// arrives in time.
    async fn request(
        &self,
        subject: &str,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> TransportResult<Vec<u8>>;

    /// Drain and release the underlying connection. Paired with the
    /// connection established at construction time.
    async fn close(&self) -> TransportResult<()>;
}

/// Serialize a message and publish it.
pub async fn publish_json<T: Serialize + Sync>(
    transport: &dyn Transport,
    subject: &str,
    message: &T,
) -> TransportResult<()> {
    let payload = serde_json::to_vec(message)?;
    transport.publish(subject, payload).await
}

/// Serialize a request, wait for the reply and deserialize it.
pub async fn request_json<T: Serialize + Sync, R: DeserializeOwned>(
    transport: &dyn Transport,
    subject: &str,
    message: &T,
    timeout: Duration,
) -> TransportResult<R> {
    let payload = serde_json::to_vec(message)?;
    let reply = transport.request(subject, payload, timeout).await?;
    Ok(serde_json::from_slice(&reply)?)
}
