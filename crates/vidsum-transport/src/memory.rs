//! In-memory transport for tests and single-node runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::time::timeout as tokio_timeout;
use tracing::warn;
use uuid::Uuid;

use crate::error::{TransportError, TransportResult};
use crate::transport::{MessageHandler, RequestEnvelope, Subscription, Transport};

const SUBJECT_BUFFER: usize = 256;

/// Process-local transport with the same semantics as the broker: at-most-once
/// delivery, no ordering across subjects, subscribers only see messages
/// published while they are subscribed.
///
/// Keeps a log of accepted publishes so tests can assert on wire traffic
/// without racing the delivery pumps.
#[derive(Default)]
pub struct InMemoryTransport {
    subjects: Mutex<HashMap<String, broadcast::Sender<Vec<u8>>>>,
    published: Mutex<Vec<(String, Vec<u8>)>>,
    closed: AtomicBool,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_open(&self) -> TransportResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        Ok(())
    }

    fn sender_for(&self, subject: &str) -> broadcast::Sender<Vec<u8>> {
        let mut subjects = self
            .subjects
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subjects
            .entry(subject.to_string())
            .or_insert_with(|| broadcast::channel(SUBJECT_BUFFER).0)
            .clone()
    }

    /// All payloads accepted for a subject, in publish order.
    pub fn published_to(&self, subject: &str) -> Vec<serde_json::Value> {
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(s, _)| s == subject)
            .filter_map(|(_, payload)| serde_json::from_slice(payload).ok())
            .collect()
    }

    /// All `(subject, payload)` pairs accepted so far.
    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> TransportResult<()> {
        self.ensure_open()?;

        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((subject.to_string(), payload.clone()));

        // No receivers means nobody was subscribed at publish time; the
        // message is simply lost, matching broker semantics.
        let _ = self.sender_for(subject).send(payload);
        Ok(())
    }

    async fn subscribe(
        &self,
        subject: &str,
        handler: MessageHandler,
    ) -> TransportResult<Subscription> {
        self.ensure_open()?;

        let mut rx = self.sender_for(subject).subscribe();
        let channel = subject.to_string();
        let pump = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(payload) => match serde_json::from_slice::<serde_json::Value>(&payload) {
                        Ok(value) => handler(value),
                        Err(e) => {
                            warn!(subject = %channel, "Dropping malformed message: {}", e);
                        }
                    },
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(subject = %channel, skipped, "Subscriber lagged, messages dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(Subscription::new(subject, pump))
    }

    async fn request(
        &self,
        subject: &str,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> TransportResult<Vec<u8>> {
        self.ensure_open()?;

        let reply_subject = format!("vidsum:reply:{}", Uuid::new_v4());
        let mut rx = self.sender_for(&reply_subject).subscribe();

        let envelope = RequestEnvelope {
            reply_to: reply_subject,
            body: serde_json::from_slice(&payload)?,
        };
        self.publish(subject, serde_json::to_vec(&envelope)?).await?;

        match tokio_timeout(timeout, rx.recv()).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(TransportError::connection_failed(
                "reply channel closed before a reply arrived",
            )),
            Err(_) => Err(TransportError::Timeout {
                subject: subject.to_string(),
                timeout,
            }),
        }
    }

    async fn close(&self) -> TransportResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.subjects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn collector() -> (
        MessageHandler,
        std::sync::Arc<Mutex<Vec<serde_json::Value>>>,
    ) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handler: MessageHandler = Arc::new(move |value| {
            sink.lock().unwrap().push(value);
        });
        (handler, seen)
    }

    #[tokio::test]
    async fn delivers_to_subscribers_of_the_subject() {
        let transport = InMemoryTransport::new();
        let (handler, seen) = collector();

        let _sub = transport.subscribe("jobs.probe", handler).await.unwrap();
        transport
            .publish("jobs.probe", br#"{"id":"1"}"#.to_vec())
            .await
            .unwrap();
        transport
            .publish("jobs.asr", br#"{"id":"2"}"#.to_vec())
            .await
            .unwrap();

        tokio::task::yield_now().await;
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0]["id"], "1");
    }

    #[tokio::test]
    async fn malformed_messages_never_reach_the_handler() {
        let transport = InMemoryTransport::new();
        let (handler, seen) = collector();

        let _sub = transport.subscribe("jobs.probe", handler).await.unwrap();
        transport
            .publish("jobs.probe", b"not json".to_vec())
            .await
            .unwrap();
        transport
            .publish("jobs.probe", br#"{"ok":true}"#.to_vec())
            .await
            .unwrap();

        tokio::task::yield_now().await;
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0]["ok"], true);
    }

    #[tokio::test]
    async fn request_times_out_without_a_responder() {
        let transport = InMemoryTransport::new();

        let err = transport
            .request("jobs.probe", b"{}".to_vec(), Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Timeout { .. }));
    }

    #[tokio::test]
    async fn request_reply_round_trip() {
        let transport = Arc::new(InMemoryTransport::new());

        let responder = transport.clone();
        let _sub = transport
            .subscribe(
                "jobs.probe",
                Arc::new(move |value| {
                    let envelope: RequestEnvelope = serde_json::from_value(value).unwrap();
                    let responder = responder.clone();
                    tokio::spawn(async move {
                        responder
                            .publish(&envelope.reply_to, br#"{"pong":true}"#.to_vec())
                            .await
                            .unwrap();
                    });
                }),
            )
            .await
            .unwrap();

        let reply = transport
            .request("jobs.probe", br#"{"ping":true}"#.to_vec(), Duration::from_secs(1))
            .await
            .unwrap();
        let reply: serde_json::Value = serde_json::from_slice(&reply).unwrap();
        assert_eq!(reply["pong"], true);
    }

    #[tokio::test]
    async fn publish_after_close_is_rejected() {
        let transport = InMemoryTransport::new();
        transport.close().await.unwrap();

        let err = transport
            .publish("jobs.probe", b"{}".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::NotConnected));
    }
}
