//! Redis pub/sub transport.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tokio::time::timeout as tokio_timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{TransportError, TransportResult};
use crate::transport::{MessageHandler, RequestEnvelope, Subscription, Transport};

/// Transport configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Redis URL
    pub redis_url: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
        }
    }
}

impl TransportConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
        }
    }
}

/// Prefix for per-request reply subjects.
const REPLY_SUBJECT_PREFIX: &str = "vidsum:reply:";

/// Transport over Redis pub/sub channels.
///
/// One channel per subject. The connection is established once at
/// construction and released by [`close`](Transport::close); each
/// subscription holds its own pub/sub connection, which is the redis crate's
/// model for push delivery.
pub struct RedisTransport {
    client: redis::Client,
    conn: MultiplexedConnection,
    closed: AtomicBool,
}

impl RedisTransport {
    /// Connect to the broker.
    pub async fn connect(config: TransportConfig) -> TransportResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| TransportError::connection_failed(e.to_string()))?;

        info!(url = %config.redis_url, "Connected to broker");
        Ok(Self {
            client,
            conn,
            closed: AtomicBool::new(false),
        })
    }

    /// Connect using environment configuration.
    pub async fn from_env() -> TransportResult<Self> {
        Self::connect(TransportConfig::from_env()).await
    }

    fn ensure_open(&self) -> TransportResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for RedisTransport {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> TransportResult<()> {
        self.ensure_open()?;

        let mut conn = self.conn.clone();
        conn.publish::<_, _, ()>(subject, payload)
            .await
            .map_err(|e| TransportError::publish_failed(subject, e.to_string()))?;

        debug!(subject, "Published message");
        Ok(())
    }

    async fn subscribe(
        &self,
        subject: &str,
        handler: MessageHandler,
    ) -> TransportResult<Subscription> {
        self.ensure_open()?;

        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(subject).await?;
        info!(subject, "Subscribed");

        let channel = subject.to_string();
        let pump = tokio::spawn(async move {
            let mut stream = pubsub.into_on_message();
            while let Some(msg) = stream.next().await {
                let payload: Vec<u8> = match msg.get_payload() {
                    Ok(p) => p,
                    Err(e) => {
                        warn!(subject = %channel, "Dropping unreadable message: {}", e);
                        continue;
                    }
                };
                match serde_json::from_slice::<serde_json::Value>(&payload) {
                    Ok(value) => handler(value),
                    Err(e) => {
                        warn!(subject = %channel, "Dropping malformed message: {}", e);
                    }
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

        let reply_subject = format!("{}{}", REPLY_SUBJECT_PREFIX, Uuid::new_v4());

        // Subscribe to the reply subject before publishing so the reply
        // cannot race the subscription.
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(&reply_subject).await?;

        let envelope = RequestEnvelope {
            reply_to: reply_subject.clone(),
            body: serde_json::from_slice(&payload)?,
        };
        self.publish(subject, serde_json::to_vec(&envelope)?).await?;

        let mut stream = pubsub.into_on_message();
        match tokio_timeout(timeout, stream.next()).await {
            Ok(Some(msg)) => Ok(msg.get_payload()?),
            Ok(None) => Err(TransportError::connection_failed(
                "reply subscription closed before a reply arrived",
            )),
            Err(_) => Err(TransportError::Timeout {
                subject: subject.to_string(),
                timeout,
            }),
        }
    }

    async fn close(&self) -> TransportResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        info!("Broker connection drained and closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    #[ignore = "requires Redis"]
    async fn publish_subscribe_round_trip() {
        dotenvy::dotenv().ok();

        let transport = RedisTransport::from_env().await.expect("connect");
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        let _sub = transport
            .subscribe(
                "vidsum:test:roundtrip",
                Arc::new(move |value| {
                    tx.send(value).ok();
                }),
            )
            .await
            .expect("subscribe");

        transport
            .publish("vidsum:test:roundtrip", br#"{"hello":"world"}"#.to_vec())
            .await
            .expect("publish");

        let received = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timely delivery")
            .expect("one message");
        assert_eq!(received["hello"], "world");
    }

    #[tokio::test]
    #[ignore = "requires Redis"]
    async fn publish_after_close_is_rejected() {
        dotenvy::dotenv().ok();

        let transport = RedisTransport::from_env().await.expect("connect");
        transport.close().await.expect("close");

        let err = transport
            .publish("vidsum:test:closed", b"{}".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::NotConnected));
    }
}
