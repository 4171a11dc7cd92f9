//! In-process subscriber registry.

use std::collections::{HashMap, HashSet};
use std::fmt;

use async_trait::async_trait;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;
use uuid::Uuid;

use vidsum_models::{JobEvent, VideoId};

use crate::fanout::EventFanout;

/// Per-connection send buffer. A subscriber that falls this far behind
/// starts losing events rather than blocking broadcasters.
const CLIENT_BUFFER_SIZE: usize = 32;

/// Identifier of one connected subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(Uuid);

impl ClientId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The receiving half handed to a connected subscriber.
///
/// The owner drains `events` and forwards them to its socket/stream; dropping
/// the handle without calling `leave` leaves a closed sender behind, which
/// broadcasts skip.
pub struct ClientHandle {
    pub id: ClientId,
    pub events: mpsc::Receiver<JobEvent>,
}

struct ClientEntry {
    org_id: String,
    user_id: String,
    sender: mpsc::Sender<JobEvent>,
}

#[derive(Default)]
struct Inner {
    clients: HashMap<ClientId, ClientEntry>,
    /// org -> user -> connections
    orgs: HashMap<String, HashMap<String, HashSet<ClientId>>>,
    /// video -> joined connections
    rooms: HashMap<VideoId, HashSet<ClientId>>,
}

/// Registry of connected subscribers: org → user → connection, plus per-video
/// rooms.
///
/// Membership mutation and broadcast iteration are serialized through one
/// lock; broadcasts snapshot the membership under the read lock and deliver
/// outside it, so a broadcast never observes a half-updated set and a slow
/// client never holds the lock.
#[derive(Default)]
pub struct SubscriberRegistry {
    inner: RwLock<Inner>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection for an authenticated identity.
    pub async fn join(&self, org_id: impl Into<String>, user_id: impl Into<String>) -> ClientHandle {
        let org_id = org_id.into();
        let user_id = user_id.into();
        let id = ClientId::new();
        let (sender, events) = mpsc::channel(CLIENT_BUFFER_SIZE);

        let mut inner = self.inner.write().await;
        inner.clients.insert(
            id,
            ClientEntry {
                org_id: org_id.clone(),
                user_id: user_id.clone(),
                sender,
            },
        );
        inner
            .orgs
            .entry(org_id)
            .or_default()
            .entry(user_id)
            .or_default()
            .insert(id);

        ClientHandle { id, events }
    }

    /// Remove a connection and vacate any empty org/user/room entries.
    pub async fn leave(&self, id: ClientId) {
        let mut inner = self.inner.write().await;
        let Some(entry) = inner.clients.remove(&id) else {
            return;
        };

        if let Some(users) = inner.orgs.get_mut(&entry.org_id) {
            if let Some(conns) = users.get_mut(&entry.user_id) {
                conns.remove(&id);
                if conns.is_empty() {
                    users.remove(&entry.user_id);
                }
            }
            if users.is_empty() {
                inner.orgs.remove(&entry.org_id);
            }
        }
        inner.rooms.retain(|_, members| {
            members.remove(&id);
            !members.is_empty()
        });
    }

    /// Join a video's channel. Returns false for unknown connections.
    pub async fn join_video(&self, id: ClientId, video_id: &VideoId) -> bool {
        let mut inner = self.inner.write().await;
        if !inner.clients.contains_key(&id) {
            return false;
        }
        inner.rooms.entry(video_id.clone()).or_default().insert(id);
        true
    }

    /// Leave a video's channel.
    pub async fn leave_video(&self, id: ClientId, video_id: &VideoId) {
        let mut inner = self.inner.write().await;
        if let Some(members) = inner.rooms.get_mut(video_id) {
            members.remove(&id);
            if members.is_empty() {
                inner.rooms.remove(video_id);
            }
        }
    }

    /// Number of currently-registered connections.
    pub async fn client_count(&self) -> usize {
        self.inner.read().await.clients.len()
    }

    async fn deliver(&self, targets: Vec<mpsc::Sender<JobEvent>>, event: JobEvent) {
        for sender in targets {
            // At-most-once: a full or closed buffer drops the event instead
            // of blocking the broadcaster.
            if let Err(e) = sender.try_send(event.clone()) {
                debug!(event = event.name(), "Dropped fan-out event: {}", e);
            }
        }
    }
}

#[async_trait]
impl EventFanout for SubscriberRegistry {
    async fn broadcast_to_video(&self, video_id: &VideoId, event: JobEvent) {
        let targets = {
            let inner = self.inner.read().await;
            inner
                .rooms
                .get(video_id)
                .map(|members| {
                    members
                        .iter()
                        .filter_map(|id| inner.clients.get(id))
                        .map(|entry| entry.sender.clone())
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default()
        };
        self.deliver(targets, event).await;
    }

    async fn broadcast_to_org(&self, org_id: &str, event: JobEvent) {
        let targets = {
            let inner = self.inner.read().await;
            inner
                .clients
                .values()
                .filter(|entry| entry.org_id == org_id)
                .map(|entry| entry.sender.clone())
                .collect::<Vec<_>>()
        };
        self.deliver(targets, event).await;
    }

    async fn send_to_user(&self, org_id: &str, user_id: &str, event: JobEvent) {
        let targets = {
            let inner = self.inner.read().await;
            inner
                .clients
                .values()
                .filter(|entry| entry.org_id == org_id && entry.user_id == user_id)
                .map(|entry| entry.sender.clone())
                .collect::<Vec<_>>()
        };
        self.deliver(targets, event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vidsum_models::{JobId, Stage};

    fn started(video: &str) -> JobEvent {
        JobEvent::started(JobId::new(), Stage::Probe, VideoId::from_string(video))
    }

    #[tokio::test]
    async fn video_broadcast_is_scoped_to_the_room() {
        let registry = SubscriberRegistry::new();
        let v1 = VideoId::from_string("v1");
        let v2 = VideoId::from_string("v2");

        let mut a = registry.join("org1", "alice").await;
        let mut b = registry.join("org1", "bob").await;
        assert!(registry.join_video(a.id, &v1).await);
        assert!(registry.join_video(b.id, &v2).await);

        registry.broadcast_to_video(&v1, started("v1")).await;

        let got = a.events.try_recv().expect("subscriber of v1 sees the event");
        assert_eq!(got.video_id().as_str(), "v1");
        assert!(b.events.try_recv().is_err(), "subscriber of v2 must not");
    }

    #[tokio::test]
    async fn org_broadcast_reaches_every_org_connection() {
        let registry = SubscriberRegistry::new();

        let mut a = registry.join("org1", "alice").await;
        let mut b = registry.join("org1", "bob").await;
        let mut other = registry.join("org2", "carol").await;

        registry.broadcast_to_org("org1", started("v1")).await;

        assert!(a.events.try_recv().is_ok());
        assert!(b.events.try_recv().is_ok());
        assert!(other.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn send_to_user_targets_one_identity() {
        let registry = SubscriberRegistry::new();

        let mut a = registry.join("org1", "alice").await;
        let mut b = registry.join("org1", "bob").await;

        registry.send_to_user("org1", "alice", started("v1")).await;

        assert!(a.events.try_recv().is_ok());
        assert!(b.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn leave_removes_membership_everywhere() {
        let registry = SubscriberRegistry::new();
        let v1 = VideoId::from_string("v1");

        let mut a = registry.join("org1", "alice").await;
        registry.join_video(a.id, &v1).await;
        registry.leave(a.id).await;

        assert_eq!(registry.client_count().await, 0);
        registry.broadcast_to_video(&v1, started("v1")).await;
        assert!(a.events.try_recv().is_err());
        assert!(!registry.join_video(a.id, &v1).await);
    }

    #[tokio::test]
    async fn full_client_buffer_drops_instead_of_blocking() {
        let registry = SubscriberRegistry::new();
        let v1 = VideoId::from_string("v1");

        let a = registry.join("org1", "alice").await;
        registry.join_video(a.id, &v1).await;

        // Never drained; once the buffer fills, broadcasts must keep
        // returning promptly.
        for _ in 0..(CLIENT_BUFFER_SIZE + 8) {
            registry.broadcast_to_video(&v1, started("v1")).await;
        }
    }
}
