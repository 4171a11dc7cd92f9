//! The fan-out seam the orchestrator is injected with.

use async_trait::async_trait;

use vidsum_models::{JobEvent, VideoId};

/// Push delivery of job lifecycle events to currently-connected subscribers.
///
/// Implementations own subscriber membership and nothing else: they never
/// mutate job state, and a subscriber that is not connected at broadcast time
/// never receives the event. Swapping the in-process registry for a
/// distributed one only requires another implementation of this trait.
#[async_trait]
pub trait EventFanout: Send + Sync {
    /// Deliver to every subscriber joined to the video's channel.
    async fn broadcast_to_video(&self, video_id: &VideoId, event: JobEvent);

    /// Deliver to every subscriber belonging to the org.
    async fn broadcast_to_org(&self, org_id: &str, event: JobEvent);

    /// Deliver to one user's connections within an org.
    async fn send_to_user(&self, org_id: &str, user_id: &str, event: JobEvent);
}
