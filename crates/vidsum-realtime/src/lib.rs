//! Status fan-out for the VidSum pipeline.
//!
//! Routes job lifecycle events to subscribers scoped by video, org or user,
//! without coupling the orchestrator to a delivery mechanism. Delivery is
//! at-most-once and best-effort; membership is a pure lookup structure and
//! never used to infer job state.

pub mod fanout;
pub mod registry;

pub use fanout::EventFanout;
pub use registry::{ClientHandle, ClientId, SubscriberRegistry};
