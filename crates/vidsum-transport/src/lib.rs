//! Broker transport for the VidSum pipeline.
//!
//! This crate provides:
//! - The [`Transport`] trait: fire-and-forget publish, subscribe-with-callback
//!   and request-reply with timeout over a named subject namespace
//! - [`RedisTransport`]: Redis pub/sub implementation
//! - [`InMemoryTransport`]: process-local implementation for tests and
//!   single-node runs
//!
//! Delivery is at-most-once with no ordering guarantee across subjects.

pub mod error;
pub mod memory;
pub mod redis;
pub mod transport;

pub use error::{TransportError, TransportResult};
pub use memory::InMemoryTransport;
pub use redis::{RedisTransport, TransportConfig};
pub use transport::{
    publish_json, request_json, MessageHandler, RequestEnvelope, Subscription, Transport,
};
