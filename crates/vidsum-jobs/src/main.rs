//! Orchestrator service binary.
//!
//! Connects the broker transport once at startup, wires worker callbacks to
//! the orchestrator, and drains/closes the transport on shutdown.

use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vidsum_jobs::{spawn_callback_subscriptions, JobOrchestrator, JobsConfig};
use vidsum_realtime::SubscriberRegistry;
use vidsum_transport::{RedisTransport, Transport};

#[tokio::main]
async fn main() {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing with colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env()
        .add_directive("vidsum=info".parse().expect("valid directive"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(true).with_target(true))
            .with(env_filter)
            .init();
    }

    info!("Starting vidsum-jobs");

    let config = JobsConfig::from_env();
    info!("Orchestrator config: {:?}", config);

    let transport: Arc<dyn Transport> = match RedisTransport::from_env().await {
        Ok(t) => Arc::new(t),
        Err(e) => {
            error!("Failed to connect transport: {}", e);
            std::process::exit(1);
        }
    };

    let registry = Arc::new(SubscriberRegistry::new());
    let orchestrator = JobOrchestrator::new(transport.clone(), registry, config);

    let subscriptions = match spawn_callback_subscriptions(orchestrator, transport.clone()).await {
        Ok(subs) => subs,
        Err(e) => {
            error!("Failed to subscribe to worker callbacks: {}", e);
            std::process::exit(1);
        }
    };
    info!(subjects = subscriptions.len(), "Worker callback dispatch running");

    tokio::signal::ctrl_c().await.ok();
    info!("Received shutdown signal");

    drop(subscriptions);
    if let Err(e) = transport.close().await {
        error!("Transport close failed: {}", e);
    }
    info!("vidsum-jobs stopped");
}
