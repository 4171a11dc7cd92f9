//! Worker callback dispatch.
//!
//! Wires the `jobs.result` and `jobs.error` subjects to the orchestrator's
//! handlers. A malformed callback or a handler error is logged and dropped;
//! nothing a worker sends can crash the shared dispatch loop.

use std::sync::Arc;

use tracing::warn;

use vidsum_models::{WorkerError, WorkerResult};
use vidsum_transport::{Subscription, Transport, TransportResult};

use crate::orchestrator::JobOrchestrator;

/// Subscribe the orchestrator to worker callbacks.
///
/// Returns the subscriptions; dropping them stops dispatch.
pub async fn spawn_callback_subscriptions(
    orchestrator: JobOrchestrator,
    transport: Arc<dyn Transport>,
) -> TransportResult<Vec<Subscription>> {
    let config = orchestrator.config().clone();

    let result_sub = {
        let orchestrator = orchestrator.clone();
        transport
            .subscribe(
                &config.result_subject,
                Arc::new(move |value| {
                    let orchestrator = orchestrator.clone();
                    tokio::spawn(async move {
                        match serde_json::from_value::<WorkerResult>(value) {
                            Ok(msg) => {
                                if let Err(e) = orchestrator
                                    .handle_result(&msg.job_id, msg.result, &msg.video_id)
                                    .await
                                {
                                    warn!(job_id = %msg.job_id, "Result callback rejected: {}", e);
                                }
                            }
                            Err(e) => warn!("Ignoring malformed worker result: {}", e),
                        }
                    });
                }),
            )
            .await?
    };

    let error_sub = transport
        .subscribe(
            &config.error_subject,
            Arc::new(move |value| {
                let orchestrator = orchestrator.clone();
                tokio::spawn(async move {
                    match serde_json::from_value::<WorkerError>(value) {
                        Ok(msg) => {
                            if let Err(e) = orchestrator
                                .handle_error(
                                    &msg.job_id,
                                    &msg.error,
                                    &msg.video_id,
                                    msg.retries,
                                    msg.max_retries,
                                )
                                .await
                            {
                                warn!(job_id = %msg.job_id, "Error callback rejected: {}", e);
                            }
                        }
                        Err(e) => warn!("Ignoring malformed worker error: {}", e),
                    }
                });
            }),
        )
        .await?;

    Ok(vec![result_sub, error_sub])
}
