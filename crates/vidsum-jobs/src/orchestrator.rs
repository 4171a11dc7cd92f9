//! The job orchestrator.
//!
//! Turns a "process this video" intent into one job per pipeline stage,
//! decides retry versus dead-letter on every worker failure, and fans
//! lifecycle transitions out to realtime subscribers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use vidsum_models::{
    DeadLetterRecord, Job, JobEvent, JobId, PipelineStatus, Stage, VideoId,
};
use vidsum_realtime::EventFanout;
use vidsum_transport::{publish_json, Transport};

use crate::backoff::BackoffPolicy;
use crate::config::JobsConfig;
use crate::error::JobsResult;
use crate::logging::JobLogger;
use crate::store::{CompleteOutcome, ErrorDecision, RunStore};

struct Inner {
    transport: Arc<dyn Transport>,
    fanout: Arc<dyn EventFanout>,
    config: JobsConfig,
    backoff: BackoffPolicy,
    store: RunStore,
    /// Pending retry timers by job id, so a deleted run cannot resurrect
    /// jobs from the grave.
    timers: Mutex<HashMap<JobId, JoinHandle<()>>>,
}

/// Orchestrates the six-stage video-processing pipeline.
///
/// Cheap to clone; all state is shared. Every mutation happens on a
/// message-handler turn, publishes and retry timers are the only suspension
/// points.
#[derive(Clone)]
pub struct JobOrchestrator {
    inner: Arc<Inner>,
}

impl JobOrchestrator {
    pub fn new(
        transport: Arc<dyn Transport>,
        fanout: Arc<dyn EventFanout>,
        config: JobsConfig,
    ) -> Self {
        let backoff = BackoffPolicy::new(config.backoff_base, config.backoff_max);
        Self {
            inner: Arc::new(Inner {
                transport,
                fanout,
                config,
                backoff,
                store: RunStore::default(),
                timers: Mutex::new(HashMap::new()),
            }),
        }
    }

    fn timers(&self) -> MutexGuard<'_, HashMap<JobId, JoinHandle<()>>> {
        self.inner
            .timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn abort_timer(&self, job_id: &JobId) {
        if let Some(handle) = self.timers().remove(job_id) {
            handle.abort();
        }
    }

    /// Start a pipeline run: one job per stage, published in pipeline order,
    /// each paired with a `job:started` fan-out.
    ///
    /// Rejects a second call for the same video while a run is in flight.
    /// If a publish fails mid-way the already-published jobs stay in flight
    /// and the error propagates; the partial run stays registered so the
    /// caller sees the failure explicitly (cancel it to start over).
    pub async fn start_processing(
        &self,
        video_id: &VideoId,
        org_id: &str,
        user_id: &str,
    ) -> JobsResult<Vec<JobId>> {
        let jobs: Vec<Job> = Stage::ALL
            .iter()
            .map(|stage| {
                Job::new(
                    *stage,
                    video_id.clone(),
                    org_id,
                    user_id,
                    self.inner.config.max_retries,
                )
            })
            .collect();

        self.inner.store.begin_run(video_id, &jobs)?;
        info!(video_id = %video_id, org_id, "Starting pipeline run");

        let mut job_ids = Vec::with_capacity(jobs.len());
        for job in jobs {
            let logger = JobLogger::new(&job.id, job.stage);
            let subject = job.subject();

            publish_json(self.inner.transport.as_ref(), &subject, &job).await?;
            logger.published(&subject);
            self.inner.store.mark_running(&job.id);

            self.inner
                .fanout
                .broadcast_to_video(
                    video_id,
                    JobEvent::started(job.id.clone(), job.stage, video_id.clone()),
                )
                .await;

            job_ids.push(job.id);
        }

        Ok(job_ids)
    }

    /// Record a worker success and fan out `job:completed`.
    ///
    /// Idempotent: a duplicate callback for the same job produces no second
    /// broadcast and no state change.
    pub async fn handle_result(
        &self,
        job_id: &JobId,
        result: serde_json::Value,
        video_id: &VideoId,
    ) -> JobsResult<()> {
        match self.inner.store.complete(job_id)? {
            CompleteOutcome::AlreadyTerminal => {
                debug!(job_id = %job_id, "Duplicate result callback suppressed");
                Ok(())
            }
            CompleteOutcome::Completed {
                stage,
                run_finished,
            } => {
                // A late success may race a scheduled retry; the completion
                // wins and the timer must not resurrect the job.
                self.abort_timer(job_id);

                JobLogger::new(job_id, stage).completed();
                self.inner
                    .fanout
                    .broadcast_to_video(
                        video_id,
                        JobEvent::completed(job_id.clone(), video_id.clone(), result),
                    )
                    .await;

                if run_finished {
                    info!(video_id = %video_id, "Pipeline run reached a terminal state");
                }
                Ok(())
            }
        }
    }

    /// Record a worker failure: schedule a backoff retry while budget
    /// remains, dead-letter once it is exhausted.
    ///
    /// Retries are invisible to subscribers; only the final, exhausted
    /// failure fans out `job:failed`. The retry republishes the same job id
    /// with an incremented attempt count.
    pub async fn handle_error(
        &self,
        job_id: &JobId,
        error: &str,
        video_id: &VideoId,
        reported_retries: u32,
        _reported_max_retries: u32,
    ) -> JobsResult<()> {
        match self.inner.store.on_error(job_id, reported_retries, error)? {
            ErrorDecision::AlreadyTerminal => {
                debug!(job_id = %job_id, "Duplicate error callback suppressed");
                Ok(())
            }
            ErrorDecision::Retry { job, attempt } => {
                let delay = self.inner.backoff.delay_for_attempt(attempt);
                JobLogger::new(&job.id, job.stage).retry_scheduled(
                    attempt,
                    job.max_retries,
                    delay,
                );

                let this = self.clone();
                let timer_id = job.id.clone();
                let handle = tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    this.timers().remove(&timer_id);
                    this.republish(timer_id).await;
                });
                // Replace any stale timer for this job.
                if let Some(old) = self.timers().insert(job_id.clone(), handle) {
                    old.abort();
                }
                Ok(())
            }
            ErrorDecision::Exhausted { job } => self.dead_letter(&job, error, video_id).await,
        }
    }

    async fn republish(&self, job_id: JobId) {
        // A completion may have raced the timer; only a still-retrying job
        // goes back out to the workers.
        let Some(job) = self.inner.store.claim_republish(&job_id) else {
            debug!(job_id = %job_id, "Retry republish skipped, job no longer retrying");
            return;
        };
        let subject = job.subject();

        match publish_json(self.inner.transport.as_ref(), &subject, &job).await {
            Ok(()) => {
                self.inner.store.mark_running(&job.id);
                debug!(job_id = %job.id, retries = job.retries, "Retry republished");
            }
            Err(e) => {
                // The job is now stuck in retrying; the next worker error or
                // an operator replay is the recovery path.
                error!(
                    job_id = %job.id,
                    subject = %subject,
                    "Retry republish failed: {}", e
                );
            }
        }
    }

    async fn dead_letter(&self, job: &Job, error: &str, video_id: &VideoId) -> JobsResult<()> {
        let job_id = &job.id;
        let record = DeadLetterRecord::new(job_id.clone(), error, video_id.clone());
        let publish_result = publish_json(
            self.inner.transport.as_ref(),
            &self.inner.config.dlq_subject,
            &record,
        )
        .await;

        self.inner.store.park_dead_letter(record);
        self.inner
            .fanout
            .broadcast_to_video(
                video_id,
                JobEvent::failed(job_id.clone(), video_id.clone(), error),
            )
            .await;

        match publish_result {
            Ok(()) => {
                JobLogger::new(job_id, job.stage).dead_lettered(error);
                Ok(())
            }
            Err(e) => {
                // An unwritten dead-letter record is an untracked lost job;
                // this must page somebody.
                error!(
                    job_id = %job_id,
                    video_id = %video_id,
                    "CRITICAL: dead-letter publish failed, job lost from the DLQ stream: {}", e
                );
                Err(e.into())
            }
        }
    }

    /// Abort a run: pending retry timers are cancelled so no job of a
    /// deleted video is ever resurrected, and the run's state is dropped.
    pub async fn cancel_run(&self, video_id: &VideoId) -> JobsResult<()> {
        let job_ids = self.inner.store.cancel_run(video_id)?;
        for id in &job_ids {
            self.abort_timer(id);
        }
        info!(video_id = %video_id, jobs = job_ids.len(), "Pipeline run cancelled");
        Ok(())
    }

    /// Stage-level snapshot of a run, for polling clients.
    pub fn pipeline_status(&self, video_id: &VideoId) -> Option<PipelineStatus> {
        self.inner.store.status(video_id)
    }

    /// Currently-parked dead letters, newest last.
    pub fn dead_letters(&self) -> Vec<DeadLetterRecord> {
        self.inner.store.dead_letters()
    }

    /// Operator-triggered replay of a dead-lettered job: retry count reset,
    /// same job id republished, `job:started` fanned out again.
    pub async fn replay_dead_letter(&self, job_id: &JobId) -> JobsResult<JobId> {
        let job = self.inner.store.prepare_replay(job_id)?;
        let video_id = job.video_id().clone();
        let subject = job.subject();

        publish_json(self.inner.transport.as_ref(), &subject, &job).await?;
        self.inner.store.mark_running(&job.id);
        JobLogger::new(&job.id, job.stage).published(&subject);

        self.inner
            .fanout
            .broadcast_to_video(
                &video_id,
                JobEvent::started(job.id.clone(), job.stage, video_id.clone()),
            )
            .await;

        warn!(job_id = %job.id, video_id = %video_id, "Dead-lettered job replayed");
        Ok(job.id)
    }

    /// Orchestrator configuration.
    pub fn config(&self) -> &JobsConfig {
        &self.inner.config
    }
}
