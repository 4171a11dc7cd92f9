//! In-memory job and run state.
//!
//! The orchestrator exclusively owns retry-count mutation, and this store is
//! where that state lives, keyed by job id and by video id. State does not
//! survive a process restart; pending retries are lost on crash (accepted
//! risk, see DESIGN.md).

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use vidsum_models::{
    DeadLetterRecord, Job, JobId, JobState, PipelineStatus, Stage, StageStatus, VideoId,
};

use crate::error::{JobsError, JobsResult};

struct JobRecord {
    job: Job,
    state: JobState,
    error: Option<String>,
}

struct RunRecord {
    /// Job ids in pipeline order
    jobs: Vec<JobId>,
}

#[derive(Default)]
struct Inner {
    jobs: HashMap<JobId, JobRecord>,
    runs: HashMap<VideoId, RunRecord>,
    dead_letters: Vec<DeadLetterRecord>,
}

/// Outcome of recording a completion.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum CompleteOutcome {
    /// First completion; fan-out should happen exactly once
    Completed { stage: Stage, run_finished: bool },
    /// Duplicate callback for an already-terminal job
    AlreadyTerminal,
}

/// Outcome of recording a failure.
pub(crate) enum ErrorDecision {
    /// Budget remains: republish `job` after the backoff for `attempt`
    Retry { job: Job, attempt: u32 },
    /// Budget exhausted: dead-letter the job
    Exhausted { job: Job },
    /// Duplicate callback for an already-terminal job
    AlreadyTerminal,
}

#[derive(Default)]
pub(crate) struct RunStore {
    inner: Mutex<Inner>,
}

impl RunStore {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new run, rejecting a duplicate while one is in flight.
    ///
    /// A terminal run (every job completed or dead-lettered) is replaced;
    /// its job records are dropped, its dead-letter records kept for the
    /// operator drain path.
    pub(crate) fn begin_run(&self, video_id: &VideoId, jobs: &[Job]) -> JobsResult<()> {
        let mut inner = self.lock();

        if let Some(existing) = inner.runs.get(video_id) {
            let finished = existing.jobs.iter().all(|id| {
                inner
                    .jobs
                    .get(id)
                    .map(|r| r.state.is_terminal())
                    .unwrap_or(true)
            });
            if !finished {
                return Err(JobsError::DuplicateRun(video_id.clone()));
            }
            // Dead-lettered records outlive the run they belonged to, so
            // their parked DLQ entries stay replayable after a restart.
            let old: Vec<JobId> = existing.jobs.clone();
            for id in old {
                let parked = inner
                    .jobs
                    .get(&id)
                    .map(|r| r.state == JobState::DeadLettered)
                    .unwrap_or(false);
                if !parked {
                    inner.jobs.remove(&id);
                }
            }
        }

        inner.runs.insert(
            video_id.clone(),
            RunRecord {
                jobs: jobs.iter().map(|j| j.id.clone()).collect(),
            },
        );
        for job in jobs {
            inner.jobs.insert(
                job.id.clone(),
                JobRecord {
                    job: job.clone(),
                    state: JobState::Pending,
                    error: None,
                },
            );
        }
        Ok(())
    }

    /// Mark a job as published and awaiting a worker callback.
    ///
    /// Terminal states are one-way: a republish racing a completion must
    /// not drag the job back to running.
    pub(crate) fn mark_running(&self, job_id: &JobId) {
        if let Some(record) = self.lock().jobs.get_mut(job_id) {
            if !record.state.is_terminal() {
                record.state = JobState::Running;
            }
        }
    }

    /// The job a fired retry timer should republish, if the retry still
    /// stands. `None` once the job left the retrying state, so a completion
    /// that raced the timer wins.
    pub(crate) fn claim_republish(&self, job_id: &JobId) -> Option<Job> {
        let inner = self.lock();
        let record = inner.jobs.get(job_id)?;
        (record.state == JobState::Retrying).then(|| record.job.clone())
    }

    /// Record a successful completion. Idempotent against duplicate
    /// callbacks: only the first transition reports `Completed`.
    pub(crate) fn complete(&self, job_id: &JobId) -> JobsResult<CompleteOutcome> {
        let mut inner = self.lock();
        let record = inner
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| JobsError::UnknownJob(job_id.clone()))?;

        if record.state.is_terminal() {
            return Ok(CompleteOutcome::AlreadyTerminal);
        }
        record.state = JobState::Completed;
        record.error = None;

        let stage = record.job.stage;
        let video_id = record.job.video_id().clone();
        let run_finished = inner
            .runs
            .get(&video_id)
            .map(|run| {
                run.jobs.iter().all(|id| {
                    inner
                        .jobs
                        .get(id)
                        .map(|r| r.state.is_terminal())
                        .unwrap_or(true)
                })
            })
            .unwrap_or(false);

        Ok(CompleteOutcome::Completed {
            stage,
            run_finished,
        })
    }

    /// Record a failure and decide retry versus dead-letter.
    ///
    /// The stored attempt count is authoritative; the count reported by the
    /// worker only ever raises it, keeping retries monotonic and the job id
    /// stable across attempts.
    pub(crate) fn on_error(
        &self,
        job_id: &JobId,
        reported_retries: u32,
        error: &str,
    ) -> JobsResult<ErrorDecision> {
        let mut inner = self.lock();
        let record = inner
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| JobsError::UnknownJob(job_id.clone()))?;

        if record.state.is_terminal() {
            return Ok(ErrorDecision::AlreadyTerminal);
        }

        let attempt = record.job.retries.max(reported_retries);
        record.job.retries = attempt;
        record.error = Some(error.to_string());

        if attempt < record.job.max_retries {
            record.job = record.job.next_attempt();
            record.state = JobState::Retrying;
            Ok(ErrorDecision::Retry {
                job: record.job.clone(),
                attempt,
            })
        } else {
            record.state = JobState::DeadLettered;
            Ok(ErrorDecision::Exhausted {
                job: record.job.clone(),
            })
        }
    }

    /// Park a dead-letter record for the operator drain path.
    pub(crate) fn park_dead_letter(&self, record: DeadLetterRecord) {
        self.lock().dead_letters.push(record);
    }

    /// All currently-parked dead letters.
    pub(crate) fn dead_letters(&self) -> Vec<DeadLetterRecord> {
        self.lock().dead_letters.clone()
    }

    /// Reclaim a dead-lettered job for replay: retry count reset, state back
    /// to pending, the parked record removed. The job id is unchanged.
    pub(crate) fn prepare_replay(&self, job_id: &JobId) -> JobsResult<Job> {
        let mut inner = self.lock();
        let record = inner
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| JobsError::UnknownJob(job_id.clone()))?;

        if record.state != JobState::DeadLettered {
            return Err(JobsError::NotDeadLettered(job_id.clone()));
        }
        record.job.retries = 0;
        record.state = JobState::Pending;
        record.error = None;
        let job = record.job.clone();

        inner.dead_letters.retain(|d| &d.job_id != job_id);
        Ok(job)
    }

    /// Stage-level snapshot of a run.
    pub(crate) fn status(&self, video_id: &VideoId) -> Option<PipelineStatus> {
        let inner = self.lock();
        let run = inner.runs.get(video_id)?;

        let stages = run
            .jobs
            .iter()
            .filter_map(|id| inner.jobs.get(id))
            .map(|record| StageStatus {
                stage: record.job.stage,
                job_id: record.job.id.clone(),
                state: record.state,
                retries: record.job.retries,
                error: record.error.clone(),
            })
            .collect();

        Some(PipelineStatus::from_stages(video_id.clone(), stages))
    }

    /// Drop a run and its job records, returning the job ids so the caller
    /// can cancel their pending retry timers. Dead-lettered records are
    /// kept so their parked DLQ entries stay replayable.
    pub(crate) fn cancel_run(&self, video_id: &VideoId) -> JobsResult<Vec<JobId>> {
        let mut inner = self.lock();
        let run = inner
            .runs
            .remove(video_id)
            .ok_or_else(|| JobsError::UnknownRun(video_id.clone()))?;

        for id in &run.jobs {
            let parked = inner
                .jobs
                .get(id)
                .map(|r| r.state == JobState::DeadLettered)
                .unwrap_or(false);
            if !parked {
                inner.jobs.remove(id);
            }
        }
        Ok(run.jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vidsum_models::Stage;

    fn jobs_for(video: &VideoId) -> Vec<Job> {
        Stage::ALL
            .iter()
            .map(|s| Job::new(*s, video.clone(), "org1", "u1", 3))
            .collect()
    }

    #[test]
    fn duplicate_run_rejected_while_in_flight() {
        let store = RunStore::default();
        let video = VideoId::from_string("v1");
        store.begin_run(&video, &jobs_for(&video)).unwrap();

        let err = store.begin_run(&video, &jobs_for(&video)).unwrap_err();
        assert!(matches!(err, JobsError::DuplicateRun(_)));
    }

    #[test]
    fn terminal_run_can_be_restarted() {
        let store = RunStore::default();
        let video = VideoId::from_string("v1");
        let jobs = jobs_for(&video);
        store.begin_run(&video, &jobs).unwrap();
        for job in &jobs {
            store.complete(&job.id).unwrap();
        }

        assert!(store.begin_run(&video, &jobs_for(&video)).is_ok());
    }

    #[test]
    fn completion_is_idempotent() {
        let store = RunStore::default();
        let video = VideoId::from_string("v1");
        let jobs = jobs_for(&video);
        store.begin_run(&video, &jobs).unwrap();

        let first = store.complete(&jobs[0].id).unwrap();
        assert!(matches!(
            first,
            CompleteOutcome::Completed {
                run_finished: false,
                ..
            }
        ));
        let second = store.complete(&jobs[0].id).unwrap();
        assert_eq!(second, CompleteOutcome::AlreadyTerminal);
    }

    #[test]
    fn retries_are_monotonic_and_keep_the_job_id() {
        let store = RunStore::default();
        let video = VideoId::from_string("v1");
        let jobs = jobs_for(&video);
        store.begin_run(&video, &jobs).unwrap();
        let id = jobs[0].id.clone();

        // Worker under-reports its attempt count; the store's own count wins.
        let ErrorDecision::Retry { job, attempt } = store.on_error(&id, 0, "boom").unwrap() else {
            panic!("expected retry");
        };
        assert_eq!(attempt, 0);
        assert_eq!(job.retries, 1);
        assert_eq!(job.id, id);

        let ErrorDecision::Retry { job, attempt } = store.on_error(&id, 0, "boom").unwrap() else {
            panic!("expected retry");
        };
        assert_eq!(attempt, 1);
        assert_eq!(job.retries, 2);
        assert_eq!(job.id, id);
    }

    #[test]
    fn exhausted_budget_dead_letters_exactly_once() {
        let store = RunStore::default();
        let video = VideoId::from_string("v1");
        let jobs = jobs_for(&video);
        store.begin_run(&video, &jobs).unwrap();
        let id = jobs[0].id.clone();

        for _ in 0..3 {
            assert!(matches!(
                store.on_error(&id, 0, "boom").unwrap(),
                ErrorDecision::Retry { .. }
            ));
        }
        assert!(matches!(
            store.on_error(&id, 0, "boom").unwrap(),
            ErrorDecision::Exhausted { .. }
        ));
        assert!(matches!(
            store.on_error(&id, 0, "boom").unwrap(),
            ErrorDecision::AlreadyTerminal
        ));
    }

    #[test]
    fn replay_resets_the_retry_count() {
        let store = RunStore::default();
        let video = VideoId::from_string("v1");
        let jobs = jobs_for(&video);
        store.begin_run(&video, &jobs).unwrap();
        let id = jobs[0].id.clone();

        for _ in 0..4 {
            store.on_error(&id, 0, "boom").unwrap();
        }
        store.park_dead_letter(DeadLetterRecord::new(id.clone(), "boom", video.clone()));

        let job = store.prepare_replay(&id).unwrap();
        assert_eq!(job.retries, 0);
        assert_eq!(job.id, id);
        assert!(store.dead_letters().is_empty());
    }

    #[test]
    fn terminal_state_survives_a_late_mark_running() {
        let store = RunStore::default();
        let video = VideoId::from_string("v1");
        let jobs = jobs_for(&video);
        store.begin_run(&video, &jobs).unwrap();

        store.complete(&jobs[0].id).unwrap();
        store.mark_running(&jobs[0].id);

        let status = store.status(&video).unwrap();
        assert_eq!(status.stages[0].state, JobState::Completed);
    }

    #[test]
    fn republish_claim_stands_only_while_retrying() {
        let store = RunStore::default();
        let video = VideoId::from_string("v1");
        let jobs = jobs_for(&video);
        store.begin_run(&video, &jobs).unwrap();
        let id = jobs[0].id.clone();

        store.on_error(&id, 0, "boom").unwrap();
        assert!(store.claim_republish(&id).is_some());

        store.complete(&id).unwrap();
        assert!(store.claim_republish(&id).is_none());
    }

    #[test]
    fn dead_lettered_records_survive_run_replacement() {
        let store = RunStore::default();
        let video = VideoId::from_string("v1");
        let jobs = jobs_for(&video);
        store.begin_run(&video, &jobs).unwrap();
        let id = jobs[0].id.clone();

        // Exhaust the first stage, complete the rest so the run is terminal.
        for _ in 0..4 {
            store.on_error(&id, 0, "boom").unwrap();
        }
        store.park_dead_letter(DeadLetterRecord::new(id.clone(), "boom", video.clone()));
        for job in &jobs[1..] {
            store.complete(&job.id).unwrap();
        }

        store.begin_run(&video, &jobs_for(&video)).unwrap();

        let job = store.prepare_replay(&id).unwrap();
        assert_eq!(job.id, id);
        assert!(store.dead_letters().is_empty());
    }

    #[test]
    fn replay_requires_a_dead_lettered_job() {
        let store = RunStore::default();
        let video = VideoId::from_string("v1");
        let jobs = jobs_for(&video);
        store.begin_run(&video, &jobs).unwrap();

        let err = store.prepare_replay(&jobs[0].id).unwrap_err();
        assert!(matches!(err, JobsError::NotDeadLettered(_)));
    }
}
