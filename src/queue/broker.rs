//! Broker storage seam.
//!
//! A broker stores jobs per queue in five collections: waiting, active,
//! delayed (by run time), completed and failed (by finish time), plus the
//! queue's repeatable job templates. Queue semantics (retries, backoff,
//! repeat firing) live in `Queue`; implementations only move ids between
//! collections atomically enough that two workers never claim the same job.
//!
//! Every claimed job carries a lock owned by the claiming worker with a TTL.
//! The worker renews it while the job runs; an active job whose lock has
//! expired is stalled and may be taken back by any worker.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::AppResult;

use super::{FinishedState, QueuedJob, RepeatableJob, Retention};

/// Number of jobs per state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobCounts {
    pub waiting: usize,
    pub active: usize,
    pub delayed: usize,
    pub completed: usize,
    pub failed: usize,
}

#[async_trait]
pub trait Broker: Send + Sync {
    /// Store `job` and append it to waiting. Returns false (and stores nothing)
    /// when a job with the same id is already known.
    async fn enqueue(&self, queue: &str, job: &QueuedJob) -> AppResult<bool>;

    /// Store `job` as delayed until `run_at`. Same id rule as `enqueue`.
    async fn schedule(&self, queue: &str, job: &QueuedJob, run_at: DateTime<Utc>)
    -> AppResult<bool>;

    /// Move the oldest waiting job to active, locked by `owner` for `lock_ttl`.
    async fn claim_next(
        &self,
        queue: &str,
        owner: &str,
        lock_ttl: Duration,
    ) -> AppResult<Option<QueuedJob>>;

    /// Push the lock of an active job `lock_ttl` into the future. Returns false
    /// when `owner` no longer holds the lock.
    async fn extend_lock(
        &self,
        queue: &str,
        job_id: &str,
        owner: &str,
        lock_ttl: Duration,
    ) -> AppResult<bool>;

    /// Remove an active job (and its lock) and record it as completed or failed, then trim
    /// the finished collection to `retention`.
    async fn finish(
        &self,
        queue: &str,
        job: &QueuedJob,
        state: FinishedState,
        retention: Retention,
    ) -> AppResult<()>;

    /// Move an active job to delayed for a later retry, dropping its lock.
    async fn retry_later(&self, queue: &str, job: &QueuedJob, run_at: DateTime<Utc>)
    -> AppResult<()>;

    /// Active jobs whose lock has expired.
    async fn stalled_jobs(&self, queue: &str) -> AppResult<Vec<QueuedJob>>;

    /// Take a stalled job out of active: to the front of waiting, or into
    /// failed (trimmed to the given retention) when `failed` is set. Returns
    /// false, changing nothing, when the job is locked again or no longer
    /// active.
    async fn release_stalled(
        &self,
        queue: &str,
        job: &QueuedJob,
        failed: Option<Retention>,
    ) -> AppResult<bool>;

    /// Move delayed jobs whose run time has passed to waiting.
    async fn promote_delayed(&self, queue: &str, now: DateTime<Utc>) -> AppResult<usize>;

    async fn repeatables(&self, queue: &str) -> AppResult<Vec<RepeatableJob>>;

    /// Insert or replace the repeatable with the same key.
    async fn put_repeatable(&self, queue: &str, job: &RepeatableJob) -> AppResult<()>;

    async fn remove_repeatable(&self, queue: &str, key: &str) -> AppResult<bool>;

    async fn counts(&self, queue: &str) -> AppResult<JobCounts>;

    async fn close(&self) -> AppResult<()>;
}
