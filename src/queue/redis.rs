//! Redis/Valkey broker.
//!
//! # Key layout
//!
//! For a queue `q` under prefix `p`:
//!
//! - `p:q:jobs`: hash of job id to serialized job
//! - `p:q:wait`: list of waiting ids (LPUSH in, RPOPLPUSH out)
//! - `p:q:active`: list of ids being processed
//! - `p:q:delayed`: sorted set of ids scored by run time (ms)
//! - `p:q:completed`, `p:q:failed`: sorted sets scored by finish time (ms)
//! - `p:q:repeat`: hash of repeatable key to serialized template
//! - `p:q:lock:<id>`: owner token of an active job, expiring after the lock TTL
//!
//! Multi-key moves that must not be split by a crash run as Lua scripts.
//! A job id stays in `p:q:jobs` until retention trims it, which is what makes
//! deterministic job ids (and fired repeat instances) de-duplicate.

use std::collections::HashMap;
use std::time::Duration;

use ::redis::aio::ConnectionManager;
use ::redis::{AsyncCommands, Script};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult};

use super::broker::{Broker, JobCounts};
use super::{FinishedState, QueuedJob, RepeatableJob, Retention};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

// KEYS: jobs, target. ARGV: id, body, score (delayed only)
const ADD_JOB: &str = r#"
if redis.call('HSETNX', KEYS[1], ARGV[1], ARGV[2]) == 0 then
  return 0
end
if ARGV[3] then
  redis.call('ZADD', KEYS[2], ARGV[3], ARGV[1])
else
  redis.call('LPUSH', KEYS[2], ARGV[1])
end
return 1
"#;

// KEYS: wait, active, jobs. ARGV: lock key prefix, owner, ttl ms
const CLAIM_JOB: &str = r#"
local id = redis.call('RPOPLPUSH', KEYS[1], KEYS[2])
if not id then
  return false
end
local body = redis.call('HGET', KEYS[3], id)
if not body then
  redis.call('LREM', KEYS[2], 0, id)
  return {id}
end
redis.call('SET', ARGV[1] .. id, ARGV[2], 'PX', ARGV[3])
return {id, body}
"#;

// KEYS: lock. ARGV: owner, ttl ms
const EXTEND_LOCK: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('PEXPIRE', KEYS[1], ARGV[2])
end
return 0
"#;

// KEYS: active, lock, jobs, target. ARGV: id, body, score (failed only)
const RELEASE_STALLED: &str = r#"
if redis.call('EXISTS', KEYS[2]) == 1 then
  return 0
end
if redis.call('LREM', KEYS[1], 0, ARGV[1]) == 0 then
  return 0
end
redis.call('HSET', KEYS[3], ARGV[1], ARGV[2])
if ARGV[3] then
  redis.call('ZADD', KEYS[4], ARGV[3], ARGV[1])
else
  redis.call('RPUSH', KEYS[4], ARGV[1])
end
return 1
"#;

struct Scripts {
    add_job: Script,
    claim_job: Script,
    extend_lock: Script,
    release_stalled: Script,
}

impl Scripts {
    fn load() -> Self {
        Self {
            add_job: Script::new(ADD_JOB),
            claim_job: Script::new(CLAIM_JOB),
            extend_lock: Script::new(EXTEND_LOCK),
            release_stalled: Script::new(RELEASE_STALLED),
        }
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

/// Broker backed by one multiplexed Redis connection.
pub struct RedisBroker {
    /// Redis connection manager (handles reconnection automatically).
    redis: ConnectionManager,
    prefix: String,
    scripts: Scripts,
}

impl RedisBroker {
    /// Connect to Redis/Valkey.
    pub async fn connect(url: &str, prefix: &str) -> AppResult<Self> {
        let client = ::redis::Client::open(url)
            .map_err(|e| AppError::Queue(format!("Invalid broker URL: {}", e)))?;

        let redis = tokio::time::timeout(CONNECT_TIMEOUT, ConnectionManager::new(client))
            .await
            .map_err(|_| AppError::Queue("Timed out connecting to broker".to_string()))?
            .map_err(|e| AppError::Queue(format!("Failed to connect to broker: {}", e)))?;

        info!(prefix, "Connected to broker");

        Ok(Self::from_connection(redis, prefix))
    }

    /// Create a broker from an existing ConnectionManager.
    pub fn from_connection(redis: ConnectionManager, prefix: &str) -> Self {
        Self {
            redis,
            prefix: prefix.to_string(),
            scripts: Scripts::load(),
        }
    }

    fn key(&self, queue: &str, suffix: &str) -> String {
        format!("{}:{}:{}", self.prefix, queue, suffix)
    }

    fn lock_key(&self, queue: &str, id: &str) -> String {
        self.key(queue, &format!("lock:{}", id))
    }

    async fn load_job(&self, queue: &str, id: &str) -> AppResult<Option<QueuedJob>> {
        let mut conn = self.redis.clone();
        let raw: Option<String> = conn.hget(self.key(queue, "jobs"), id).await?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Drop finished ids older than the retention age or beyond its count.
    async fn trim_finished(&self, queue: &str, set: &str, retention: Retention) -> AppResult<usize> {
        let mut conn = self.redis.clone();
        let set_key = self.key(queue, set);

        let cutoff = Utc::now().timestamp_millis()
            - i64::try_from(retention.max_age.as_millis()).unwrap_or(i64::MAX);
        let mut expired: Vec<String> = conn.zrangebyscore(&set_key, "-inf", cutoff).await?;

        if let Some(max_count) = retention.max_count {
            let total: usize = conn.zcard(&set_key).await?;
            if total > max_count {
                let overflow: Vec<String> = conn
                    .zrange(&set_key, 0, (total - max_count - 1) as isize)
                    .await?;
                expired.extend(overflow);
            }
        }

        if expired.is_empty() {
            return Ok(0);
        }
        expired.sort();
        expired.dedup();

        let mut pipe = ::redis::pipe();
        pipe.atomic()
            .zrem(&set_key, &expired)
            .hdel(self.key(queue, "jobs"), &expired);
        pipe.query_async::<_, ()>(&mut conn).await?;

        debug!(queue, set, removed = expired.len(), "Trimmed finished jobs");
        Ok(expired.len())
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn enqueue(&self, queue: &str, job: &QueuedJob) -> AppResult<bool> {
        let serialized = serde_json::to_string(job)?;
        let mut conn = self.redis.clone();

        let created: i64 = self
            .scripts
            .add_job
            .key(self.key(queue, "jobs"))
            .key(self.key(queue, "wait"))
            .arg(&job.id)
            .arg(&serialized)
            .invoke_async(&mut conn)
            .await?;
        Ok(created == 1)
    }

    async fn schedule(
        &self,
        queue: &str,
        job: &QueuedJob,
        run_at: DateTime<Utc>,
    ) -> AppResult<bool> {
        let serialized = serde_json::to_string(job)?;
        let mut conn = self.redis.clone();

        let created: i64 = self
            .scripts
            .add_job
            .key(self.key(queue, "jobs"))
            .key(self.key(queue, "delayed"))
            .arg(&job.id)
            .arg(&serialized)
            .arg(run_at.timestamp_millis())
            .invoke_async(&mut conn)
            .await?;
        Ok(created == 1)
    }

    async fn claim_next(
        &self,
        queue: &str,
        owner: &str,
        lock_ttl: Duration,
    ) -> AppResult<Option<QueuedJob>> {
        let mut conn = self.redis.clone();

        // Non-blocking: the connection is shared by every worker task
        let claimed: Option<Vec<String>> = self
            .scripts
            .claim_job
            .key(self.key(queue, "wait"))
            .key(self.key(queue, "active"))
            .key(self.key(queue, "jobs"))
            .arg(self.key(queue, "lock:"))
            .arg(owner)
            .arg(ttl_millis(lock_ttl))
            .invoke_async(&mut conn)
            .await?;

        let (id, raw) = match claimed.as_deref() {
            None => return Ok(None),
            Some([id, raw]) => (id, raw),
            Some(rest) => {
                let id = rest.first().map(String::as_str).unwrap_or_default();
                warn!(queue, job_id = %id, "Claimed job has no stored body, dropped it");
                return Ok(None);
            }
        };

        let mut job: QueuedJob = serde_json::from_str(raw)?;
        job.processed_at = Some(Utc::now());
        let serialized = serde_json::to_string(&job)?;
        conn.hset::<_, _, _, ()>(self.key(queue, "jobs"), id, &serialized)
            .await?;

        Ok(Some(job))
    }

    async fn extend_lock(
        &self,
        queue: &str,
        job_id: &str,
        owner: &str,
        lock_ttl: Duration,
    ) -> AppResult<bool> {
        let mut conn = self.redis.clone();
        let extended: i64 = self
            .scripts
            .extend_lock
            .key(self.lock_key(queue, job_id))
            .arg(owner)
            .arg(ttl_millis(lock_ttl))
            .invoke_async(&mut conn)
            .await?;
        Ok(extended == 1)
    }

    async fn finish(
        &self,
        queue: &str,
        job: &QueuedJob,
        state: FinishedState,
        retention: Retention,
    ) -> AppResult<()> {
        let serialized = serde_json::to_string(job)?;
        let finished_at = job.finished_at.unwrap_or_else(Utc::now).timestamp_millis();
        let mut conn = self.redis.clone();

        let mut pipe = ::redis::pipe();
        pipe.atomic()
            .lrem(self.key(queue, "active"), 0, &job.id)
            .del(self.lock_key(queue, &job.id))
            .hset(self.key(queue, "jobs"), &job.id, &serialized)
            .zadd(self.key(queue, state.as_str()), &job.id, finished_at);
        pipe.query_async::<_, ()>(&mut conn).await?;

        self.trim_finished(queue, state.as_str(), retention).await?;
        Ok(())
    }

    async fn retry_later(
        &self,
        queue: &str,
        job: &QueuedJob,
        run_at: DateTime<Utc>,
    ) -> AppResult<()> {
        let serialized = serde_json::to_string(job)?;
        let mut conn = self.redis.clone();

        let mut pipe = ::redis::pipe();
        pipe.atomic()
            .lrem(self.key(queue, "active"), 0, &job.id)
            .del(self.lock_key(queue, &job.id))
            .hset(self.key(queue, "jobs"), &job.id, &serialized)
            .zadd(self.key(queue, "delayed"), &job.id, run_at.timestamp_millis());
        pipe.query_async::<_, ()>(&mut conn).await?;

        Ok(())
    }

    async fn promote_delayed(&self, queue: &str, now: DateTime<Utc>) -> AppResult<usize> {
        let mut conn = self.redis.clone();
        let delayed_key = self.key(queue, "delayed");

        let due: Vec<String> = conn
            .zrangebyscore(&delayed_key, "-inf", now.timestamp_millis())
            .await?;

        let mut promoted = 0;
        for id in due {
            // ZREM decides which process moves the job
            let removed: i64 = conn.zrem(&delayed_key, &id).await?;
            if removed > 0 {
                conn.lpush::<_, _, ()>(self.key(queue, "wait"), &id).await?;
                promoted += 1;
            }
        }

        Ok(promoted)
    }

    async fn stalled_jobs(&self, queue: &str) -> AppResult<Vec<QueuedJob>> {
        let mut conn = self.redis.clone();
        let ids: Vec<String> = conn.lrange(self.key(queue, "active"), 0, -1).await?;

        let mut jobs = Vec::new();
        for id in ids {
            let locked: bool = conn.exists(self.lock_key(queue, &id)).await?;
            if locked {
                continue;
            }
            match self.load_job(queue, &id).await? {
                Some(job) => jobs.push(job),
                None => {
                    warn!(queue, job_id = %id, "Active job has no stored body, dropping it");
                    conn.lrem::<_, _, ()>(self.key(queue, "active"), 0, &id)
                        .await?;
                }
            }
        }
        Ok(jobs)
    }

    async fn release_stalled(
        &self,
        queue: &str,
        job: &QueuedJob,
        failed: Option<Retention>,
    ) -> AppResult<bool> {
        let serialized = serde_json::to_string(job)?;
        let mut conn = self.redis.clone();

        let mut invocation = self.scripts.release_stalled.prepare_invoke();
        invocation
            .key(self.key(queue, "active"))
            .key(self.lock_key(queue, &job.id))
            .key(self.key(queue, "jobs"))
            .arg(&job.id)
            .arg(&serialized);
        match failed {
            Some(_) => {
                let finished_at = job.finished_at.unwrap_or_else(Utc::now).timestamp_millis();
                invocation
                    .key(self.key(queue, FinishedState::Failed.as_str()))
                    .arg(finished_at);
            }
            // Pushed on the consuming end so recovered jobs run first
            None => {
                invocation.key(self.key(queue, "wait"));
            }
        }
        let released: i64 = invocation.invoke_async(&mut conn).await?;

        if released == 1
            && let Some(retention) = failed
        {
            self.trim_finished(queue, FinishedState::Failed.as_str(), retention)
                .await?;
        }
        Ok(released == 1)
    }

    async fn repeatables(&self, queue: &str) -> AppResult<Vec<RepeatableJob>> {
        let mut conn = self.redis.clone();
        let raw: HashMap<String, String> = conn.hgetall(self.key(queue, "repeat")).await?;

        let mut jobs: Vec<RepeatableJob> = raw
            .into_iter()
            .filter_map(|(key, value)| match serde_json::from_str(&value) {
                Ok(job) => Some(job),
                Err(e) => {
                    warn!(queue, key = %key, error = %e, "Skipping malformed repeatable job");
                    None
                }
            })
            .collect();
        jobs.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(jobs)
    }

    async fn put_repeatable(&self, queue: &str, job: &RepeatableJob) -> AppResult<()> {
        let serialized = serde_json::to_string(job)?;
        let mut conn = self.redis.clone();
        conn.hset::<_, _, _, ()>(self.key(queue, "repeat"), &job.key, &serialized)
            .await?;
        Ok(())
    }

    async fn remove_repeatable(&self, queue: &str, key: &str) -> AppResult<bool> {
        let mut conn = self.redis.clone();
        let removed: i64 = conn.hdel(self.key(queue, "repeat"), key).await?;
        Ok(removed > 0)
    }

    async fn counts(&self, queue: &str) -> AppResult<JobCounts> {
        let mut conn = self.redis.clone();

        let mut pipe = ::redis::pipe();
        pipe.llen(self.key(queue, "wait"))
            .llen(self.key(queue, "active"))
            .zcard(self.key(queue, "delayed"))
            .zcard(self.key(queue, "completed"))
            .zcard(self.key(queue, "failed"));
        let (waiting, active, delayed, completed, failed): (usize, usize, usize, usize, usize) =
            pipe.query_async(&mut conn).await?;

        Ok(JobCounts {
            waiting,
            active,
            delayed,
            completed,
            failed,
        })
    }

    async fn close(&self) -> AppResult<()> {
        // The connection manager closes when the last clone is dropped
        info!(prefix = %self.prefix, "Broker connection released");
        Ok(())
    }
}
