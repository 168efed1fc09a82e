//! Worker pool pulling jobs from one queue.
//!
//! The pool claims jobs while a concurrency permit is free, optionally
//! throttled by a rate limiter, and runs each job on its own task. Due delayed
//! and repeatable jobs are promoted on a fixed tick. While a job runs its
//! broker lock is renewed every half lock duration. Jobs whose lock expired
//! (their worker died) are recovered at startup and then on `stalled_interval`.
//!
//! On shutdown the pool stops claiming and waits up to `shutdown_timeout` for
//! in-flight jobs; anything still running is aborted and will be recovered as
//! stalled once its lock runs out.

use std::num::NonZeroU32;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use futures_util::FutureExt;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{MissedTickBehavior, interval, interval_at, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::AppError;
use crate::queue::{FailOutcome, Queue, QueuedJob};

use super::JobHandler;

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

const MIN_LOCK_RENEWAL: Duration = Duration::from_millis(10);

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Jobs processed at the same time.
    pub concurrency: usize,
    /// Maximum jobs started per second.
    pub rate_limit_per_second: Option<NonZeroU32>,
    /// How long to wait before polling an empty queue again.
    pub poll_interval: Duration,
    /// How often due delayed and repeatable jobs are promoted.
    pub promote_interval: Duration,
    /// How often active jobs with an expired lock are recovered.
    pub stalled_interval: Duration,
    /// Timeout for draining in-flight jobs on shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            rate_limit_per_second: None,
            poll_interval: Duration::from_millis(500),
            promote_interval: Duration::from_secs(1),
            stalled_interval: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl WorkerPoolConfig {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
            ..Default::default()
        }
    }

    pub fn with_rate_limit(mut self, per_second: u32) -> Self {
        self.rate_limit_per_second = NonZeroU32::new(per_second);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_promote_interval(mut self, interval: Duration) -> Self {
        self.promote_interval = interval;
        self
    }

    pub fn with_stalled_interval(mut self, interval: Duration) -> Self {
        self.stalled_interval = interval;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// Job outcomes counted by a pool run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub completed: u64,
    /// Failed attempts that were scheduled for retry
    pub retried: u64,
    /// Jobs that ran out of attempts
    pub failed: u64,
    /// In-flight jobs aborted at shutdown
    pub aborted: u64,
}

#[derive(Default)]
struct Counters {
    completed: AtomicU64,
    retried: AtomicU64,
    failed: AtomicU64,
}

pub struct WorkerPool<H: JobHandler> {
    queue: Arc<Queue>,
    handler: Arc<H>,
    config: WorkerPoolConfig,
    limiter: Option<Arc<DirectLimiter>>,
    counters: Arc<Counters>,
}

impl<H: JobHandler> WorkerPool<H> {
    pub fn new(queue: Arc<Queue>, handler: Arc<H>, config: WorkerPoolConfig) -> Self {
        let limiter = config
            .rate_limit_per_second
            .map(|rate| Arc::new(RateLimiter::direct(Quota::per_second(rate))));

        Self {
            queue,
            handler,
            config,
            limiter,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Process jobs until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) -> PoolStats {
        let queue_name = self.queue.name();
        info!(
            "Worker pool started on {} (concurrency: {}, rate limit: {:?}/s)",
            queue_name, self.config.concurrency, self.config.rate_limit_per_second
        );

        self.recover_stalled().await;

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let mut tasks = JoinSet::new();
        let mut promote_ticker = interval(self.config.promote_interval);
        promote_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut stalled_ticker = interval_at(
            tokio::time::Instant::now() + self.config.stalled_interval,
            self.config.stalled_interval,
        );
        stalled_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            while let Some(result) = tasks.try_join_next() {
                if let Err(e) = result {
                    error!(queue = %queue_name, error = %e, "Job task ended abnormally");
                }
            }

            let permit = tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = promote_ticker.tick() => {
                    self.promote_due().await;
                    continue;
                }
                _ = stalled_ticker.tick() => {
                    self.recover_stalled().await;
                    continue;
                }
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            if let Some(limiter) = self.limiter.as_ref() {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = limiter.until_ready() => {}
                }
            }

            match self.queue.next_job().await {
                Ok(Some(job)) => {
                    let queue = self.queue.clone();
                    let handler = self.handler.clone();
                    let counters = self.counters.clone();
                    tasks.spawn(async move {
                        process_job(&queue, handler.as_ref(), job, &counters).await;
                        drop(permit);
                    });
                }
                Ok(None) => {
                    drop(permit);
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = sleep(self.config.poll_interval) => {}
                    }
                }
                Err(e) => {
                    drop(permit);
                    error!(queue = %queue_name, error = %e, "Failed to claim next job");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = sleep(self.config.poll_interval) => {}
                    }
                }
            }
        }

        let in_flight = tasks.len();
        if in_flight > 0 {
            info!(queue = %queue_name, in_flight, "Waiting for in-flight jobs");
        }

        let drained = tokio::time::timeout(self.config.shutdown_timeout, async {
            while let Some(result) = tasks.join_next().await {
                if let Err(e) = result {
                    error!(queue = %queue_name, error = %e, "Job task ended abnormally");
                }
            }
        })
        .await;

        let mut aborted = 0;
        if drained.is_err() {
            aborted = tasks.len() as u64;
            warn!(
                queue = %queue_name,
                aborted,
                "Shutdown timed out after {:?}, aborting remaining jobs",
                self.config.shutdown_timeout
            );
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
        }

        let stats = PoolStats {
            completed: self.counters.completed.load(Ordering::Relaxed),
            retried: self.counters.retried.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            aborted,
        };

        info!(
            "Worker pool on {} stopped: {} completed, {} retried, {} failed, {} aborted",
            queue_name, stats.completed, stats.retried, stats.failed, stats.aborted
        );

        stats
    }

    async fn recover_stalled(&self) {
        if let Err(e) = self.queue.recover_stalled().await {
            error!(queue = %self.queue.name(), error = %e, "Stalled job recovery failed");
        }
    }

    async fn promote_due(&self) {
        match self.queue.promote_due(Utc::now()).await {
            Ok(report) if report.repeats_fired > 0 || report.delayed_promoted > 0 => {
                debug!(
                    queue = %self.queue.name(),
                    repeats_fired = report.repeats_fired,
                    delayed_promoted = report.delayed_promoted,
                    "Promoted due jobs"
                );
            }
            Ok(_) => {}
            Err(e) => error!(queue = %self.queue.name(), error = %e, "Failed to promote due jobs"),
        }
    }
}

async fn process_job<H: JobHandler>(queue: &Queue, handler: &H, job: QueuedJob, counters: &Counters) {
    let started = Instant::now();
    let job_id = job.id.clone();
    let job_name = job.name.clone();

    debug!(job_id = %job_id, job = %job_name, attempt = job.attempts_made + 1, "Processing job");

    let outcome = {
        let handled = AssertUnwindSafe(handler.handle(&job)).catch_unwind();
        tokio::pin!(handled);

        let renew_every = (queue.lock_duration() / 2).max(MIN_LOCK_RENEWAL);
        let mut renew = interval_at(tokio::time::Instant::now() + renew_every, renew_every);
        loop {
            tokio::select! {
                outcome = &mut handled => break outcome,
                _ = renew.tick() => match queue.extend_lock(&job_id).await {
                    Ok(true) => {}
                    Ok(false) => warn!(job_id = %job_id, job = %job_name, "Lost the lock on a running job"),
                    Err(e) => warn!(job_id = %job_id, error = %e, "Failed to renew job lock"),
                },
            }
        }
    };
    let result = outcome
        .unwrap_or_else(|_| Err(AppError::Queue(format!("Handler for {} panicked", job_name))));

    match result {
        Ok(()) => match queue.complete(job).await {
            Ok(()) => {
                counters.completed.fetch_add(1, Ordering::Relaxed);
                info!(
                    job_id = %job_id,
                    job = %job_name,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Job completed"
                );
            }
            Err(e) => error!(job_id = %job_id, error = %e, "Failed to mark job completed"),
        },
        Err(job_error) => match queue.fail(job, &job_error.to_string()).await {
            Ok(FailOutcome::Retrying { attempt, delay }) => {
                counters.retried.fetch_add(1, Ordering::Relaxed);
                warn!(
                    job_id = %job_id,
                    job = %job_name,
                    attempt,
                    retry_in = ?delay,
                    error = %job_error,
                    "Job failed, will retry"
                );
            }
            Ok(FailOutcome::Failed) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                error!(
                    job_id = %job_id,
                    job = %job_name,
                    error = %job_error,
                    "Job failed permanently"
                );
            }
            Err(e) => error!(job_id = %job_id, error = %e, "Failed to record job failure"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppResult;
    use crate::queue::{AddOptions, QueueName};
    use crate::test_support::MemoryBroker;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use tokio::sync::Notify;

    #[derive(Default)]
    struct RecordingHandler {
        seen: Mutex<Vec<String>>,
        started: Notify,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl JobHandler for RecordingHandler {
        async fn handle(&self, job: &QueuedJob) -> AppResult<()> {
            self.started.notify_one();
            if let Some(delay) = self.delay {
                sleep(delay).await;
            }
            self.seen.lock().unwrap().push(job.name.clone());
            if job.name == "bad" {
                return Err(AppError::InvalidInput("bad job".into()));
            }
            if job.name == "panics" {
                panic!("handler panic");
            }
            Ok(())
        }
    }

    fn fast_config() -> WorkerPoolConfig {
        WorkerPoolConfig::new(2)
            .with_poll_interval(Duration::from_millis(10))
            .with_promote_interval(Duration::from_millis(20))
            .with_shutdown_timeout(Duration::from_secs(2))
    }

    async fn wait_for<F: Fn() -> bool>(condition: F) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_pool_completes_and_retries() {
        let broker = Arc::new(MemoryBroker::new());
        let queue = Arc::new(Queue::new(QueueName::ForecastUpdates, broker.clone()));
        for name in ["good", "bad", "good"] {
            queue.add(name, json!({}), AddOptions::default()).await.unwrap();
        }

        let handler = Arc::new(RecordingHandler::default());
        let shutdown = CancellationToken::new();
        let pool = WorkerPool::new(queue.clone(), handler.clone(), fast_config());
        let running = tokio::spawn(pool.run(shutdown.clone()));

        wait_for(|| handler.seen.lock().unwrap().len() >= 3).await;
        shutdown.cancel();
        let stats = running.await.unwrap();

        assert_eq!(stats.completed, 2);
        assert_eq!(stats.retried, 1);
        assert_eq!(stats.failed, 0);

        let counts = queue.counts().await.unwrap();
        assert_eq!(counts.completed, 2);
        assert_eq!(counts.delayed, 1);
    }

    #[tokio::test]
    async fn test_pool_drains_in_flight_jobs() {
        let broker = Arc::new(MemoryBroker::new());
        let queue = Arc::new(Queue::new(QueueName::Notifications, broker));
        queue.add("slow", json!({}), AddOptions::default()).await.unwrap();

        let handler = Arc::new(RecordingHandler {
            delay: Some(Duration::from_millis(100)),
            ..Default::default()
        });
        let shutdown = CancellationToken::new();
        let pool = WorkerPool::new(queue.clone(), handler.clone(), fast_config());
        let running = tokio::spawn(pool.run(shutdown.clone()));

        handler.started.notified().await;
        shutdown.cancel();
        let stats = running.await.unwrap();

        assert_eq!(stats.completed, 1);
        assert_eq!(stats.aborted, 0);
        assert_eq!(queue.counts().await.unwrap().active, 0);
    }

    #[tokio::test]
    async fn test_running_job_keeps_its_lock() {
        let broker = Arc::new(MemoryBroker::new());
        let queue = Arc::new(
            Queue::new(QueueName::ForecastUpdates, broker.clone())
                .with_lock_duration(Duration::from_millis(40)),
        );
        queue.add("slow", json!({}), AddOptions::default()).await.unwrap();

        let handler = Arc::new(RecordingHandler {
            delay: Some(Duration::from_millis(200)),
            ..Default::default()
        });
        let shutdown = CancellationToken::new();
        let pool = WorkerPool::new(queue.clone(), handler.clone(), fast_config());
        let running = tokio::spawn(pool.run(shutdown.clone()));

        handler.started.notified().await;
        // Well past the lock duration, but the pool keeps renewing it
        sleep(Duration::from_millis(120)).await;
        let other = Queue::new(QueueName::ForecastUpdates, broker);
        assert_eq!(other.recover_stalled().await.unwrap(), 0);

        wait_for(|| !handler.seen.lock().unwrap().is_empty()).await;
        sleep(Duration::from_millis(50)).await;
        shutdown.cancel();
        let stats = running.await.unwrap();

        assert_eq!(stats.completed, 1);
        assert_eq!(handler.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_pool_recovers_jobs_of_dead_workers() {
        let broker = Arc::new(MemoryBroker::new());
        let dead = Queue::new(QueueName::Notifications, broker.clone())
            .with_lock_duration(Duration::from_millis(30));
        dead.add("orphan", json!({}), AddOptions::default()).await.unwrap();
        dead.next_job().await.unwrap().unwrap();

        let queue = Arc::new(Queue::new(QueueName::Notifications, broker));
        let handler = Arc::new(RecordingHandler::default());
        let shutdown = CancellationToken::new();
        let config = fast_config().with_stalled_interval(Duration::from_millis(20));
        let pool = WorkerPool::new(queue.clone(), handler.clone(), config);
        let running = tokio::spawn(pool.run(shutdown.clone()));

        wait_for(|| !handler.seen.lock().unwrap().is_empty()).await;
        sleep(Duration::from_millis(50)).await;
        shutdown.cancel();
        let stats = running.await.unwrap();

        assert_eq!(stats.completed, 1);
        assert_eq!(*handler.seen.lock().unwrap(), vec!["orphan".to_string()]);
    }

    #[tokio::test]
    async fn test_handler_panic_fails_the_job() {
        let broker = Arc::new(MemoryBroker::new());
        let queue = Arc::new(Queue::new(QueueName::Emails, broker));
        queue.add("panics", json!({}), AddOptions::default()).await.unwrap();

        let handler = Arc::new(RecordingHandler::default());
        let shutdown = CancellationToken::new();
        let pool = WorkerPool::new(queue.clone(), handler.clone(), fast_config());
        let running = tokio::spawn(pool.run(shutdown.clone()));

        wait_for(|| !handler.seen.lock().unwrap().is_empty()).await;
        // Give the task a moment to record the failure
        sleep(Duration::from_millis(50)).await;
        shutdown.cancel();
        let stats = running.await.unwrap();

        assert_eq!(stats.retried, 1);
        assert_eq!(queue.counts().await.unwrap().delayed, 1);
    }
}
