//! Queue handles and the lazily populated registry.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::BrokerSettings;
use crate::error::{AppError, AppResult};

use super::broker::{Broker, JobCounts};
use super::redis::RedisBroker;
use super::{
    AddOptions, AddedJob, CronPattern, FailOutcome, FinishedState, QueueName, QueuePolicy,
    QueuedJob, RepeatableJob,
};

/// Reason recorded for jobs whose worker disappeared too often.
const STALLED_REASON: &str = "job stalled more than allowable limit";

const DEFAULT_LOCK_DURATION: Duration = Duration::from_secs(30);

/// What `Queue::promote_due` moved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PromoteReport {
    pub repeats_fired: usize,
    pub delayed_promoted: usize,
}

/// A named queue with its retry and retention policy.
///
/// Each handle has its own lock owner token, so two processes sharing a
/// broker never mistake each other's claimed jobs for their own.
pub struct Queue {
    name: QueueName,
    policy: QueuePolicy,
    broker: Arc<dyn Broker>,
    owner: String,
    lock_duration: Duration,
}

impl Queue {
    pub fn new(name: QueueName, broker: Arc<dyn Broker>) -> Self {
        Self {
            name,
            policy: name.policy(),
            broker,
            owner: Uuid::new_v4().to_string(),
            lock_duration: DEFAULT_LOCK_DURATION,
        }
    }

    /// How long a claimed job stays locked without renewal.
    pub fn with_lock_duration(mut self, lock_duration: Duration) -> Self {
        self.lock_duration = lock_duration;
        self
    }

    pub fn lock_duration(&self) -> Duration {
        self.lock_duration
    }

    pub fn name(&self) -> QueueName {
        self.name
    }

    pub fn policy(&self) -> &QueuePolicy {
        &self.policy
    }

    /// Enqueue a job.
    pub async fn add(&self, name: &str, data: JsonValue, opts: AddOptions) -> AppResult<AddedJob> {
        let job = QueuedJob::new(opts.job_id, name, data, self.policy.attempts);
        let id = job.id.clone();

        let created = match opts.delay {
            Some(delay) => {
                let run_at = Utc::now()
                    + chrono::Duration::from_std(delay)
                        .map_err(|e| AppError::InvalidInput(format!("Invalid delay: {}", e)))?;
                self.broker.schedule(self.name.as_str(), &job, run_at).await?
            }
            None => self.broker.enqueue(self.name.as_str(), &job).await?,
        };

        if created {
            debug!(queue = %self.name, job = name, job_id = %id, "Job added");
        } else {
            debug!(queue = %self.name, job = name, job_id = %id, "Job id already known, not added");
        }

        Ok(AddedJob {
            id,
            duplicate: !created,
        })
    }

    /// Claim the next waiting job, if any, locking it to this handle.
    pub async fn next_job(&self) -> AppResult<Option<QueuedJob>> {
        self.broker
            .claim_next(self.name.as_str(), &self.owner, self.lock_duration)
            .await
    }

    /// Renew the lock on a job this handle claimed. False once the lock was
    /// lost, after which the job may be recovered by another worker.
    pub async fn extend_lock(&self, job_id: &str) -> AppResult<bool> {
        self.broker
            .extend_lock(self.name.as_str(), job_id, &self.owner, self.lock_duration)
            .await
    }

    pub async fn complete(&self, mut job: QueuedJob) -> AppResult<()> {
        job.finished_at = Some(Utc::now());
        job.failed_reason = None;
        self.broker
            .finish(
                self.name.as_str(),
                &job,
                FinishedState::Completed,
                self.policy.keep_completed,
            )
            .await
    }

    /// Record a failed attempt, retrying with backoff until attempts run out.
    pub async fn fail(&self, mut job: QueuedJob, reason: &str) -> AppResult<FailOutcome> {
        job.attempts_made += 1;
        job.failed_reason = Some(reason.to_string());

        if job.attempts_exhausted() {
            job.finished_at = Some(Utc::now());
            self.broker
                .finish(
                    self.name.as_str(),
                    &job,
                    FinishedState::Failed,
                    self.policy.keep_failed,
                )
                .await?;
            return Ok(FailOutcome::Failed);
        }

        let delay = self.policy.backoff.delay(job.attempts_made);
        let run_at = Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default();
        self.broker
            .retry_later(self.name.as_str(), &job, run_at)
            .await?;

        Ok(FailOutcome::Retrying {
            attempt: job.attempts_made,
            delay,
        })
    }

    /// Fire due repeatables once per fire time, then release due delayed jobs.
    pub async fn promote_due(&self, now: DateTime<Utc>) -> AppResult<PromoteReport> {
        let mut report = PromoteReport::default();

        for mut repeatable in self.broker.repeatables(self.name.as_str()).await? {
            if !repeatable.is_due(&now) {
                continue;
            }

            let pattern = match CronPattern::parse(&repeatable.pattern) {
                Ok(pattern) => pattern,
                Err(e) => {
                    warn!(queue = %self.name, key = %repeatable.key, error = %e, "Skipping repeatable with invalid pattern");
                    continue;
                }
            };

            let instance = QueuedJob::new(
                Some(repeatable.instance_id()),
                &repeatable.name,
                repeatable.data.clone(),
                self.policy.attempts,
            );
            if self.broker.enqueue(self.name.as_str(), &instance).await? {
                info!(queue = %self.name, job = %repeatable.name, job_id = %instance.id, "Repeatable job fired");
                report.repeats_fired += 1;
            }

            match pattern.next_after(&now) {
                Some(next_run) => {
                    repeatable.next_run = next_run;
                    self.broker
                        .put_repeatable(self.name.as_str(), &repeatable)
                        .await?;
                }
                None => {
                    self.broker
                        .remove_repeatable(self.name.as_str(), &repeatable.key)
                        .await?;
                }
            }
        }

        report.delayed_promoted = self.broker.promote_delayed(self.name.as_str(), now).await?;
        Ok(report)
    }

    /// Return active jobs whose lock expired (their worker died) to waiting,
    /// counting the lost attempt. Jobs out of attempts are recorded as failed.
    /// Jobs still locked by a live worker are left alone.
    pub async fn recover_stalled(&self) -> AppResult<usize> {
        let mut recovered = 0;

        for mut job in self.broker.stalled_jobs(self.name.as_str()).await? {
            job.attempts_made += 1;

            if job.attempts_exhausted() {
                job.failed_reason = Some(STALLED_REASON.to_string());
                job.finished_at = Some(Utc::now());
                let released = self
                    .broker
                    .release_stalled(self.name.as_str(), &job, Some(self.policy.keep_failed))
                    .await?;
                if released {
                    warn!(queue = %self.name, job_id = %job.id, "Stalled job out of attempts, marked failed");
                }
            } else if self
                .broker
                .release_stalled(self.name.as_str(), &job, None)
                .await?
            {
                recovered += 1;
            }
        }

        if recovered > 0 {
            info!(queue = %self.name, recovered, "Recovered stalled jobs");
        }
        Ok(recovered)
    }

    pub async fn repeatables(&self) -> AppResult<Vec<RepeatableJob>> {
        self.broker.repeatables(self.name.as_str()).await
    }

    /// Register (or replace) a repeatable job keyed by name, job id and pattern.
    pub async fn upsert_repeatable(
        &self,
        name: &str,
        job_id: &str,
        pattern: &str,
        data: JsonValue,
    ) -> AppResult<RepeatableJob> {
        let cron = CronPattern::parse(pattern)?;
        let next_run = cron.next_after(&Utc::now()).ok_or_else(|| {
            AppError::InvalidInput(format!("Cron pattern '{}' never fires", pattern))
        })?;

        let repeatable = RepeatableJob {
            key: RepeatableJob::key_for(name, job_id, cron.as_str()),
            name: name.to_string(),
            job_id: job_id.to_string(),
            pattern: cron.as_str().to_string(),
            data,
            next_run,
        };

        self.broker
            .put_repeatable(self.name.as_str(), &repeatable)
            .await?;
        Ok(repeatable)
    }

    pub async fn remove_repeatable(&self, key: &str) -> AppResult<bool> {
        self.broker
            .remove_repeatable(self.name.as_str(), key)
            .await
    }

    pub async fn counts(&self) -> AppResult<JobCounts> {
        self.broker.counts(self.name.as_str()).await
    }
}

/// Lazily created queues over one shared broker connection.
///
/// When no broker is available every accessor returns `None` and logs a
/// warning, so callers decide whether a missing queue is fatal.
pub struct QueueRegistry {
    broker: Option<Arc<dyn Broker>>,
    forecast_updates: OnceLock<Arc<Queue>>,
    notifications: OnceLock<Arc<Queue>>,
    emails: OnceLock<Arc<Queue>>,
}

impl QueueRegistry {
    pub fn new(broker: Option<Arc<dyn Broker>>) -> Self {
        Self {
            broker,
            forecast_updates: OnceLock::new(),
            notifications: OnceLock::new(),
            emails: OnceLock::new(),
        }
    }

    /// Connect to the configured broker. Connection problems leave the
    /// registry without a broker instead of failing.
    pub async fn connect(settings: &BrokerSettings) -> Self {
        if settings.skip_connection {
            warn!("SKIP_VALKEY_CONNECTION is set, queues are disabled");
            return Self::new(None);
        }

        let Some(url) = settings.url.as_deref() else {
            warn!("VALKEY_URL is not set, queues are disabled");
            return Self::new(None);
        };

        match RedisBroker::connect(url, &settings.prefix).await {
            Ok(broker) => Self::new(Some(Arc::new(broker))),
            Err(e) => {
                error!(error = %e, "Broker unavailable, queues are disabled");
                Self::new(None)
            }
        }
    }

    pub fn is_available(&self) -> bool {
        self.broker.is_some()
    }

    /// The named queue, created on first access.
    pub fn get(&self, name: QueueName) -> Option<Arc<Queue>> {
        let Some(broker) = self.broker.as_ref() else {
            warn!(queue = %name, "Broker unavailable, queue not accessible");
            return None;
        };

        let cell = match name {
            QueueName::ForecastUpdates => &self.forecast_updates,
            QueueName::Notifications => &self.notifications,
            QueueName::Emails => &self.emails,
        };

        let queue = cell.get_or_init(|| {
            info!(queue = %name, "Queue initialized");
            Arc::new(Queue::new(name, broker.clone()))
        });
        Some(queue.clone())
    }

    pub fn forecast_updates(&self) -> Option<Arc<Queue>> {
        self.get(QueueName::ForecastUpdates)
    }

    pub fn notifications(&self) -> Option<Arc<Queue>> {
        self.get(QueueName::Notifications)
    }

    pub fn emails(&self) -> Option<Arc<Queue>> {
        self.get(QueueName::Emails)
    }

    /// Release the broker connection.
    pub async fn close(&self) {
        if let Some(broker) = self.broker.as_ref()
            && let Err(e) = broker.close().await
        {
            warn!(error = %e, "Failed to close broker connection");
        }
    }
}
