//! Durable job queues over a Redis/Valkey broker.
//!
//! Three named queues share one broker connection. Each queue has a fixed
//! retry and retention policy:
//!
//! | Queue            | attempts | backoff      | keep completed     | keep failed |
//! |------------------|----------|--------------|--------------------|-------------|
//! | forecast-updates | 3        | exp, 5s base | 7 days / 1000 jobs | 14 days     |
//! | notifications    | 3        | exp, 5s base | 7 days / 1000 jobs | 14 days     |
//! | emails           | 5        | exp, 10s base| 30 days / 5000 jobs| 30 days     |

pub mod broker;
pub mod job;
pub mod redis;
pub mod registry;
pub mod repeat;

use std::time::Duration;

pub use broker::{Broker, JobCounts};
pub use job::{AddOptions, AddedJob, FailOutcome, FinishedState, QueuedJob};
pub use registry::{PromoteReport, Queue, QueueRegistry};
pub use repeat::{CronPattern, RepeatableJob};

const DAY: u64 = 24 * 60 * 60;

/// The queues known to the workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueName {
    ForecastUpdates,
    Notifications,
    Emails,
}

impl QueueName {
    pub const ALL: [QueueName; 3] = [Self::ForecastUpdates, Self::Notifications, Self::Emails];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ForecastUpdates => "forecast-updates",
            Self::Notifications => "notifications",
            Self::Emails => "emails",
        }
    }

    pub fn policy(&self) -> QueuePolicy {
        match self {
            Self::ForecastUpdates | Self::Notifications => QueuePolicy {
                attempts: 3,
                backoff: Backoff::exponential(Duration::from_secs(5)),
                keep_completed: Retention::new(Duration::from_secs(7 * DAY), Some(1000)),
                keep_failed: Retention::new(Duration::from_secs(14 * DAY), None),
            },
            Self::Emails => QueuePolicy {
                attempts: 5,
                backoff: Backoff::exponential(Duration::from_secs(10)),
                keep_completed: Retention::new(Duration::from_secs(30 * DAY), Some(5000)),
                keep_failed: Retention::new(Duration::from_secs(30 * DAY), None),
            },
        }
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Retry and retention policy applied to every job of a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueuePolicy {
    /// Total attempts, including the first one
    pub attempts: u32,
    pub backoff: Backoff,
    pub keep_completed: Retention,
    pub keep_failed: Retention,
}

/// Exponential backoff: the delay after the n-th failed attempt is `base * 2^(n-1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
}

impl Backoff {
    pub fn exponential(base: Duration) -> Self {
        Self { base }
    }

    /// Delay before retrying after `attempts_made` failed attempts (1-based).
    pub fn delay(&self, attempts_made: u32) -> Duration {
        let exponent = attempts_made.saturating_sub(1).min(20);
        self.base.saturating_mul(1u32 << exponent)
    }
}

/// How long finished jobs are kept, by age and optionally by count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retention {
    pub max_age: Duration,
    pub max_count: Option<usize>,
}

impl Retention {
    pub fn new(max_age: Duration, max_count: Option<usize>) -> Self {
        Self { max_age, max_count }
    }
}
