//! Queue consumers: the worker pool and the job handlers it dispatches to.

pub mod forecast;
pub mod notification;
pub mod pool;

use async_trait::async_trait;

use crate::error::AppResult;
use crate::queue::QueuedJob;

pub use forecast::{ForecastHandler, ForecastJob};
pub use notification::{NotificationHandler, NotificationJob};
pub use pool::{PoolStats, WorkerPool, WorkerPoolConfig};

/// Processes one claimed job. An error fails the job and triggers the
/// queue's retry policy.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    async fn handle(&self, job: &QueuedJob) -> AppResult<()>;
}
