//! Notification worker: notification creation, inbox processing and digests.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::info;

use crate::db::NotificationStore;
use crate::error::{AppError, AppResult};
use crate::models::{CreateNotificationPayload, TenantPayload, UserNotificationsPayload};
use crate::queue::{QueueRegistry, QueuedJob};
use crate::services::scheduling::SEND_DAILY_DIGEST;
use crate::services::{create_notification, process_user_notifications, send_daily_digest};
use crate::tenant::{ClientConnector, TenantClientManager, TenantScoped};

use super::{JobHandler, WorkerPoolConfig};

pub const CREATE_NOTIFICATION: &str = "create-notification";
pub const PROCESS_USER_NOTIFICATIONS: &str = "process-user-notifications";

/// Jobs accepted by the notification worker.
#[derive(Debug, Clone, PartialEq)]
pub enum NotificationJob {
    Create(CreateNotificationPayload),
    ProcessUser(UserNotificationsPayload),
    DailyDigest(TenantPayload),
}

impl NotificationJob {
    pub fn parse(job: &QueuedJob) -> AppResult<Self> {
        match job.name.as_str() {
            CREATE_NOTIFICATION => Ok(Self::Create(job.payload()?)),
            PROCESS_USER_NOTIFICATIONS => Ok(Self::ProcessUser(job.payload()?)),
            SEND_DAILY_DIGEST => Ok(Self::DailyDigest(job.payload()?)),
            other => Err(AppError::InvalidInput(format!("Unknown job type: {}", other))),
        }
    }
}

impl TenantScoped for NotificationJob {
    fn tenant_id(&self) -> Option<&str> {
        match self {
            Self::Create(payload) => payload.tenant_id(),
            Self::ProcessUser(payload) => payload.tenant_id(),
            Self::DailyDigest(payload) => payload.tenant_id(),
        }
    }
}

pub struct NotificationHandler<C: ClientConnector> {
    clients: Arc<TenantClientManager<C>>,
    queues: Arc<QueueRegistry>,
}

impl<C> NotificationHandler<C>
where
    C: ClientConnector + 'static,
    C::Client: NotificationStore,
{
    pub fn new(clients: Arc<TenantClientManager<C>>, queues: Arc<QueueRegistry>) -> Self {
        Self { clients, queues }
    }

    pub fn pool_config() -> WorkerPoolConfig {
        WorkerPoolConfig::new(5)
    }

    /// Run one job. `job_id` is the broker id, stable across retries.
    pub async fn run(&self, job_id: &str, job: NotificationJob) -> AppResult<()> {
        let store = self.clients.client_for(&job).await?;

        match &job {
            NotificationJob::Create(payload) => {
                let emails = self.queues.emails();
                create_notification(&store, emails.as_deref(), job_id, payload).await?;
            }
            NotificationJob::ProcessUser(payload) => {
                process_user_notifications(&store, payload).await?;
            }
            NotificationJob::DailyDigest(payload) => {
                let emails = self.queues.emails();
                let report =
                    send_daily_digest(&store, emails.as_deref(), payload.tenant_id(), Utc::now())
                        .await?;
                info!(
                    tenant = payload.tenant_id().unwrap_or("default"),
                    "Daily digest: {} users on daily mode, {} digests queued",
                    report.daily_users,
                    report.digests_queued
                );
            }
        }
        Ok(())
    }
}

#[async_trait]
impl<C> JobHandler for NotificationHandler<C>
where
    C: ClientConnector + 'static,
    C::Client: NotificationStore,
{
    async fn handle(&self, job: &QueuedJob) -> AppResult<()> {
        self.run(&job.id, NotificationJob::parse(job)?).await
    }
}
