//! Registration of the recurring jobs for every tenant.

use serde_json::json;
use tracing::{info, warn};

use crate::error::{AppError, AppResult};
use crate::queue::{QueueName, QueueRegistry};
use crate::tenant::TenantConfigResolver;

/// A job fired by the broker on a cron schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecurringJob {
    pub name: &'static str,
    pub queue: QueueName,
    /// Cron pattern, evaluated in UTC
    pub pattern: &'static str,
}

pub const UPDATE_ALL_CASES_FORECAST: &str = "update-all-cases-forecast";
pub const SEND_DAILY_DIGEST: &str = "send-daily-digest";

pub const RECURRING_JOBS: [RecurringJob; 2] = [
    RecurringJob {
        name: UPDATE_ALL_CASES_FORECAST,
        queue: QueueName::ForecastUpdates,
        pattern: "0 3 * * *",
    },
    RecurringJob {
        name: SEND_DAILY_DIGEST,
        queue: QueueName::Notifications,
        pattern: "0 8 * * *",
    },
];

/// Tenants to schedule for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TenantSet {
    /// One implicit tenant, jobs carry no tenant id
    Single,
    Multi(Vec<String>),
}

impl TenantSet {
    pub fn from_resolver(resolver: &TenantConfigResolver) -> Self {
        Self::Multi(
            resolver
                .tenants()
                .into_iter()
                .map(|t| t.tenant_id)
                .collect(),
        )
    }

    fn members(&self) -> Vec<Option<&str>> {
        match self {
            Self::Single => vec![None],
            Self::Multi(ids) => ids.iter().map(|id| Some(id.as_str())).collect(),
        }
    }
}

/// `<jobName>-<tenantId>`, or just `<jobName>` without a tenant.
pub fn recurring_job_id(name: &str, tenant_id: Option<&str>) -> String {
    match tenant_id {
        Some(tenant_id) => format!("{}-{}", name, tenant_id),
        None => name.to_string(),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScheduleReport {
    pub removed: usize,
    pub registered: usize,
}

/// Replace the repeatable registrations of every recurring job.
///
/// Existing repeatables with the job's name are removed first, so running
/// this twice leaves exactly one registration per job and tenant, and stale
/// patterns or removed tenants disappear.
pub async fn schedule_recurring_jobs(
    registry: &QueueRegistry,
    tenants: &TenantSet,
) -> AppResult<ScheduleReport> {
    let members = tenants.members();
    if members.is_empty() {
        warn!("No tenants configured, recurring jobs will not be registered");
    }

    let mut report = ScheduleReport::default();

    for job in RECURRING_JOBS.iter() {
        let queue = registry
            .get(job.queue)
            .ok_or_else(|| AppError::QueueUnavailable(job.queue.as_str().to_string()))?;

        for existing in queue.repeatables().await? {
            if existing.name == job.name && queue.remove_repeatable(&existing.key).await? {
                report.removed += 1;
            }
        }

        for tenant_id in &members {
            let job_id = recurring_job_id(job.name, *tenant_id);
            let data = match tenant_id {
                Some(tenant_id) => json!({ "tenantId": tenant_id }),
                None => json!({}),
            };

            let repeatable = queue
                .upsert_repeatable(job.name, &job_id, job.pattern, data)
                .await?;
            report.registered += 1;

            info!(
                "Scheduled {} on {} ({}), next run {}",
                job_id, job.queue, job.pattern, repeatable.next_run
            );
        }
    }

    Ok(report)
}
