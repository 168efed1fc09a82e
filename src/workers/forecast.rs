//! Forecast worker: single-case recomputes and the nightly bulk recompute.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info};

use crate::db::ForecastStore;
use crate::error::{AppError, AppResult};
use crate::models::{CaseForecastPayload, TenantPayload};
use crate::queue::QueuedJob;
use crate::services::scheduling::UPDATE_ALL_CASES_FORECAST;
use crate::services::{
    BatchTally, CaseForecastOptions, get_unique_case_group_ids, update_repository_case_forecast,
    update_test_run_forecast,
};
use crate::tenant::{ClientConnector, TenantClientManager, TenantScoped};

use super::{JobHandler, WorkerPoolConfig};

pub const UPDATE_SINGLE_CASE_FORECAST: &str = "update-single-case-forecast";

/// Jobs accepted by the forecast worker.
#[derive(Debug, Clone, PartialEq)]
pub enum ForecastJob {
    UpdateSingleCase(CaseForecastPayload),
    UpdateAllCases(TenantPayload),
}

impl ForecastJob {
    pub fn parse(job: &QueuedJob) -> AppResult<Self> {
        match job.name.as_str() {
            UPDATE_SINGLE_CASE_FORECAST => Ok(Self::UpdateSingleCase(job.payload()?)),
            UPDATE_ALL_CASES_FORECAST => Ok(Self::UpdateAllCases(job.payload()?)),
            other => Err(AppError::InvalidInput(format!("Unknown job type: {}", other))),
        }
    }
}

impl TenantScoped for ForecastJob {
    fn tenant_id(&self) -> Option<&str> {
        match self {
            Self::UpdateSingleCase(payload) => payload.tenant_id(),
            Self::UpdateAllCases(payload) => payload.tenant_id(),
        }
    }
}

/// Result of a bulk recompute.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkForecastReport {
    pub cases: BatchTally,
    pub test_runs: BatchTally,
}

/// Recompute every link-group, then every active test run they touch.
///
/// Individual failures are logged and counted; they never abort the batch.
pub async fn update_all_cases_forecast<S>(store: &S) -> AppResult<BulkForecastReport>
where
    S: ForecastStore + ?Sized,
{
    let representatives = get_unique_case_group_ids(store).await?;
    info!("Recomputing forecasts for {} case groups", representatives.len());

    let mut report = BulkForecastReport::default();
    let mut refreshed: HashSet<i32> = HashSet::new();
    let mut affected: BTreeSet<i32> = BTreeSet::new();

    for case_id in representatives {
        let result =
            update_repository_case_forecast(store, case_id, CaseForecastOptions::collect_only())
                .await;
        report.cases.record(&result);

        match result {
            Ok(outcome) => {
                refreshed.extend(outcome.refreshed_case_ids);
                affected.extend(outcome.affected_test_run_ids);
            }
            Err(e) => error!(case_id, error = %e, "Failed to update case forecast"),
        }
    }

    info!(
        "Case forecasts: {} succeeded, {} failed",
        report.cases.succeeded, report.cases.failed
    );

    let affected: Vec<i32> = affected.into_iter().collect();
    let active_runs = store.active_test_run_ids(&affected).await?;
    debug!(
        affected = affected.len(),
        active = active_runs.len(),
        "Narrowed affected test runs"
    );

    for test_run_id in active_runs {
        let result = update_test_run_forecast(store, test_run_id, Some(&refreshed)).await;
        report.test_runs.record(&result);

        if let Err(e) = result {
            error!(test_run_id, error = %e, "Failed to update test run forecast");
        }
    }

    info!(
        "Test run forecasts: {} succeeded, {} failed",
        report.test_runs.succeeded, report.test_runs.failed
    );

    Ok(report)
}

pub struct ForecastHandler<C: ClientConnector> {
    clients: Arc<TenantClientManager<C>>,
}

impl<C> ForecastHandler<C>
where
    C: ClientConnector + 'static,
    C::Client: ForecastStore,
{
    pub fn new(clients: Arc<TenantClientManager<C>>) -> Self {
        Self { clients }
    }

    /// Five jobs at a time, at most 100 started per second.
    pub fn pool_config() -> WorkerPoolConfig {
        WorkerPoolConfig::new(5).with_rate_limit(100)
    }

    pub async fn run(&self, job: ForecastJob) -> AppResult<()> {
        match &job {
            ForecastJob::UpdateSingleCase(payload) => {
                let case_id = payload.case_id()?;
                let store = self.clients.client_for(&job).await?;
                let outcome =
                    update_repository_case_forecast(&store, case_id, CaseForecastOptions::default())
                        .await?;
                info!(
                    case_id,
                    group_size = outcome.refreshed_case_ids.len(),
                    tenant = job.tenant_id().unwrap_or("default"),
                    "Updated case forecast"
                );
            }
            ForecastJob::UpdateAllCases(_) => {
                let store = self.clients.client_for(&job).await?;
                update_all_cases_forecast(&store).await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl<C> JobHandler for ForecastHandler<C>
where
    C: ClientConnector + 'static,
    C::Client: ForecastStore,
{
    async fn handle(&self, job: &QueuedJob) -> AppResult<()> {
        self.run(ForecastJob::parse(job)?).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CaseSource, ForecastPair};
    use crate::tenant::{EnvSource, TenancyMode, TenantConfigResolver};
    use crate::test_support::{MemoryConnector, MemoryStore};
    use serde_json::json;
    use std::collections::HashMap;
    use tokio_test::assert_ok;

    fn job(name: &str, data: serde_json::Value) -> QueuedJob {
        QueuedJob::new(None, name, data, 3)
    }

    fn single_tenant(store: Arc<MemoryStore>) -> ForecastHandler<MemoryConnector> {
        let manager = TenantClientManager::new(
            MemoryConnector::new(store),
            TenancyMode::Single {
                database_url: "postgres://default".to_string(),
            },
        );
        ForecastHandler::new(Arc::new(manager))
    }

    #[test]
    fn test_parse_job_kinds() {
        let parsed = ForecastJob::parse(&job(
            UPDATE_SINGLE_CASE_FORECAST,
            json!({ "repositoryCaseId": 7, "tenantId": "acme" }),
        ))
        .unwrap();
        assert_eq!(
            parsed,
            ForecastJob::UpdateSingleCase(CaseForecastPayload::new(7, Some("acme".into())))
        );
        assert_eq!(parsed.tenant_id(), Some("acme"));

        let parsed = ForecastJob::parse(&job(UPDATE_ALL_CASES_FORECAST, json!({}))).unwrap();
        assert_eq!(parsed, ForecastJob::UpdateAllCases(TenantPayload::default()));
    }

    #[test]
    fn test_unknown_job_name_is_rejected() {
        let err = ForecastJob::parse(&job("rebuild-index", json!({}))).unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_single_case_job_requires_numeric_id() {
        let handler = single_tenant(Arc::new(MemoryStore::new()));

        let missing = handler
            .handle(&job(UPDATE_SINGLE_CASE_FORECAST, json!({})))
            .await;
        assert!(matches!(missing, Err(AppError::InvalidInput(_))));

        let text = handler
            .handle(&job(UPDATE_SINGLE_CASE_FORECAST, json!({ "repositoryCaseId": "abc" })))
            .await;
        assert!(matches!(text, Err(AppError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_single_case_job_updates_group_and_runs() {
        let store = Arc::new(MemoryStore::new());
        store.add_case(1, CaseSource::Manual);
        store.add_case(2, CaseSource::Junit);
        store.link(1, 2);
        store.add_run(10);
        let rc = store.add_run_case(10, 1, None);
        store.add_manual_result(rc, Some(120));
        store.add_junit_result(2, Some(4.0));

        let handler = single_tenant(store.clone());
        handler
            .handle(&job(UPDATE_SINGLE_CASE_FORECAST, json!({ "repositoryCaseId": 1 })))
            .await
            .unwrap();

        let expected = ForecastPair {
            manual: Some(120),
            automated: Some(4.0),
        };
        assert_eq!(store.case_forecast(1), Some(expected));
        assert_eq!(store.case_forecast(2), Some(expected));
        assert_eq!(store.run_forecast(10), Some(expected));
    }

    #[tokio::test]
    async fn test_single_case_failure_is_returned() {
        let store = Arc::new(MemoryStore::new());
        store.add_case(1, CaseSource::Manual);
        store.fail_case_updates(1);

        let handler = single_tenant(store);
        let result = handler
            .handle(&job(UPDATE_SINGLE_CASE_FORECAST, json!({ "repositoryCaseId": 1 })))
            .await;
        assert!(matches!(result, Err(AppError::Database(_))));
    }

    #[tokio::test]
    async fn test_bulk_job_counts_failures_and_succeeds() {
        let store = Arc::new(MemoryStore::new());
        for id in 1..=3 {
            store.add_case(id, CaseSource::Manual);
        }
        store.add_run(10);
        let rc = store.add_run_case(10, 1, None);
        store.add_manual_result(rc, Some(60));
        store.fail_case_updates(2);

        let report = update_all_cases_forecast(store.as_ref()).await.unwrap();
        assert_eq!(report.cases.succeeded, 2);
        assert_eq!(report.cases.failed, 1);
        assert_eq!(report.test_runs.succeeded, 1);
        assert_eq!(store.run_forecast(10).and_then(|f| f.manual), Some(60));

        let handler = single_tenant(store);
        assert_ok!(handler.handle(&job(UPDATE_ALL_CASES_FORECAST, json!({}))).await);
    }

    #[tokio::test]
    async fn test_bulk_job_skips_inactive_runs() {
        let store = Arc::new(MemoryStore::new());
        store.add_case(1, CaseSource::Manual);
        store.add_run(10);
        store.add_run(11);
        store.complete_run(11);
        let rc = store.add_run_case(10, 1, None);
        store.add_manual_result(rc, Some(30));
        store.add_run_case(11, 1, None);

        let report = update_all_cases_forecast(store.as_ref()).await.unwrap();
        assert_eq!(report.test_runs.total(), 1);
        assert_eq!(store.run_forecast(11).and_then(|f| f.manual), None);
    }

    #[tokio::test]
    async fn test_multi_tenant_jobs_use_tenant_store() {
        let default_store = Arc::new(MemoryStore::new());
        let acme = Arc::new(MemoryStore::new());
        acme.add_case(1, CaseSource::Junit);
        acme.add_junit_result(1, Some(2.5));

        let env = HashMap::from([(
            "TENANT_ACME_DATABASE_URL".to_string(),
            "postgres://acme".to_string(),
        )]);
        let resolver = TenantConfigResolver::with_sources("/nonexistent/tenants.json", EnvSource::Fixed(env));
        let manager = TenantClientManager::new(
            MemoryConnector::new(default_store.clone()).with_store("postgres://acme", acme.clone()),
            TenancyMode::Multi {
                resolver: Arc::new(resolver),
            },
        );
        let handler = ForecastHandler::new(Arc::new(manager));

        handler
            .handle(&job(
                UPDATE_SINGLE_CASE_FORECAST,
                json!({ "repositoryCaseId": 1, "tenantId": "acme" }),
            ))
            .await
            .unwrap();
        assert_eq!(acme.case_forecast(1).and_then(|f| f.automated), Some(2.5));

        let missing_tenant = handler
            .handle(&job(UPDATE_SINGLE_CASE_FORECAST, json!({ "repositoryCaseId": 1 })))
            .await;
        assert!(matches!(missing_tenant, Err(AppError::MissingTenantId)));
    }
}
