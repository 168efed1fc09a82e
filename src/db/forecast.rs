//! Database queries for forecast computation.

use async_trait::async_trait;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, Condition, EntityTrait, QueryFilter, QueryOrder, QuerySelect};

use crate::entity::junit_test_result::{self as junit_result, Entity as JunitResult};
use crate::entity::repository_case::{self as case, Entity as RepositoryCase};
use crate::entity::repository_case_link::{self as case_link, Entity as CaseLink};
use crate::entity::test_run::{self as test_run, Entity as TestRun};
use crate::entity::test_run_case::{self as run_case, Entity as TestRunCase};
use crate::entity::test_run_result::{self as run_result, Entity as TestRunResult};
use crate::error::{AppError, AppResult};
use crate::models::{CaseLinkEdge, CaseRecord, ForecastPair, RunCaseForecast, SAME_TEST_DIFFERENT_SOURCE};

use super::DbPool;

/// Data access needed by the forecast service and bulk group discovery.
#[async_trait]
pub trait ForecastStore: Send + Sync {
    /// Non-deleted SAME_TEST_DIFFERENT_SOURCE links touching `case_id` in either direction.
    async fn find_direct_links(&self, case_id: i32) -> AppResult<Vec<CaseLinkEdge>>;

    /// Non-deleted SAME_TEST_DIFFERENT_SOURCE links touching any of `case_ids`.
    async fn links_for_cases(&self, case_ids: &[i32]) -> AppResult<Vec<CaseLinkEdge>>;

    /// Non-deleted cases among `case_ids`.
    async fn find_cases(&self, case_ids: &[i32]) -> AppResult<Vec<CaseRecord>>;

    /// Positive elapsed seconds from non-deleted manual results of the given cases.
    async fn manual_elapsed_samples(&self, case_ids: &[i32]) -> AppResult<Vec<i32>>;

    /// Positive durations from automated results of the given cases.
    async fn automated_time_samples(&self, case_ids: &[i32]) -> AppResult<Vec<f64>>;

    /// Write the same forecast pair to every listed case.
    async fn update_case_forecasts(&self, case_ids: &[i32], forecast: ForecastPair)
    -> AppResult<()>;

    /// Distinct test runs that reference any of the given cases.
    async fn test_run_ids_for_cases(&self, case_ids: &[i32]) -> AppResult<Vec<i32>>;

    /// Cases of a test run with their current repository case forecast.
    async fn test_run_cases(&self, test_run_id: i32) -> AppResult<Vec<RunCaseForecast>>;

    async fn update_test_run_forecast(&self, test_run_id: i32, forecast: ForecastPair)
    -> AppResult<()>;

    /// Runs among `test_run_ids` that are neither completed nor deleted.
    async fn active_test_run_ids(&self, test_run_ids: &[i32]) -> AppResult<Vec<i32>>;

    /// Keyset page of non-deleted, non-archived case ids ordered by id.
    async fn active_case_ids_after(&self, after_id: Option<i32>, limit: u64)
    -> AppResult<Vec<i32>>;
}

fn to_edge(model: case_link::Model) -> CaseLinkEdge {
    CaseLinkEdge {
        case_a_id: model.case_a_id,
        case_b_id: model.case_b_id,
    }
}

#[async_trait]
impl ForecastStore for DbPool {
    async fn find_direct_links(&self, case_id: i32) -> AppResult<Vec<CaseLinkEdge>> {
        self.links_for_cases(&[case_id]).await
    }

    async fn links_for_cases(&self, case_ids: &[i32]) -> AppResult<Vec<CaseLinkEdge>> {
        if case_ids.is_empty() {
            return Ok(Vec::new());
        }

        let links = CaseLink::find()
            .filter(case_link::Column::IsDeleted.eq(false))
            .filter(case_link::Column::LinkType.eq(SAME_TEST_DIFFERENT_SOURCE))
            .filter(
                Condition::any()
                    .add(case_link::Column::CaseAId.is_in(case_ids.iter().copied()))
                    .add(case_link::Column::CaseBId.is_in(case_ids.iter().copied())),
            )
            .all(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to load case links: {}", e)))?;

        Ok(links.into_iter().map(to_edge).collect())
    }

    async fn find_cases(&self, case_ids: &[i32]) -> AppResult<Vec<CaseRecord>> {
        if case_ids.is_empty() {
            return Ok(Vec::new());
        }

        let cases = RepositoryCase::find()
            .filter(case::Column::Id.is_in(case_ids.iter().copied()))
            .filter(case::Column::IsDeleted.eq(false))
            .order_by_asc(case::Column::Id)
            .all(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to load repository cases: {}", e)))?;

        Ok(cases
            .into_iter()
            .map(|c| CaseRecord {
                id: c.id,
                source: c.source,
                forecast: ForecastPair::new(c.forecast_manual, c.forecast_automated),
            })
            .collect())
    }

    async fn manual_elapsed_samples(&self, case_ids: &[i32]) -> AppResult<Vec<i32>> {
        if case_ids.is_empty() {
            return Ok(Vec::new());
        }

        let run_case_ids: Vec<i32> = TestRunCase::find()
            .select_only()
            .column(run_case::Column::Id)
            .filter(run_case::Column::RepositoryCaseId.is_in(case_ids.iter().copied()))
            .into_tuple()
            .all(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to load test run cases: {}", e)))?;

        if run_case_ids.is_empty() {
            return Ok(Vec::new());
        }

        let elapsed: Vec<Option<i32>> = TestRunResult::find()
            .select_only()
            .column(run_result::Column::Elapsed)
            .filter(run_result::Column::TestRunCaseId.is_in(run_case_ids))
            .filter(run_result::Column::IsDeleted.eq(false))
            .filter(run_result::Column::Elapsed.gt(0))
            .into_tuple()
            .all(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to load test run results: {}", e)))?;

        Ok(elapsed.into_iter().flatten().filter(|e| *e > 0).collect())
    }

    async fn automated_time_samples(&self, case_ids: &[i32]) -> AppResult<Vec<f64>> {
        if case_ids.is_empty() {
            return Ok(Vec::new());
        }

        let times: Vec<Option<f64>> = JunitResult::find()
            .select_only()
            .column(junit_result::Column::Time)
            .filter(junit_result::Column::RepositoryCaseId.is_in(case_ids.iter().copied()))
            .filter(junit_result::Column::Time.gt(0.0))
            .into_tuple()
            .all(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to load JUnit results: {}", e)))?;

        Ok(times.into_iter().flatten().filter(|t| *t > 0.0).collect())
    }

    async fn update_case_forecasts(
        &self,
        case_ids: &[i32],
        forecast: ForecastPair,
    ) -> AppResult<()> {
        if case_ids.is_empty() {
            return Ok(());
        }

        RepositoryCase::update_many()
            .col_expr(case::Column::ForecastManual, Expr::value(forecast.manual))
            .col_expr(case::Column::ForecastAutomated, Expr::value(forecast.automated))
            .filter(case::Column::Id.is_in(case_ids.iter().copied()))
            .exec(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to update case forecasts: {}", e)))?;

        Ok(())
    }

    async fn test_run_ids_for_cases(&self, case_ids: &[i32]) -> AppResult<Vec<i32>> {
        if case_ids.is_empty() {
            return Ok(Vec::new());
        }

        let run_ids: Vec<i32> = TestRunCase::find()
            .select_only()
            .column(run_case::Column::TestRunId)
            .distinct()
            .filter(run_case::Column::RepositoryCaseId.is_in(case_ids.iter().copied()))
            .order_by_asc(run_case::Column::TestRunId)
            .into_tuple()
            .all(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to load referencing test runs: {}", e)))?;

        Ok(run_ids)
    }

    async fn test_run_cases(&self, test_run_id: i32) -> AppResult<Vec<RunCaseForecast>> {
        let rows = TestRunCase::find()
            .filter(run_case::Column::TestRunId.eq(test_run_id))
            .find_also_related(RepositoryCase)
            .order_by_asc(run_case::Column::Id)
            .all(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to load test run cases: {}", e)))?;

        Ok(rows
            .into_iter()
            .map(|(run_case, repo_case)| RunCaseForecast {
                repository_case_id: run_case.repository_case_id,
                status: run_case.status,
                forecast: repo_case
                    .map(|c| ForecastPair::new(c.forecast_manual, c.forecast_automated))
                    .unwrap_or_default(),
            })
            .collect())
    }

    async fn update_test_run_forecast(
        &self,
        test_run_id: i32,
        forecast: ForecastPair,
    ) -> AppResult<()> {
        TestRun::update_many()
            .col_expr(test_run::Column::ForecastManual, Expr::value(forecast.manual))
            .col_expr(test_run::Column::ForecastAutomated, Expr::value(forecast.automated))
            .filter(test_run::Column::Id.eq(test_run_id))
            .exec(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to update test run forecast: {}", e)))?;

        Ok(())
    }

    async fn active_test_run_ids(&self, test_run_ids: &[i32]) -> AppResult<Vec<i32>> {
        if test_run_ids.is_empty() {
            return Ok(Vec::new());
        }

        let run_ids: Vec<i32> = TestRun::find()
            .select_only()
            .column(test_run::Column::Id)
            .filter(test_run::Column::Id.is_in(test_run_ids.iter().copied()))
            .filter(test_run::Column::IsCompleted.eq(false))
            .filter(test_run::Column::IsDeleted.eq(false))
            .order_by_asc(test_run::Column::Id)
            .into_tuple()
            .all(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to load active test runs: {}", e)))?;

        Ok(run_ids)
    }

    async fn active_case_ids_after(
        &self,
        after_id: Option<i32>,
        limit: u64,
    ) -> AppResult<Vec<i32>> {
        let mut query = RepositoryCase::find()
            .select_only()
            .column(case::Column::Id)
            .filter(case::Column::IsDeleted.eq(false))
            .filter(case::Column::IsArchived.eq(false));

        if let Some(after_id) = after_id {
            query = query.filter(case::Column::Id.gt(after_id));
        }

        let ids: Vec<i32> = query
            .order_by_asc(case::Column::Id)
            .limit(limit)
            .into_tuple()
            .all(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to page repository cases: {}", e)))?;

        Ok(ids)
    }
}

#[async_trait]
impl<T: ForecastStore + ?Sized> ForecastStore for std::sync::Arc<T> {
    async fn find_direct_links(&self, case_id: i32) -> AppResult<Vec<CaseLinkEdge>> {
        (**self).find_direct_links(case_id).await
    }

    async fn links_for_cases(&self, case_ids: &[i32]) -> AppResult<Vec<CaseLinkEdge>> {
        (**self).links_for_cases(case_ids).await
    }

    async fn find_cases(&self, case_ids: &[i32]) -> AppResult<Vec<CaseRecord>> {
        (**self).find_cases(case_ids).await
    }

    async fn manual_elapsed_samples(&self, case_ids: &[i32]) -> AppResult<Vec<i32>> {
        (**self).manual_elapsed_samples(case_ids).await
    }

    async fn automated_time_samples(&self, case_ids: &[i32]) -> AppResult<Vec<f64>> {
        (**self).automated_time_samples(case_ids).await
    }

    async fn update_case_forecasts(
        &self,
        case_ids: &[i32],
        forecast: ForecastPair,
    ) -> AppResult<()> {
        (**self).update_case_forecasts(case_ids, forecast).await
    }

    async fn test_run_ids_for_cases(&self, case_ids: &[i32]) -> AppResult<Vec<i32>> {
        (**self).test_run_ids_for_cases(case_ids).await
    }

    async fn test_run_cases(&self, test_run_id: i32) -> AppResult<Vec<RunCaseForecast>> {
        (**self).test_run_cases(test_run_id).await
    }

    async fn update_test_run_forecast(
        &self,
        test_run_id: i32,
        forecast: ForecastPair,
    ) -> AppResult<()> {
        (**self).update_test_run_forecast(test_run_id, forecast).await
    }

    async fn active_test_run_ids(&self, test_run_ids: &[i32]) -> AppResult<Vec<i32>> {
        (**self).active_test_run_ids(test_run_ids).await
    }

    async fn active_case_ids_after(
        &self,
        after_id: Option<i32>,
        limit: u64,
    ) -> AppResult<Vec<i32>> {
        (**self).active_case_ids_after(after_id, limit).await
    }
}
