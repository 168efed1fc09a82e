//! Forecast scenarios and group consistency.

use std::sync::Arc;

use serde_json::json;
use testplanit_workers::models::{CaseSource, ForecastPair};
use testplanit_workers::queue::{AddOptions, Queue, QueueName};
use testplanit_workers::services::{
    CaseForecastOptions, update_repository_case_forecast, update_test_run_forecast,
};
use testplanit_workers::test_support::{MemoryBroker, MemoryStore};
use testplanit_workers::workers::forecast::{UPDATE_SINGLE_CASE_FORECAST, update_all_cases_forecast};
use testplanit_workers::workers::{ForecastHandler, WorkerPool};
use tokio_util::sync::CancellationToken;

use super::test_helpers::*;

const FIFTEEN_AND_A_HALF: ForecastPair = ForecastPair {
    manual: Some(15),
    automated: Some(1.5),
};

/// Scenario A: a linked manual/JUnit pair shares one forecast.
#[tokio::test]
async fn test_linked_pair_shares_forecast() {
    let store = MemoryStore::new();
    seed_linked_pair(&store);

    let outcome = update_repository_case_forecast(&store, 1, CaseForecastOptions::default())
        .await
        .unwrap();

    assert_eq!(outcome.forecast, FIFTEEN_AND_A_HALF);
    assert_eq!(store.case_forecast(1), Some(FIFTEEN_AND_A_HALF));
    assert_eq!(store.case_forecast(2), Some(FIFTEEN_AND_A_HALF));
}

/// Scenario B: only untested cases count towards a run.
#[tokio::test]
async fn test_run_forecast_sums_untested_cases() {
    let store = MemoryStore::new();
    seed_linked_pair(&store);

    store.add_case(3, CaseSource::Manual);
    store.add_run(200);
    store.add_run_case(200, 1, None);
    let passed = store.add_run_case(200, 3, Some("passed"));
    store.add_manual_result(passed, Some(10));

    let forecast = update_test_run_forecast(&store, 200, None).await.unwrap();

    assert_eq!(forecast, FIFTEEN_AND_A_HALF);
    assert_eq!(store.run_forecast(200), Some(FIFTEEN_AND_A_HALF));
    assert_eq!(
        store.case_forecast(3),
        Some(ForecastPair::new(Some(10), None))
    );
}

/// Scenario C: a run with nothing left to execute has no forecast.
#[tokio::test]
async fn test_fully_executed_run_has_no_forecast() {
    let store = MemoryStore::new();
    seed_linked_pair(&store);

    store.add_run(200);
    let pending = store.add_run_case(200, 1, Some("untested"));
    update_test_run_forecast(&store, 200, None).await.unwrap();
    assert_eq!(store.run_forecast(200), Some(FIFTEEN_AND_A_HALF));

    store.set_run_case_status(pending, Some("passed"));
    let forecast = update_test_run_forecast(&store, 200, None).await.unwrap();

    assert_eq!(forecast, ForecastPair::default());
    assert_eq!(store.run_forecast(200), Some(ForecastPair::default()));
}

/// Scenario D: one failing case does not stop the nightly recompute.
#[tokio::test]
async fn test_bulk_job_completes_despite_failing_case() {
    let store = Arc::new(MemoryStore::new());
    seed_linked_pair(&store);
    store.add_case(5, CaseSource::Manual);
    store.add_case(6, CaseSource::Junit);
    store.add_junit_result(6, Some(3.25));
    store.fail_case_updates(5);

    store.add_run(300);
    store.add_run_case(300, 1, None);
    store.add_run_case(300, 6, None);

    let broker = Arc::new(MemoryBroker::new());
    let queue = Arc::new(Queue::new(QueueName::ForecastUpdates, broker.clone()));
    queue
        .add("update-all-cases-forecast", json!({}), AddOptions::default())
        .await
        .unwrap();

    let handler = Arc::new(ForecastHandler::new(single_tenant_clients(store.clone())));
    let shutdown = CancellationToken::new();
    let running = tokio::spawn(WorkerPool::new(queue.clone(), handler, fast_pool(1)).run(shutdown.clone()));

    wait_until(|| store.run_forecast(300).is_some_and(|f| f.manual.is_some())).await;
    shutdown.cancel();
    let stats = running.await.unwrap();

    assert_eq!(stats.completed, 1);
    assert_eq!(stats.retried + stats.failed, 0);
    assert_eq!(store.case_forecast(1), Some(FIFTEEN_AND_A_HALF));
    assert_eq!(store.case_forecast(2), Some(FIFTEEN_AND_A_HALF));
    assert_eq!(store.case_forecast(6).and_then(|f| f.automated), Some(3.25));
    assert_eq!(
        store.run_forecast(300),
        Some(ForecastPair::new(Some(15), Some(4.75)))
    );

    // The same recompute run directly reports exactly one failure
    let report = update_all_cases_forecast(store.as_ref()).await.unwrap();
    assert_eq!(report.cases.failed, 1);
    assert_eq!(report.cases.succeeded, 2);
}

/// Every member of a star-shaped group ends up with the same values.
#[tokio::test]
async fn test_group_members_carry_identical_forecasts() {
    let store = MemoryStore::new();
    store.add_case(1, CaseSource::Manual);
    store.add_case(2, CaseSource::Junit);
    store.add_case(3, CaseSource::Junit);
    store.add_case(4, CaseSource::Api);
    store.link(1, 2);
    store.link(3, 1);
    store.link(1, 4);
    store.add_junit_result(2, Some(2.0));
    store.add_junit_result(3, Some(3.0));
    // Not a JUnit case, so its imported results are not samples
    store.add_junit_result(4, Some(40.0));

    update_repository_case_forecast(&store, 1, CaseForecastOptions::default())
        .await
        .unwrap();

    let expected = ForecastPair::new(None, Some(2.5));
    for id in 1..=4 {
        assert_eq!(store.case_forecast(id), Some(expected), "case {}", id);
    }
}

/// Links are followed one hop from the updated case.
#[tokio::test]
async fn test_chain_is_expanded_one_hop() {
    let store = MemoryStore::new();
    for id in 1..=3 {
        store.add_case(id, CaseSource::Junit);
    }
    store.link(1, 2);
    store.link(2, 3);
    store.add_junit_result(1, Some(1.0));
    store.add_junit_result(3, Some(5.0));

    update_repository_case_forecast(&store, 1, CaseForecastOptions::default())
        .await
        .unwrap();

    assert_eq!(store.case_forecast(2).and_then(|f| f.automated), Some(1.0));
    assert_eq!(store.case_forecast(3).and_then(|f| f.automated), None);
}

/// A case change propagates into every run that still has work left.
#[tokio::test]
async fn test_single_case_job_propagates_to_runs() {
    let store = Arc::new(MemoryStore::new());
    seed_linked_pair(&store);
    store.add_run(400);
    store.add_run_case(400, 2, None);

    let broker = Arc::new(MemoryBroker::new());
    let queue = Arc::new(Queue::new(QueueName::ForecastUpdates, broker));
    queue
        .add(
            UPDATE_SINGLE_CASE_FORECAST,
            json!({ "repositoryCaseId": 1 }),
            AddOptions::with_job_id("case-1"),
        )
        .await
        .unwrap();

    let handler = Arc::new(ForecastHandler::new(single_tenant_clients(store.clone())));
    let shutdown = CancellationToken::new();
    let running = tokio::spawn(WorkerPool::new(queue, handler, fast_pool(2)).run(shutdown.clone()));

    wait_until(|| store.run_forecast(400) == Some(FIFTEEN_AND_A_HALF)).await;
    shutdown.cancel();
    assert_eq!(running.await.unwrap().completed, 1);
}
