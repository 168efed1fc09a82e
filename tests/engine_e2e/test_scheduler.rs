//! Recurring job registration and firing.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::json;
use testplanit_workers::queue::QueueName;
use testplanit_workers::services::{TenantSet, schedule_recurring_jobs};
use testplanit_workers::test_support::MemoryBroker;
use tokio_test::assert_err;

use super::test_helpers::*;

fn tenants(ids: &[&str]) -> TenantSet {
    TenantSet::Multi(ids.iter().map(|id| id.to_string()).collect())
}

/// Running the scheduler twice leaves one registration per job and tenant.
#[tokio::test]
async fn test_scheduler_is_idempotent() {
    let broker = Arc::new(MemoryBroker::new());
    let registry = registry_with(broker);
    let tenant_set = tenants(&["acme", "globex"]);

    let first = schedule_recurring_jobs(&registry, &tenant_set).await.unwrap();
    let second = schedule_recurring_jobs(&registry, &tenant_set).await.unwrap();

    assert_eq!(first.registered, 4);
    assert_eq!(second.registered, 4);
    assert_eq!(second.removed, 4);

    let forecast = registry.forecast_updates().unwrap().repeatables().await.unwrap();
    let mut ids: Vec<_> = forecast.iter().map(|r| r.job_id.clone()).collect();
    ids.sort();
    assert_eq!(
        ids,
        vec!["update-all-cases-forecast-acme", "update-all-cases-forecast-globex"]
    );

    let digests = registry.notifications().unwrap().repeatables().await.unwrap();
    assert_eq!(digests.len(), 2);
    assert!(digests.iter().all(|r| r.pattern == "0 8 * * *"));
}

/// A registration with an outdated pattern or tenant is replaced.
#[tokio::test]
async fn test_scheduler_removes_stale_registrations() {
    let broker = Arc::new(MemoryBroker::new());
    let registry = registry_with(broker);
    let queue = registry.forecast_updates().unwrap();

    queue
        .upsert_repeatable(
            "update-all-cases-forecast",
            "update-all-cases-forecast-acme",
            "0 4 * * *",
            json!({ "tenantId": "acme" }),
        )
        .await
        .unwrap();
    queue
        .upsert_repeatable(
            "update-all-cases-forecast",
            "update-all-cases-forecast-departed",
            "0 3 * * *",
            json!({ "tenantId": "departed" }),
        )
        .await
        .unwrap();

    schedule_recurring_jobs(&registry, &tenants(&["acme"])).await.unwrap();

    let repeatables = queue.repeatables().await.unwrap();
    assert_eq!(repeatables.len(), 1);
    assert_eq!(repeatables[0].job_id, "update-all-cases-forecast-acme");
    assert_eq!(repeatables[0].pattern, "0 3 * * *");
    assert_eq!(repeatables[0].data, json!({ "tenantId": "acme" }));
}

#[tokio::test]
async fn test_single_tenant_uses_plain_job_ids() {
    let broker = Arc::new(MemoryBroker::new());
    let registry = registry_with(broker);

    schedule_recurring_jobs(&registry, &TenantSet::Single).await.unwrap();

    let forecast = registry.forecast_updates().unwrap().repeatables().await.unwrap();
    assert_eq!(forecast.len(), 1);
    assert_eq!(forecast[0].job_id, "update-all-cases-forecast");
    assert_eq!(forecast[0].data, json!({}));
}

#[tokio::test]
async fn test_scheduler_fails_without_broker() {
    let registry = testplanit_workers::queue::QueueRegistry::new(None);
    assert_err!(schedule_recurring_jobs(&registry, &TenantSet::Single).await);
}

/// A due registration fires exactly once per fire time.
#[tokio::test]
async fn test_registered_job_fires_once() {
    let broker = Arc::new(MemoryBroker::new());
    let registry = registry_with(broker.clone());
    schedule_recurring_jobs(&registry, &tenants(&["acme"])).await.unwrap();

    let queue = registry.forecast_updates().unwrap();
    let next_run = queue.repeatables().await.unwrap()[0].next_run;
    let due = next_run + Duration::seconds(1);

    let first = queue.promote_due(due).await.unwrap();
    let again = queue.promote_due(due).await.unwrap();
    assert_eq!(first.repeats_fired, 1);
    assert_eq!(again.repeats_fired, 0);

    let waiting = broker.waiting_jobs(QueueName::ForecastUpdates.as_str());
    assert_eq!(waiting.len(), 1);
    assert_eq!(waiting[0].name, "update-all-cases-forecast");
    assert_eq!(waiting[0].data, json!({ "tenantId": "acme" }));

    let rescheduled = queue.repeatables().await.unwrap()[0].next_run;
    assert!(rescheduled > next_run);
    assert!(rescheduled > Utc::now());
}
