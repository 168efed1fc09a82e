//! Job dispatch across tenants and queues.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::json;
use testplanit_workers::models::{CaseSource, NotificationMode};
use testplanit_workers::queue::{AddOptions, QueueName};
use testplanit_workers::test_support::{MemoryBroker, MemoryStore};
use testplanit_workers::workers::{ForecastHandler, NotificationHandler, WorkerPool};
use tokio_util::sync::CancellationToken;

use super::test_helpers::*;

/// Each tenant's job only touches that tenant's database.
#[tokio::test]
async fn test_forecast_jobs_are_routed_per_tenant() {
    let acme = Arc::new(MemoryStore::new());
    let globex = Arc::new(MemoryStore::new());
    for store in [&acme, &globex] {
        store.add_case(1, CaseSource::Junit);
    }
    acme.add_junit_result(1, Some(1.0));
    globex.add_junit_result(1, Some(9.0));

    let broker = Arc::new(MemoryBroker::new());
    let registry = registry_with(broker.clone());
    let queue = registry.forecast_updates().unwrap();
    queue
        .add(
            "update-single-case-forecast",
            json!({ "repositoryCaseId": 1, "tenantId": "acme" }),
            AddOptions::default(),
        )
        .await
        .unwrap();

    let clients = multi_tenant_clients(&[("acme", acme.clone()), ("globex", globex.clone())]);
    let handler = Arc::new(ForecastHandler::new(clients.clone()));
    let shutdown = CancellationToken::new();
    let running = tokio::spawn(WorkerPool::new(queue, handler, fast_pool(5)).run(shutdown.clone()));

    wait_until(|| acme.case_forecast(1).is_some_and(|f| f.automated.is_some())).await;
    shutdown.cancel();
    running.await.unwrap();

    assert_eq!(acme.case_forecast(1).and_then(|f| f.automated), Some(1.0));
    assert_eq!(globex.case_forecast(1).and_then(|f| f.automated), None);
    assert_eq!(clients.disconnect_all().await, 1);
}

/// Jobs without a tenant fail in multi-tenant mode and are retried.
#[tokio::test]
async fn test_missing_tenant_fails_the_job() {
    let broker = Arc::new(MemoryBroker::new());
    let registry = registry_with(broker.clone());
    let queue = registry.forecast_updates().unwrap();
    queue
        .add(
            "update-all-cases-forecast",
            json!({}),
            AddOptions::default(),
        )
        .await
        .unwrap();

    let clients = multi_tenant_clients(&[("acme", Arc::new(MemoryStore::new()))]);
    let handler = Arc::new(ForecastHandler::new(clients));
    let shutdown = CancellationToken::new();
    let running = tokio::spawn(
        WorkerPool::new(queue.clone(), handler, fast_pool(1)).run(shutdown.clone()),
    );

    let mut delayed = 0;
    for _ in 0..200 {
        delayed = queue.counts().await.unwrap().delayed;
        if delayed == 1 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(delayed, 1);
    shutdown.cancel();

    let stats = running.await.unwrap();
    assert_eq!(stats.retried, 1);
    assert_eq!(stats.completed, 0);
}

/// An immediate-mode notification lands in the inbox and the emails queue.
#[tokio::test]
async fn test_notification_flow_produces_email_job() {
    let store = Arc::new(MemoryStore::new());
    store.add_user("u1");
    store.set_user_mode("u1", NotificationMode::InAppEmailImmediate);
    store.add_user("u2");
    store.set_user_mode("u2", NotificationMode::InAppEmailDaily);
    store.seed_notification("u2", "Yesterday", Utc::now() - Duration::hours(3), false);

    let broker = Arc::new(MemoryBroker::new());
    let registry = Arc::new(registry_with(broker.clone()));
    let queue = registry.notifications().unwrap();
    queue
        .add(
            "create-notification",
            json!({
                "userId": "u1",
                "type": "COMMENT_MENTION",
                "title": "Mentioned",
                "message": "You were mentioned in a comment"
            }),
            AddOptions::default(),
        )
        .await
        .unwrap();
    queue
        .add("send-daily-digest", json!({}), AddOptions::default())
        .await
        .unwrap();

    let handler = Arc::new(NotificationHandler::new(
        single_tenant_clients(store.clone()),
        registry.clone(),
    ));
    let shutdown = CancellationToken::new();
    let running = tokio::spawn(WorkerPool::new(queue, handler, fast_pool(5)).run(shutdown.clone()));

    wait_until(|| broker.waiting_jobs(QueueName::Emails.as_str()).len() == 2).await;
    shutdown.cancel();
    assert_eq!(running.await.unwrap().completed, 2);

    let mut names: Vec<String> = broker
        .waiting_jobs(QueueName::Emails.as_str())
        .into_iter()
        .map(|job| job.name)
        .collect();
    names.sort();
    assert_eq!(names, vec!["send-digest-email", "send-notification-email"]);
    assert_eq!(store.notifications_of("u1").len(), 1);
}
