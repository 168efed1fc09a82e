//! Shared helpers for the engine tests.

use std::sync::Arc;
use std::time::Duration;

use testplanit_workers::models::CaseSource;
use testplanit_workers::queue::{Broker, QueueRegistry};
use testplanit_workers::tenant::{EnvSource, TenancyMode, TenantClientManager, TenantConfigResolver};
use testplanit_workers::test_support::{MemoryBroker, MemoryConnector, MemoryStore};
use testplanit_workers::workers::WorkerPoolConfig;

pub const DEFAULT_DATABASE_URL: &str = "postgres://default/testplanit";

/// Single-tenant client manager over one in-memory store.
pub fn single_tenant_clients(store: Arc<MemoryStore>) -> Arc<TenantClientManager<MemoryConnector>> {
    Arc::new(TenantClientManager::new(
        MemoryConnector::new(store),
        TenancyMode::Single {
            database_url: DEFAULT_DATABASE_URL.to_string(),
        },
    ))
}

/// Multi-tenant client manager with one store per `(tenant, store)` pair.
pub fn multi_tenant_clients(
    tenants: &[(&str, Arc<MemoryStore>)],
) -> Arc<TenantClientManager<MemoryConnector>> {
    let mut env = std::collections::HashMap::new();
    let mut connector = MemoryConnector::new(Arc::new(MemoryStore::new()));

    for (tenant_id, store) in tenants {
        let url = format!("postgres://{}/testplanit", tenant_id);
        env.insert(
            format!("TENANT_{}_DATABASE_URL", tenant_id.to_uppercase()),
            url.clone(),
        );
        connector = connector.with_store(&url, store.clone());
    }

    let resolver = TenantConfigResolver::with_sources("/nonexistent/tenants.json", EnvSource::Fixed(env));
    Arc::new(TenantClientManager::new(
        connector,
        TenancyMode::Multi {
            resolver: Arc::new(resolver),
        },
    ))
}

pub fn registry_with(broker: Arc<MemoryBroker>) -> QueueRegistry {
    QueueRegistry::new(Some(broker as Arc<dyn Broker>))
}

/// Pool settings that keep tests fast.
pub fn fast_pool(concurrency: usize) -> WorkerPoolConfig {
    WorkerPoolConfig::new(concurrency)
        .with_poll_interval(Duration::from_millis(10))
        .with_promote_interval(Duration::from_millis(20))
        .with_shutdown_timeout(Duration::from_secs(2))
}

/// Poll `condition` for up to two seconds.
pub async fn wait_until<F: Fn() -> bool>(condition: F) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 2s");
}

/// Case 1 (MANUAL, elapsed 10s and 20s in a finished run) linked to case 2
/// (JUNIT, one 1.5s result).
pub fn seed_linked_pair(store: &MemoryStore) {
    store.add_case(1, CaseSource::Manual);
    store.add_case(2, CaseSource::Junit);
    store.link(1, 2);

    store.add_run(100);
    store.complete_run(100);
    let run_case = store.add_run_case(100, 1, Some("passed"));
    store.add_manual_result(run_case, Some(10));
    store.add_manual_result(run_case, Some(20));
    store.add_junit_result(2, Some(1.5));
}
