//! One-shot scheduler: registers the recurring jobs for every tenant.
//!
//! Exits 0 on success, 1 when a queue is unavailable or registration fails.

use tracing::{error, info};

use testplanit_workers::queue::QueueRegistry;
use testplanit_workers::runtime::bootstrap;
use testplanit_workers::services::{TenantSet, schedule_recurring_jobs};
use testplanit_workers::tenant::TenantConfigResolver;

#[tokio::main]
async fn main() {
    let config = bootstrap("scheduler");

    let tenants = if config.multi_tenant {
        let resolver = TenantConfigResolver::new(config.tenant_config_path.clone());
        let tenants = TenantSet::from_resolver(&resolver);
        if let TenantSet::Multi(ids) = &tenants {
            info!("Scheduling recurring jobs for {} tenants: {:?}", ids.len(), ids);
        }
        tenants
    } else {
        TenantSet::Single
    };

    let registry = QueueRegistry::connect(&config.broker).await;
    let result = schedule_recurring_jobs(&registry, &tenants).await;
    registry.close().await;

    match result {
        Ok(report) => {
            info!(
                "Recurring jobs scheduled: {} registered, {} stale registrations removed",
                report.registered, report.removed
            );
        }
        Err(e) => {
            error!("Failed to schedule recurring jobs: {}", e);
            std::process::exit(1);
        }
    }
}
