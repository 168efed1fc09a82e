//! Apply the database schema.
//!
//! Migrates `DATABASE_URL`, or every configured tenant database in
//! multi-tenant mode.

use tracing::{error, info};

use testplanit_workers::db::DbPool;
use testplanit_workers::error::AppResult;
use testplanit_workers::runtime::bootstrap;
use testplanit_workers::tenant::TenantConfigResolver;

async fn migrate(label: &str, database_url: &str, max_connections: u32) -> AppResult<()> {
    let pool = DbPool::connect(database_url, max_connections).await?;
    let result = pool.run_migrations().await;
    pool.close().await?;
    result?;
    info!("Migrations applied for {}", label);
    Ok(())
}

#[tokio::main]
async fn main() {
    let config = bootstrap("migrate");

    let targets: Vec<(String, String)> = if config.multi_tenant {
        TenantConfigResolver::new(config.tenant_config_path.clone())
            .tenants()
            .into_iter()
            .map(|t| (format!("tenant {}", t.tenant_id), t.database_url))
            .collect()
    } else {
        vec![("default database".to_string(), config.database_url.clone())]
    };

    let mut failures = 0;
    for (label, database_url) in &targets {
        if let Err(e) = migrate(label, database_url, config.db_max_connections).await {
            error!("Migration failed for {}: {}", label, e);
            failures += 1;
        }
    }

    if failures > 0 {
        std::process::exit(1);
    }
}
