//! Per-tenant data client manager.
//!
//! In single-tenant mode every job shares one lazily created client. In
//! multi-tenant mode each job must name its tenant and gets a client for that
//! tenant's database, created on first use and cached until shutdown.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::join_all;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::Config;
use crate::db::DbPool;
use crate::error::{AppError, AppResult};

use super::{TenantConfigResolver, TenantScoped};

/// Opens and closes data clients.
#[async_trait]
pub trait ClientConnector: Send + Sync {
    type Client: Clone + Send + Sync + 'static;

    async fn connect(&self, database_url: &str) -> AppResult<Self::Client>;

    async fn disconnect(&self, client: Self::Client) -> AppResult<()>;
}

/// Production connector backed by a SeaORM pool.
pub struct PostgresConnector {
    max_connections: u32,
}

impl PostgresConnector {
    pub fn new(max_connections: u32) -> Self {
        Self { max_connections }
    }
}

#[async_trait]
impl ClientConnector for PostgresConnector {
    type Client = DbPool;

    async fn connect(&self, database_url: &str) -> AppResult<DbPool> {
        DbPool::connect(database_url, self.max_connections).await
    }

    async fn disconnect(&self, client: DbPool) -> AppResult<()> {
        client.close().await
    }
}

/// How jobs are mapped to databases.
pub enum TenancyMode {
    Single { database_url: String },
    Multi { resolver: Arc<TenantConfigResolver> },
}

pub struct TenantClientManager<C: ClientConnector> {
    connector: C,
    mode: TenancyMode,
    shared: Mutex<Option<C::Client>>,
    tenants: Mutex<HashMap<String, C::Client>>,
}

impl<C: ClientConnector> TenantClientManager<C> {
    pub fn new(connector: C, mode: TenancyMode) -> Self {
        Self {
            connector,
            mode,
            shared: Mutex::new(None),
            tenants: Mutex::new(HashMap::new()),
        }
    }

    /// Build the manager matching `MULTI_TENANT_MODE`.
    pub fn from_config(connector: C, config: &Config) -> Self {
        let mode = if config.multi_tenant {
            TenancyMode::Multi {
                resolver: Arc::new(TenantConfigResolver::new(config.tenant_config_path.clone())),
            }
        } else {
            TenancyMode::Single {
                database_url: config.database_url.clone(),
            }
        };
        Self::new(connector, mode)
    }

    /// Client for the tenant named by `payload`.
    pub async fn client_for<P>(&self, payload: &P) -> AppResult<C::Client>
    where
        P: TenantScoped + ?Sized,
    {
        match &self.mode {
            TenancyMode::Single { database_url } => self.shared_client(database_url).await,
            TenancyMode::Multi { resolver } => {
                let tenant_id = payload.tenant_id().ok_or(AppError::MissingTenantId)?;
                self.tenant_client(resolver, tenant_id).await
            }
        }
    }

    async fn shared_client(&self, database_url: &str) -> AppResult<C::Client> {
        let mut shared = self.shared.lock().await;
        if let Some(client) = shared.as_ref() {
            return Ok(client.clone());
        }

        let client = self.connector.connect(database_url).await?;
        *shared = Some(client.clone());
        Ok(client)
    }

    async fn tenant_client(
        &self,
        resolver: &TenantConfigResolver,
        tenant_id: &str,
    ) -> AppResult<C::Client> {
        if let Some(client) = self.tenants.lock().await.get(tenant_id) {
            return Ok(client.clone());
        }

        let config = resolver.resolve_or_reload(tenant_id)?;
        let client = self.connector.connect(&config.database_url).await?;

        let mut tenants = self.tenants.lock().await;
        if let Some(existing) = tenants.get(tenant_id) {
            // Another job connected this tenant while we were connecting
            let existing = existing.clone();
            drop(tenants);
            if let Err(e) = self.connector.disconnect(client).await {
                warn!(tenant_id, error = %e, "Failed to close duplicate tenant client");
            }
            return Ok(existing);
        }

        info!(tenant_id, "Connected tenant database");
        tenants.insert(tenant_id.to_string(), client.clone());
        Ok(client)
    }

    /// Close every cached client. Returns how many were closed.
    pub async fn disconnect_all(&self) -> usize {
        let mut clients: Vec<(String, C::Client)> = self.tenants.lock().await.drain().collect();
        if let Some(shared) = self.shared.lock().await.take() {
            clients.push(("<default>".to_string(), shared));
        }

        let count = clients.len();
        let results = join_all(clients.into_iter().map(|(tenant_id, client)| async move {
            (tenant_id, self.connector.disconnect(client).await)
        }))
        .await;

        for (tenant_id, result) in results {
            if let Err(e) = result {
                warn!(tenant_id = %tenant_id, error = %e, "Failed to disconnect tenant client");
            }
        }

        info!(count, "Disconnected tenant clients");
        count
    }
}
