//! Tenant routing: configuration lookup and per-tenant data clients.

pub mod clients;
pub mod config;

pub use clients::{ClientConnector, PostgresConnector, TenancyMode, TenantClientManager};
pub use config::{EnvSource, TenantConfig, TenantConfigResolver};

/// Anything that may name the tenant it belongs to (typically a job payload).
pub trait TenantScoped {
    fn tenant_id(&self) -> Option<&str>;
}

impl TenantScoped for Option<String> {
    fn tenant_id(&self) -> Option<&str> {
        self.as_deref()
    }
}
