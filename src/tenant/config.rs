//! Tenant configuration resolver.
//!
//! Tenants are read from three sources, merged in order with earlier sources
//! winning on duplicate ids:
//!
//! 1. the JSON file at `TENANT_CONFIG_FILE`
//! 2. the `TENANT_CONFIGS` environment variable (same JSON shape)
//! 3. `TENANT_<ID>_DATABASE_URL` variables, with optional
//!    `TENANT_<ID>_ELASTICSEARCH_NODE` and `TENANT_<ID>_ELASTICSEARCH_INDEX`
//!
//! The JSON shape is an object keyed by tenant id:
//!
//! ```json
//! { "acme": { "databaseUrl": "postgres://...", "elasticsearchIndex": "acme" } }
//! ```

use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult};

const TENANT_CONFIGS_VAR: &str = "TENANT_CONFIGS";
const TENANT_VAR_PREFIX: &str = "TENANT_";
const DATABASE_URL_SUFFIXES: [&str; 2] = ["_DATABASE_URL", "_DATASTORE_URL"];

/// Connection settings of one tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantConfig {
    pub tenant_id: String,
    pub database_url: String,
    pub elasticsearch_node: Option<String>,
    pub elasticsearch_index: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TenantEntry {
    #[serde(alias = "datastoreUrl")]
    database_url: String,
    #[serde(default)]
    elasticsearch_node: Option<String>,
    #[serde(default)]
    elasticsearch_index: Option<String>,
}

/// Where environment variables are read from.
#[derive(Debug, Clone)]
pub enum EnvSource {
    /// The process environment.
    Process,
    /// A fixed set of variables (tests, embedding).
    Fixed(HashMap<String, String>),
}

impl EnvSource {
    fn var(&self, name: &str) -> Option<String> {
        match self {
            Self::Process => env::var(name).ok(),
            Self::Fixed(vars) => vars.get(name).cloned(),
        }
    }

    fn vars(&self) -> Vec<(String, String)> {
        let mut vars: Vec<(String, String)> = match self {
            Self::Process => env::vars().collect(),
            Self::Fixed(vars) => vars.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        };
        vars.sort();
        vars
    }
}

/// Lazily loaded, reloadable cache of tenant configurations.
pub struct TenantConfigResolver {
    config_path: PathBuf,
    env: EnvSource,
    cache: RwLock<Option<HashMap<String, TenantConfig>>>,
}

impl TenantConfigResolver {
    /// Resolver reading the given file and the process environment.
    pub fn new(config_path: impl Into<PathBuf>) -> Self {
        Self::with_sources(config_path, EnvSource::Process)
    }

    pub fn with_sources(config_path: impl Into<PathBuf>, env: EnvSource) -> Self {
        Self {
            config_path: config_path.into(),
            env,
            cache: RwLock::new(None),
        }
    }

    /// Look up a tenant, loading the sources on first use.
    pub fn resolve(&self, tenant_id: &str) -> Option<TenantConfig> {
        {
            let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
            if let Some(tenants) = cache.as_ref() {
                return tenants.get(tenant_id).cloned();
            }
        }

        let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
        cache
            .get_or_insert_with(|| self.load())
            .get(tenant_id)
            .cloned()
    }

    /// Like `resolve`, but re-reads every source once before giving up.
    pub fn resolve_or_reload(&self, tenant_id: &str) -> AppResult<TenantConfig> {
        if let Some(config) = self.resolve(tenant_id) {
            return Ok(config);
        }

        debug!(tenant_id, "Tenant not cached, reloading tenant configuration");
        self.reload();

        self.resolve(tenant_id)
            .ok_or_else(|| AppError::UnknownTenant(tenant_id.to_string()))
    }

    /// Drop the cache and rebuild it from every source.
    pub fn reload(&self) {
        let tenants = self.load();
        info!(count = tenants.len(), "Tenant configuration loaded");
        *self.cache.write().unwrap_or_else(|e| e.into_inner()) = Some(tenants);
    }

    /// Every configured tenant, sorted by id.
    pub fn tenants(&self) -> Vec<TenantConfig> {
        let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
        let mut tenants: Vec<TenantConfig> = cache
            .get_or_insert_with(|| self.load())
            .values()
            .cloned()
            .collect();
        tenants.sort_by(|a, b| a.tenant_id.cmp(&b.tenant_id));
        tenants
    }

    fn load(&self) -> HashMap<String, TenantConfig> {
        let mut tenants = HashMap::new();

        if let Some(raw) = read_config_file(&self.config_path) {
            merge_json(&mut tenants, &raw, &self.config_path.display().to_string());
        }

        if let Some(raw) = self.env.var(TENANT_CONFIGS_VAR) {
            merge_json(&mut tenants, &raw, TENANT_CONFIGS_VAR);
        }

        self.merge_env_vars(&mut tenants);

        tenants
    }

    fn merge_env_vars(&self, tenants: &mut HashMap<String, TenantConfig>) {
        for (name, value) in self.env.vars() {
            let Some(raw_id) = env_tenant_id(&name) else {
                continue;
            };
            if value.trim().is_empty() {
                continue;
            }

            let tenant_id = raw_id.to_lowercase();
            if tenants.contains_key(&tenant_id) {
                continue;
            }

            let config = TenantConfig {
                tenant_id: tenant_id.clone(),
                database_url: value,
                elasticsearch_node: self
                    .env
                    .var(&format!("{}{}_ELASTICSEARCH_NODE", TENANT_VAR_PREFIX, raw_id)),
                elasticsearch_index: self
                    .env
                    .var(&format!("{}{}_ELASTICSEARCH_INDEX", TENANT_VAR_PREFIX, raw_id)),
            };
            tenants.insert(tenant_id, config);
        }
    }
}

/// `TENANT_ACME_DATABASE_URL` -> `ACME`.
fn env_tenant_id(name: &str) -> Option<&str> {
    let rest = name.strip_prefix(TENANT_VAR_PREFIX)?;
    DATABASE_URL_SUFFIXES
        .iter()
        .find_map(|suffix| rest.strip_suffix(suffix))
        .filter(|id| !id.is_empty())
}

fn read_config_file(path: &Path) -> Option<String> {
    if !path.exists() {
        debug!(path = %path.display(), "Tenant config file not present");
        return None;
    }

    match std::fs::read_to_string(path) {
        Ok(raw) => Some(raw),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to read tenant config file");
            None
        }
    }
}

fn merge_json(tenants: &mut HashMap<String, TenantConfig>, raw: &str, source: &str) {
    let entries: HashMap<String, TenantEntry> = match serde_json::from_str(raw) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(source, error = %e, "Ignoring malformed tenant configuration");
            return;
        }
    };

    for (tenant_id, entry) in entries {
        if tenants.contains_key(&tenant_id) {
            continue;
        }
        tenants.insert(
            tenant_id.clone(),
            TenantConfig {
                tenant_id,
                database_url: entry.database_url,
                elasticsearch_node: entry.elasticsearch_node,
                elasticsearch_index: entry.elasticsearch_index,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn fixed(vars: &[(&str, &str)]) -> EnvSource {
        EnvSource::Fixed(
            vars.iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    fn write_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_missing_file_is_not_an_error() {
        let resolver = TenantConfigResolver::with_sources(
            "/nonexistent/tenants.json",
            fixed(&[("TENANT_ACME_DATABASE_URL", "postgres://acme")]),
        );

        let config = resolver.resolve("acme").unwrap();
        assert_eq!(config.database_url, "postgres://acme");
        assert!(resolver.resolve("other").is_none());
    }

    #[test]
    fn test_file_wins_over_env_sources() {
        let file = write_file(
            r#"{"acme": {"databaseUrl": "postgres://file", "elasticsearchIndex": "acme-idx"}}"#,
        );
        let resolver = TenantConfigResolver::with_sources(
            file.path(),
            fixed(&[
                (
                    "TENANT_CONFIGS",
                    r#"{"acme": {"databaseUrl": "postgres://blob"}, "beta": {"databaseUrl": "postgres://beta-blob"}}"#,
                ),
                ("TENANT_ACME_DATABASE_URL", "postgres://var"),
                ("TENANT_BETA_DATABASE_URL", "postgres://beta-var"),
                ("TENANT_GAMMA_DATASTORE_URL", "postgres://gamma"),
                ("TENANT_GAMMA_ELASTICSEARCH_NODE", "http://es:9200"),
            ]),
        );

        let acme = resolver.resolve("acme").unwrap();
        assert_eq!(acme.database_url, "postgres://file");
        assert_eq!(acme.elasticsearch_index.as_deref(), Some("acme-idx"));

        assert_eq!(resolver.resolve("beta").unwrap().database_url, "postgres://beta-blob");

        let gamma = resolver.resolve("gamma").unwrap();
        assert_eq!(gamma.database_url, "postgres://gamma");
        assert_eq!(gamma.elasticsearch_node.as_deref(), Some("http://es:9200"));

        let ids: Vec<String> = resolver.tenants().into_iter().map(|t| t.tenant_id).collect();
        assert_eq!(ids, vec!["acme", "beta", "gamma"]);
    }

    #[test]
    fn test_malformed_source_is_skipped() {
        let file = write_file("{ not json");
        let resolver = TenantConfigResolver::with_sources(
            file.path(),
            fixed(&[
                ("TENANT_CONFIGS", "[1, 2"),
                ("TENANT_ACME_DATABASE_URL", "postgres://acme"),
            ]),
        );

        assert_eq!(resolver.tenants().len(), 1);
        assert!(resolver.resolve("acme").is_some());
    }

    #[test]
    fn test_resolve_or_reload_picks_up_new_tenants() {
        let file = write_file(r#"{"acme": {"databaseUrl": "postgres://acme"}}"#);
        let resolver = TenantConfigResolver::with_sources(file.path(), fixed(&[]));

        assert!(resolver.resolve("beta").is_none());

        std::fs::write(
            file.path(),
            r#"{"acme": {"databaseUrl": "postgres://acme"}, "beta": {"databaseUrl": "postgres://beta"}}"#,
        )
        .unwrap();

        // Plain resolve keeps serving the cached view
        assert!(resolver.resolve("beta").is_none());

        let beta = resolver.resolve_or_reload("beta").unwrap();
        assert_eq!(beta.database_url, "postgres://beta");

        let err = resolver.resolve_or_reload("missing").unwrap_err();
        assert!(matches!(err, AppError::UnknownTenant(id) if id == "missing"));
    }

    #[test]
    fn test_env_tenant_id_parsing() {
        assert_eq!(env_tenant_id("TENANT_ACME_DATABASE_URL"), Some("ACME"));
        assert_eq!(env_tenant_id("TENANT_ACME_DATASTORE_URL"), Some("ACME"));
        assert_eq!(env_tenant_id("TENANT__DATABASE_URL"), None);
        assert_eq!(env_tenant_id("TENANT_CONFIGS"), None);
        assert_eq!(env_tenant_id("DATABASE_URL"), None);
    }
}
