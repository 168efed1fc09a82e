//! Process startup shared by the binaries.

use tracing::error;

use crate::config::Config;
use crate::logging::init_logging;

/// Handle `--health-check` (Docker HEALTHCHECK): exit 0 when configuration
/// loads, 1 otherwise. Returns normally when the flag is absent.
pub fn exit_if_health_check() {
    if std::env::args().any(|arg| arg == "--health-check") {
        dotenvy::dotenv().ok();
        let code = if Config::from_env().is_ok() { 0 } else { 1 };
        std::process::exit(code);
    }
}

/// Load `.env` and the configuration, then install logging.
///
/// Exits with status 1 when the configuration is invalid.
pub fn bootstrap(binary: &str) -> Config {
    exit_if_health_check();
    dotenvy::dotenv().ok();

    match Config::from_env() {
        Ok(config) => {
            init_logging(config.log_directives());
            tracing::info!(
                "Starting {} v{} ({} mode, {})",
                binary,
                env!("CARGO_PKG_VERSION"),
                config.environment,
                if config.multi_tenant { "multi-tenant" } else { "single-tenant" }
            );
            config
        }
        Err(e) => {
            init_logging(&[]);
            error!("Failed to load configuration: {}", e);
            error!("");
            error!("Please check your environment variables:");
            error!("  - RUST_ENV must be set to 'development' or 'production'");
            error!("  - In production, DATABASE_URL and VALKEY_URL must be set");
            error!("  - In production, values must not match development defaults");
            std::process::exit(1);
        }
    }
}
