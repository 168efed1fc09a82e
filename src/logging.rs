//! Tracing subscriber setup shared by the binaries.

use tracing_subscriber::filter::Directive;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Filter level used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "info";

/// Build the filter from `RUST_LOG` (or `default_filter` when it is unset or
/// invalid), then layer `directives` on top (see `Config::log_directives`).
pub fn build_filter(rust_log: Option<&str>, default_filter: &str, directives: &[&str]) -> EnvFilter {
    let base = rust_log
        .filter(|value| !value.trim().is_empty())
        .and_then(|value| EnvFilter::try_new(value).ok())
        .unwrap_or_else(|| EnvFilter::new(default_filter));

    directives
        .iter()
        .filter_map(|directive| match directive.parse::<Directive>() {
            Ok(directive) => Some(directive),
            Err(e) => {
                eprintln!("Ignoring invalid log directive '{}': {}", directive, e);
                None
            }
        })
        .fold(base, |filter, directive| filter.add_directive(directive))
}

/// Install the global subscriber.
pub fn init_logging(directives: &[&str]) {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let filter = build_filter(rust_log.as_deref(), DEFAULT_FILTER, directives);

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}
