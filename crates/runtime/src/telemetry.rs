#![forbid(unsafe_code)]

use tracing_subscriber::EnvFilter;

pub const ENV_LOG: &str = "CLUSTERVIEW_LOG";

/// Installs a fmt subscriber filtered by `CLUSTERVIEW_LOG`, then `RUST_LOG`, then `info`.
/// Returns false when a global subscriber was already set.
pub fn init_tracing() -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_target(true)
        .try_init()
        .is_ok()
}

fn env_filter() -> EnvFilter {
    if let Ok(directives) = std::env::var(ENV_LOG)
        && let Ok(filter) = EnvFilter::try_new(&directives)
    {
        return filter;
    }
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}
