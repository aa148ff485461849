#![forbid(unsafe_code)]

use crate::error::ConfigError;
use cv_storage::StoreConfig;
use std::path::PathBuf;
use std::time::Duration;

pub const ENV_STORAGE_DIR: &str = "CLUSTERVIEW_STORAGE_DIR";
pub const ENV_WORKERS: &str = "CLUSTERVIEW_WORKERS";
pub const ENV_MAX_CONNECTIONS: &str = "CLUSTERVIEW_MAX_CONNECTIONS";
pub const ENV_COALESCE_MS: &str = "CLUSTERVIEW_COALESCE_MS";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub storage_dir: PathBuf,
    /// Runner tasks allowed to hold a store connection at the same time.
    pub workers: usize,
    pub store: StoreConfig,
    /// Quiet period between the last completed operation and the consolidated refresh.
    pub coalesce_window: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            storage_dir: PathBuf::from(".clusterview"),
            workers: 4,
            store: StoreConfig::default(),
            coalesce_window: Duration::from_millis(100),
        }
    }
}

impl RuntimeConfig {
    /// Defaults overlaid with the `CLUSTERVIEW_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(dir) = lookup(ENV_STORAGE_DIR).filter(|value| !value.trim().is_empty()) {
            config.storage_dir = PathBuf::from(dir);
        }
        if let Some(value) = lookup(ENV_WORKERS) {
            config.workers = parse_count(ENV_WORKERS, &value)?;
        }
        if let Some(value) = lookup(ENV_MAX_CONNECTIONS) {
            config.store.max_connections = parse_count(ENV_MAX_CONNECTIONS, &value)?;
        }
        if let Some(value) = lookup(ENV_COALESCE_MS) {
            let millis = parse_count(ENV_COALESCE_MS, &value)?;
            config.coalesce_window =
                Duration::from_millis(u64::try_from(millis).unwrap_or(u64::MAX));
        }
        config.validate()?;
        Ok(config)
    }

    /// The coalescing window in whole milliseconds, saturating at `u64::MAX`.
    pub fn coalesce_ms(&self) -> u64 {
        u64::try_from(self.coalesce_window.as_millis()).unwrap_or(u64::MAX)
    }

    /// Every worker needs its own connection, so the pool must be at least as large.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Zero { var: ENV_WORKERS });
        }
        if self.store.max_connections == 0 {
            return Err(ConfigError::Zero {
                var: ENV_MAX_CONNECTIONS,
            });
        }
        if self.workers > self.store.max_connections {
            return Err(ConfigError::WorkersExceedConnections {
                workers: self.workers,
                max_connections: self.store.max_connections,
            });
        }
        Ok(())
    }
}

fn parse_count(var: &'static str, value: &str) -> Result<usize, ConfigError> {
    let parsed = value
        .trim()
        .parse::<usize>()
        .map_err(|_| ConfigError::InvalidNumber {
            var,
            value: value.to_string(),
        })?;
    if parsed == 0 {
        return Err(ConfigError::Zero { var });
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| map.get(var).cloned()
    }

    #[test]
    fn empty_environment_yields_defaults() {
        let config = RuntimeConfig::from_lookup(lookup(&[])).expect("config");
        assert_eq!(config, RuntimeConfig::default());
    }

    #[test]
    fn environment_overrides_are_applied() {
        let config = RuntimeConfig::from_lookup(lookup(&[
            (ENV_STORAGE_DIR, "/var/lib/clusterview"),
            (ENV_WORKERS, "2"),
            (ENV_MAX_CONNECTIONS, " 3 "),
            (ENV_COALESCE_MS, "250"),
        ]))
        .expect("config");
        assert_eq!(config.storage_dir, PathBuf::from("/var/lib/clusterview"));
        assert_eq!(config.workers, 2);
        assert_eq!(config.store.max_connections, 3);
        assert_eq!(config.coalesce_window, Duration::from_millis(250));
    }

    #[test]
    fn malformed_numbers_are_rejected() {
        let err = RuntimeConfig::from_lookup(lookup(&[(ENV_WORKERS, "many")]))
            .expect_err("invalid workers");
        assert!(matches!(
            err,
            ConfigError::InvalidNumber {
                var: ENV_WORKERS,
                ..
            }
        ));

        let err = RuntimeConfig::from_lookup(lookup(&[(ENV_COALESCE_MS, "0")]))
            .expect_err("zero window");
        assert!(matches!(err, ConfigError::Zero { var: ENV_COALESCE_MS }));
    }

    #[test]
    fn coalesce_ms_saturates_instead_of_truncating() {
        let mut config = RuntimeConfig::default();
        assert_eq!(config.coalesce_ms(), 100);
        config.coalesce_window = Duration::MAX;
        assert_eq!(config.coalesce_ms(), u64::MAX);
    }

    #[test]
    fn workers_cannot_outnumber_connections() {
        let err = RuntimeConfig::from_lookup(lookup(&[
            (ENV_WORKERS, "9"),
            (ENV_MAX_CONNECTIONS, "8"),
        ]))
        .expect_err("too many workers");
        assert!(matches!(
            err,
            ConfigError::WorkersExceedConnections {
                workers: 9,
                max_connections: 8
            }
        ));
    }
}
