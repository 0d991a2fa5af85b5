// Configuration loading and management.

use anyhow::{ensure, Context, Result};
use std::time::Duration;

/// Number of worker threads serving client connections.
pub const ENV_CLIENT_HANDLER_COUNT: &str = "CLIENT_HANDLER_COUNT";
/// Cache entry TTL in milliseconds.
pub const ENV_CACHE_EXPIRED_TIME_MS: &str = "CACHE_EXPIRED_TIME_MS";
/// Number of hash buckets in the cache.
pub const ENV_CACHE_CAPACITY: &str = "CACHE_CAPACITY";
/// Bounded task queue size of the thread pool.
pub const ENV_TASK_QUEUE_CAPACITY: &str = "TASK_QUEUE_CAPACITY";
/// Whether pending tasks are executed ("drained") or dropped on shutdown.
pub const ENV_TASK_QUEUE_DRAIN_ON_SHUTDOWN: &str = "TASK_QUEUE_DRAIN_ON_SHUTDOWN";

const DEFAULT_HANDLER_COUNT: usize = 8;
const DEFAULT_CACHE_TTL_MS: u64 = 60_000;
const DEFAULT_CACHE_CAPACITY: usize = 1024;
const DEFAULT_QUEUE_CAPACITY: usize = 128;

/// Runtime configuration, sourced from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub handler_count: usize,
    pub cache_ttl: Duration,
    pub cache_capacity: usize,
    pub queue_capacity: usize,
    pub drain_on_shutdown: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            handler_count: DEFAULT_HANDLER_COUNT,
            cache_ttl: Duration::from_millis(DEFAULT_CACHE_TTL_MS),
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            drain_on_shutdown: false,
        }
    }
}

impl Config {
    /// Loads the configuration from process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads the configuration through an injectable lookup so tests can
    /// supply values without mutating process-wide environment state.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut cfg = Self::default();

        if let Some(raw) = lookup(ENV_CLIENT_HANDLER_COUNT) {
            cfg.handler_count = raw
                .parse()
                .with_context(|| format!("invalid {}: {:?}", ENV_CLIENT_HANDLER_COUNT, raw))?;
        }
        if let Some(raw) = lookup(ENV_CACHE_EXPIRED_TIME_MS) {
            let millis: u64 = raw
                .parse()
                .with_context(|| format!("invalid {}: {:?}", ENV_CACHE_EXPIRED_TIME_MS, raw))?;
            cfg.cache_ttl = Duration::from_millis(millis);
        }
        if let Some(raw) = lookup(ENV_CACHE_CAPACITY) {
            cfg.cache_capacity = raw
                .parse()
                .with_context(|| format!("invalid {}: {:?}", ENV_CACHE_CAPACITY, raw))?;
        }
        if let Some(raw) = lookup(ENV_TASK_QUEUE_CAPACITY) {
            cfg.queue_capacity = raw
                .parse()
                .with_context(|| format!("invalid {}: {:?}", ENV_TASK_QUEUE_CAPACITY, raw))?;
        }
        if let Some(raw) = lookup(ENV_TASK_QUEUE_DRAIN_ON_SHUTDOWN) {
            cfg.drain_on_shutdown = matches!(raw.as_str(), "1" | "true" | "yes");
        }

        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        ensure!(self.handler_count > 0, "{} must be > 0", ENV_CLIENT_HANDLER_COUNT);
        ensure!(
            self.cache_ttl >= Duration::from_millis(1),
            "{} must be >= 1",
            ENV_CACHE_EXPIRED_TIME_MS
        );
        ensure!(self.cache_capacity > 0, "{} must be > 0", ENV_CACHE_CAPACITY);
        ensure!(self.queue_capacity > 0, "{} must be > 0", ENV_TASK_QUEUE_CAPACITY);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_env_is_empty() {
        let cfg = Config::from_lookup(|_| None).unwrap();
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn test_all_options_parsed() {
        let cfg = Config::from_lookup(lookup_from(&[
            (ENV_CLIENT_HANDLER_COUNT, "4"),
            (ENV_CACHE_EXPIRED_TIME_MS, "250"),
            (ENV_CACHE_CAPACITY, "32"),
            (ENV_TASK_QUEUE_CAPACITY, "16"),
            (ENV_TASK_QUEUE_DRAIN_ON_SHUTDOWN, "true"),
        ]))
        .unwrap();

        assert_eq!(cfg.handler_count, 4);
        assert_eq!(cfg.cache_ttl, Duration::from_millis(250));
        assert_eq!(cfg.cache_capacity, 32);
        assert_eq!(cfg.queue_capacity, 16);
        assert!(cfg.drain_on_shutdown);
    }

    #[test]
    fn test_invalid_number_is_an_error() {
        let err = Config::from_lookup(lookup_from(&[(ENV_CACHE_CAPACITY, "lots")]))
            .unwrap_err()
            .to_string();
        assert!(err.contains(ENV_CACHE_CAPACITY), "error should name the variable: {err}");
    }

    #[test]
    fn test_zero_values_are_rejected() {
        assert!(Config::from_lookup(lookup_from(&[(ENV_CLIENT_HANDLER_COUNT, "0")])).is_err());
        assert!(Config::from_lookup(lookup_from(&[(ENV_CACHE_CAPACITY, "0")])).is_err());
        assert!(Config::from_lookup(lookup_from(&[(ENV_TASK_QUEUE_CAPACITY, "0")])).is_err());
        assert!(Config::from_lookup(lookup_from(&[(ENV_CACHE_EXPIRED_TIME_MS, "0")])).is_err());
    }

    #[test]
    fn test_drain_flag_accepts_common_truthy_spellings() {
        for raw in ["1", "true", "yes"] {
            let cfg =
                Config::from_lookup(lookup_from(&[(ENV_TASK_QUEUE_DRAIN_ON_SHUTDOWN, raw)]))
                    .unwrap();
            assert!(cfg.drain_on_shutdown, "{raw:?} should enable draining");
        }
        let cfg =
            Config::from_lookup(lookup_from(&[(ENV_TASK_QUEUE_DRAIN_ON_SHUTDOWN, "off")])).unwrap();
        assert!(!cfg.drain_on_shutdown);
    }
}
