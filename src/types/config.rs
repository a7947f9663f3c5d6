//! Configuration structures.
//!
//! Configuration is assembled from defaults overlaid with environment
//! variables (see `Config::from_env`); nothing in business logic reads
//! `std::env::var` directly.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// State store configuration.
    #[serde(default)]
    pub state_store: StateStoreConfig,

    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Default resource limits applied when a node/diagram doesn't override them.
    #[serde(default)]
    pub defaults: DefaultLimits,

    /// Envelope construction configuration.
    #[serde(default)]
    pub envelope: EnvelopeConfig,
}

impl Config {
    /// Build a `Config` from defaults overlaid with recognized environment
    /// variables. Unset variables leave the default in place.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("STATE_STORE_PATH").or_else(|_| std::env::var("STATE_DB_PATH"))
        {
            config.state_store.db_path = path;
        }
        if let Ok(dir) = std::env::var("DIPEO_BASE_DIR") {
            config.state_store.base_dir = Some(dir);
        }
        if let Ok(n) = std::env::var("DIPEO_MAX_PARALLEL_SUBDIAGRAMS") {
            if let Ok(n) = n.parse() {
                config.defaults.max_parallel_subdiagrams = n;
            }
        }
        if let Ok(strict) = std::env::var("DIPEO_STRICT_ENVELOPE") {
            config.envelope.strict = strict == "1";
        }
        if let Ok(fmt) = std::env::var("DIPEO_LOG_FORMAT") {
            config.observability.json_logs = fmt.eq_ignore_ascii_case("json");
        }

        config
    }
}

/// State store configuration (SQLite path, pragmas, retry policy).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateStoreConfig {
    /// Path to the SQLite database file.
    pub db_path: String,

    /// Base directory for resolving relative template/schema paths.
    pub base_dir: Option<String>,

    /// `busy_timeout` pragma, in milliseconds.
    pub busy_timeout_ms: u32,

    /// `cache_size` pragma, in KiB (negative in SQLite's own units; stored
    /// here as a positive byte count and converted at connection time).
    pub cache_size_bytes: u64,

    /// `mmap_size` pragma, in bytes.
    pub mmap_size_bytes: u64,

    /// Reconnect/retry attempts on a failed write before propagating.
    pub max_retries: u32,

    /// Base delay for the linear reconnect backoff.
    #[serde(with = "humantime_serde")]
    pub retry_base_delay: Duration,
}

impl Default for StateStoreConfig {
    fn default() -> Self {
        Self {
            db_path: "execution_state.db".to_string(),
            base_dir: None,
            busy_timeout_ms: 10_000,
            cache_size_bytes: 64 * 1024 * 1024,
            mmap_size_bytes: 256 * 1024 * 1024,
            max_retries: 3,
            retry_base_delay: Duration::from_millis(100),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Tracing log level (trace, debug, info, warn, error); `RUST_LOG` wins if set.
    pub log_level: String,

    /// Enable JSON log formatting.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

/// Default resource limits for diagram execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultLimits {
    /// Default per-(node, epoch) iteration cap when a node doesn't set one.
    pub max_iteration: u32,

    /// Default cap on concurrently in-flight sub-diagrams.
    pub max_parallel_subdiagrams: usize,

    /// Default hook/handler timeout.
    #[serde(with = "humantime_serde")]
    pub hook_timeout: Duration,

    /// Default cap on concurrently in-flight node workers per execution.
    pub max_concurrent_workers: usize,
}

impl Default for DefaultLimits {
    fn default() -> Self {
        Self {
            max_iteration: 100,
            max_parallel_subdiagrams: 10,
            hook_timeout: Duration::from_secs(30),
            max_concurrent_workers: 50,
        }
    }
}

/// Envelope factory configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EnvelopeConfig {
    /// When true, the strict envelope factory is used by default.
    pub strict: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.defaults.max_iteration, 100);
        assert_eq!(config.defaults.max_parallel_subdiagrams, 10);
        assert_eq!(config.state_store.busy_timeout_ms, 10_000);
        assert!(!config.envelope.strict);
    }

    #[test]
    fn from_env_overrides_defaults() {
        std::env::set_var("DIPEO_STRICT_ENVELOPE", "1");
        std::env::set_var("DIPEO_MAX_PARALLEL_SUBDIAGRAMS", "4");
        let config = Config::from_env();
        assert!(config.envelope.strict);
        assert_eq!(config.defaults.max_parallel_subdiagrams, 4);
        std::env::remove_var("DIPEO_STRICT_ENVELOPE");
        std::env::remove_var("DIPEO_MAX_PARALLEL_SUBDIAGRAMS");
    }
}
