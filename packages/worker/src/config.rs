//! Environment configuration for the worker process.

use std::time::Duration;

use actors::{DEFAULT_QUEUE_KEY, EngineConfig};
use db::DbConfig;

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

/// Connection settings for the WhatsApp gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WahaConfig {
    pub api_url: String,
    pub api_key: String,
    pub session: String,
}

/// Where job hints are queued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueBackend {
    /// In-process queue. Only this worker sees the hints it enqueues.
    Memory,
    /// Redis list shared with every worker using the same key.
    Redis { url: String, key: String },
}

/// Everything the worker binary needs to start.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub db: DbConfig,
    pub engine: EngineConfig,
    pub waha: WahaConfig,
    pub queue: QueueBackend,
}

impl WorkerConfig {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read the configuration through `lookup`. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let mut db = match get("DISPATCH_DB_ENDPOINT") {
            Some(endpoint) => DbConfig::remote(endpoint),
            None => DbConfig::memory(),
        };
        if let Some(namespace) = get("DISPATCH_DB_NAMESPACE") {
            db = db.with_namespace(namespace);
        }
        if let Some(database) = get("DISPATCH_DB_DATABASE") {
            db = db.with_database(database);
        }
        if let (Some(user), Some(pass)) = (get("DISPATCH_DB_USER"), get("DISPATCH_DB_PASS")) {
            db = db.with_credentials(user, pass);
        }

        let mut engine = EngineConfig::default();
        if let Some(workers) = parse::<usize>(&get, "DISPATCH_WORKERS")? {
            engine = engine.with_workers(workers);
        }
        if let Some(secs) = parse::<u64>(&get, "DISPATCH_POLL_SECS")? {
            engine = engine.with_poll_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = parse::<u64>(&get, "DISPATCH_LEASE_SECS")? {
            engine = engine.with_lease_duration(Duration::from_secs(secs));
        }
        if let Some(secs) = parse::<u64>(&get, "DISPATCH_TICK_SECS")? {
            engine = engine.with_tick_interval(Duration::from_secs(secs));
        }

        let waha = WahaConfig {
            api_url: get("WAHA_API_URL")
                .ok_or(ConfigError::Missing("WAHA_API_URL"))?
                .trim_end_matches('/')
                .to_string(),
            api_key: get("WAHA_API_KEY").ok_or(ConfigError::Missing("WAHA_API_KEY"))?,
            session: get("WAHA_SESSION").unwrap_or_else(|| "default".to_string()),
        };

        let queue = match get("DISPATCH_REDIS_URL") {
            Some(url) => QueueBackend::Redis {
                url,
                key: get("DISPATCH_QUEUE_KEY").unwrap_or_else(|| DEFAULT_QUEUE_KEY.to_string()),
            },
            None => QueueBackend::Memory,
        };

        Ok(Self {
            db,
            engine,
            waha,
            queue,
        })
    }
}

fn parse<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<T>, ConfigError> {
    get(name)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid { name, value })
        })
        .transpose()
}
