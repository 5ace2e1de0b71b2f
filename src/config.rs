//! Orchestrator configuration
//!
//! Defaults mirror a small single-node deployment: a 30s deadline, eight concurrent
//! remote calls, and a 30 minute cache TTL. [`OrchestratorConfig::from_env`] reads the
//! `COMMENT_*` variables (after loading a `.env` file, if any).

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::CacheConfig;
use crate::error::{CommentError, Result};

/// What to do with work offered to a saturated pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RejectionPolicy {
    /// Fail the submission with `PoolExhausted`
    Abort,
    /// Accept the task anyway; it waits for a worker past the queue limit
    #[default]
    CallerRuns,
}

impl FromStr for RejectionPolicy {
    type Err = CommentError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "abort" => Ok(RejectionPolicy::Abort),
            "caller-runs" | "caller_runs" => Ok(RejectionPolicy::CallerRuns),
            other => Err(CommentError::Config(format!(
                "unknown rejection policy '{}'",
                other
            ))),
        }
    }
}

/// Shape of the worker pool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Task bodies allowed to run at once
    pub max_workers: usize,
    /// Task bodies allowed to wait for a worker
    pub queue_capacity: usize,
    pub rejection: RejectionPolicy,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_workers: 8,
            queue_capacity: 100,
            rejection: RejectionPolicy::CallerRuns,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Deadline applied when a request carries no override
    pub default_timeout: Duration,
    /// Model used when a request names none
    pub default_model: String,
    /// Reject submissions whose context has no API key
    pub require_credential: bool,
    pub pool: PoolConfig,
    pub cache: CacheConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_millis(30_000),
            default_model: "default".to_string(),
            require_credential: false,
            pool: PoolConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn builder() -> OrchestratorConfigBuilder {
        OrchestratorConfigBuilder::default()
    }

    /// Load configuration from the environment, starting from defaults.
    pub fn from_env() -> Result<Self> {
        // A missing .env file is fine
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (the environment in production)
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(ms) = parse_var::<u64, _>(&lookup, "COMMENT_DEFAULT_TIMEOUT_MS")? {
            config.default_timeout = Duration::from_millis(ms);
        }
        if let Some(model) = lookup("COMMENT_DEFAULT_MODEL").filter(|m| !m.trim().is_empty()) {
            config.default_model = model;
        }
        if let Some(require) = parse_var::<bool, _>(&lookup, "COMMENT_REQUIRE_CREDENTIAL")? {
            config.require_credential = require;
        }
        if let Some(workers) = parse_var::<usize, _>(&lookup, "COMMENT_POOL_MAX_WORKERS")? {
            config.pool.max_workers = workers;
        }
        if let Some(queue) = parse_var::<usize, _>(&lookup, "COMMENT_POOL_QUEUE_CAPACITY")? {
            config.pool.queue_capacity = queue;
        }
        if let Some(policy) = parse_var::<RejectionPolicy, _>(&lookup, "COMMENT_POOL_REJECTION")? {
            config.pool.rejection = policy;
        }
        if let Some(ttl) = parse_var::<u64, _>(&lookup, "COMMENT_CACHE_TTL_SECS")? {
            config.cache.default_ttl = Duration::from_secs(ttl);
        }
        if let Some(max) = parse_var::<usize, _>(&lookup, "COMMENT_CACHE_MAX_ENTRIES")? {
            config.cache.max_entries = max;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_timeout.is_zero() {
            return Err(CommentError::Config(
                "default_timeout must be greater than 0".to_string(),
            ));
        }
        if self.default_model.trim().is_empty() {
            return Err(CommentError::Config(
                "default_model must not be blank".to_string(),
            ));
        }
        if self.pool.max_workers == 0 {
            return Err(CommentError::Config(
                "pool.max_workers must be greater than 0".to_string(),
            ));
        }
        self.cache.validate().map_err(CommentError::Config)
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| CommentError::Config(format!("{}={:?}: {}", key, raw, e))),
    }
}

/// Builder for orchestrator configuration
#[derive(Debug, Default)]
pub struct OrchestratorConfigBuilder {
    default_timeout: Option<Duration>,
    default_model: Option<String>,
    require_credential: Option<bool>,
    pool: Option<PoolConfig>,
    cache: Option<CacheConfig>,
}

impl OrchestratorConfigBuilder {
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    pub fn default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    pub fn require_credential(mut self, require: bool) -> Self {
        self.require_credential = Some(require);
        self
    }

    pub fn pool(mut self, pool: PoolConfig) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn cache(mut self, cache: CacheConfig) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn build(self) -> OrchestratorConfig {
        let defaults = OrchestratorConfig::default();

        OrchestratorConfig {
            default_timeout: self.default_timeout.unwrap_or(defaults.default_timeout),
            default_model: self.default_model.unwrap_or(defaults.default_model),
            require_credential: self
                .require_credential
                .unwrap_or(defaults.require_credential),
            pool: self.pool.unwrap_or(defaults.pool),
            cache: self.cache.unwrap_or(defaults.cache),
        }
    }
}
