//! Manager configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::client::WorkerIdentity;
use crate::job::DEFAULT_QUEUE;

/// Configuration errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// Concurrency must be at least one
    #[error("concurrency must be at least 1")]
    ZeroConcurrency,

    /// At least one queue is required
    #[error("at least one queue name is required")]
    NoQueues,

    /// Queue names cannot be blank
    #[error("queue names must not be empty")]
    EmptyQueueName,

    /// Pool capacity must be at least one
    #[error("pool capacity must be at least 1")]
    ZeroPoolCapacity,

    /// Heartbeat interval must be positive
    #[error("heartbeat interval must be greater than zero")]
    ZeroHeartbeatInterval,

    /// An environment variable could not be parsed
    #[error("invalid value for {name}: {value}")]
    InvalidEnv { name: &'static str, value: String },
}

/// Manager configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ManagerConfig {
    /// Random per-process worker id presented on every connection
    pub worker_id: String,

    /// Number of worker units (jobs processed in parallel)
    pub concurrency: usize,

    /// Queues to fetch from, highest priority first
    pub queues: Vec<String>,

    /// Maximum pooled connections (defaults to concurrency + 1 so the
    /// heartbeat never waits behind blocked fetches)
    pub pool_capacity: Option<usize>,

    /// Labels reported to the server
    #[serde(default)]
    pub labels: Vec<String>,

    /// Heartbeat period
    #[serde(with = "duration_millis")]
    pub heartbeat_interval: Duration,

    /// Fixed delay after a failed fetch
    #[serde(with = "duration_millis")]
    pub fetch_error_delay: Duration,

    /// Upper bound of the random delay before a worker's first fetch
    #[serde(with = "duration_millis")]
    pub startup_jitter: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            worker_id: generate_worker_id(),
            concurrency: 20,
            queues: vec![DEFAULT_QUEUE.to_string()],
            pool_capacity: None,
            labels: vec![],
            heartbeat_interval: Duration::from_secs(5),
            fetch_error_delay: Duration::from_secs(1),
            // i32::MAX nanoseconds
            startup_jitter: Duration::from_nanos(i32::MAX as u64),
        }
    }
}

impl ManagerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `WORKHORSE_WORKER_ID`: worker id (default: random)
    /// - `WORKHORSE_CONCURRENCY`: number of worker units (default: 20)
    /// - `WORKHORSE_QUEUES`: comma-separated queue names (default: "default")
    /// - `WORKHORSE_POOL_CAPACITY`: maximum pooled connections
    /// - `WORKHORSE_LABELS`: comma-separated labels
    /// - `WORKHORSE_HEARTBEAT_INTERVAL_MS`: heartbeat period in milliseconds
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(id) = lookup("WORKHORSE_WORKER_ID").filter(|v| !v.is_empty()) {
            config.worker_id = id;
        }
        if let Some(value) = lookup("WORKHORSE_CONCURRENCY") {
            config.concurrency = parse_env("WORKHORSE_CONCURRENCY", &value)?;
        }
        if let Some(value) = lookup("WORKHORSE_QUEUES") {
            config.queues = split_list(&value);
        }
        if let Some(value) = lookup("WORKHORSE_POOL_CAPACITY") {
            config.pool_capacity = Some(parse_env("WORKHORSE_POOL_CAPACITY", &value)?);
        }
        if let Some(value) = lookup("WORKHORSE_LABELS") {
            config.labels = split_list(&value);
        }
        if let Some(value) = lookup("WORKHORSE_HEARTBEAT_INTERVAL_MS") {
            let millis: u64 = parse_env("WORKHORSE_HEARTBEAT_INTERVAL_MS", &value)?;
            config.heartbeat_interval = Duration::from_millis(millis);
        }

        config.validate()?;
        Ok(config)
    }

    /// Set the worker id
    pub fn with_worker_id(mut self, id: impl Into<String>) -> Self {
        self.worker_id = id.into();
        self
    }

    /// Set the number of worker units
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Set the queues, highest priority first
    pub fn with_queues<I, S>(mut self, queues: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.queues = queues.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_pool_capacity(mut self, capacity: usize) -> Self {
        self.pool_capacity = Some(capacity);
        self
    }

    pub fn with_labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.labels = labels.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_fetch_error_delay(mut self, delay: Duration) -> Self {
        self.fetch_error_delay = delay;
        self
    }

    /// Set the startup jitter bound; `Duration::ZERO` disables it
    pub fn with_startup_jitter(mut self, jitter: Duration) -> Self {
        self.startup_jitter = jitter;
        self
    }

    /// Effective pool capacity
    pub fn effective_pool_capacity(&self) -> usize {
        self.pool_capacity
            .unwrap_or_else(|| self.concurrency.saturating_add(1))
    }

    /// Identity presented to the server
    pub fn identity(&self) -> WorkerIdentity {
        WorkerIdentity {
            wid: self.worker_id.clone(),
            pid: std::process::id(),
            labels: self.labels.clone(),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if self.queues.is_empty() {
            return Err(ConfigError::NoQueues);
        }
        if self.queues.iter().any(|q| q.trim().is_empty()) {
            return Err(ConfigError::EmptyQueueName);
        }
        if self.pool_capacity == Some(0) {
            return Err(ConfigError::ZeroPoolCapacity);
        }
        if self.heartbeat_interval.is_zero() {
            return Err(ConfigError::ZeroHeartbeatInterval);
        }
        Ok(())
    }
}

/// Random worker id, base-32 like the server expects
fn generate_worker_id() -> String {
    let n: u64 = rand::random::<u64>() >> 1;
    let mut digits = Vec::new();
    let mut rest = n;
    loop {
        let digit = (rest % 32) as u32;
        digits.push(std::char::from_digit(digit, 32).unwrap_or('0'));
        rest /= 32;
        if rest == 0 {
            break;
        }
    }
    digits.iter().rev().collect()
}

fn parse_env<T: std::str::FromStr>(name: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        name,
        value: value.to_string(),
    })
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Serde support for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
