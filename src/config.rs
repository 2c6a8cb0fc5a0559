//! Environment-driven configuration.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::index::{ClientOptions, IndexSettings, RetryPolicy, SystemClock};

/// Settings for the index client, storage and table peer.
#[derive(Debug, Clone, PartialEq)]
pub struct GridConfig {
    /// `elastic://host:port[,host:port]/cluster`
    pub elastic_address: Option<String>,
    pub connect_retry: Duration,
    /// 0 retries forever.
    pub connect_max_attempts: u32,
    pub operation_retry: Duration,
    /// 0 retries forever.
    pub operation_max_attempts: u32,
    pub query_max_attempts: u32,
    /// Values above 1.0 grow retry delays exponentially.
    pub backoff_multiplier: f64,
    pub max_backoff: Duration,
    pub throttling_factor: f64,
    pub http_timeout: Duration,
    pub store_path: Option<PathBuf>,
    pub table_peer: Option<String>,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            elastic_address: None,
            connect_retry: Duration::from_secs(10),
            connect_max_attempts: 0,
            operation_retry: Duration::from_millis(1000),
            operation_max_attempts: 0,
            query_max_attempts: 10,
            backoff_multiplier: 1.0,
            max_backoff: Duration::from_secs(60),
            throttling_factor: 1.0,
            http_timeout: Duration::from_secs(30),
            store_path: None,
            table_peer: None,
        }
    }
}

fn parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    dotenvy::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn non_empty(key: &str) -> Option<String> {
    dotenvy::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl GridConfig {
    /// Load config from environment variables (and `.env`).
    ///
    /// Unparsable values are ignored and leave the default in place.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Some(address) = non_empty("SEARCHGRID_ELASTIC_ADDRESS") {
            cfg.elastic_address = Some(address);
        }
        if let Some(secs) = parsed::<u64>("SEARCHGRID_CONNECT_RETRY_SECS") {
            cfg.connect_retry = Duration::from_secs(secs);
        }
        if let Some(n) = parsed("SEARCHGRID_CONNECT_MAX_ATTEMPTS") {
            cfg.connect_max_attempts = n;
        }
        if let Some(ms) = parsed::<u64>("SEARCHGRID_OPERATION_RETRY_MS") {
            cfg.operation_retry = Duration::from_millis(ms);
        }
        if let Some(n) = parsed("SEARCHGRID_OPERATION_MAX_ATTEMPTS") {
            cfg.operation_max_attempts = n;
        }
        if let Some(n) = parsed::<u32>("SEARCHGRID_QUERY_MAX_ATTEMPTS")
            && n > 0
        {
            cfg.query_max_attempts = n;
        }
        if let Some(m) = parsed::<f64>("SEARCHGRID_BACKOFF_MULTIPLIER")
            && m.is_finite()
            && m >= 1.0
        {
            cfg.backoff_multiplier = m;
        }
        if let Some(secs) = parsed::<u64>("SEARCHGRID_MAX_BACKOFF_SECS") {
            cfg.max_backoff = Duration::from_secs(secs);
        }
        if let Some(f) = parsed::<f64>("SEARCHGRID_THROTTLING_FACTOR")
            && f.is_finite()
            && f >= 0.0
        {
            cfg.throttling_factor = f;
        }
        if let Some(secs) = parsed::<u64>("SEARCHGRID_HTTP_TIMEOUT_SECS") {
            cfg.http_timeout = Duration::from_secs(secs);
        }
        if let Some(path) = non_empty("SEARCHGRID_STORE_PATH") {
            cfg.store_path = Some(PathBuf::from(path));
        }
        if let Some(peer) = non_empty("SEARCHGRID_TABLE_PEER") {
            cfg.table_peer = Some(peer);
        }

        cfg
    }

    fn policy(&self, delay: Duration, max_attempts: u32) -> RetryPolicy {
        let policy =
            RetryPolicy::fixed(delay).with_backoff(self.backoff_multiplier, self.max_backoff);
        match max_attempts {
            0 => policy.unbounded(),
            n => policy.with_max_attempts(n),
        }
    }

    pub fn connect_policy(&self) -> RetryPolicy {
        self.policy(self.connect_retry, self.connect_max_attempts)
    }

    pub fn operation_policy(&self) -> RetryPolicy {
        self.policy(self.operation_retry, self.operation_max_attempts)
    }

    pub fn query_policy(&self) -> RetryPolicy {
        self.policy(self.operation_retry, self.query_max_attempts)
    }

    pub fn index_settings(&self) -> IndexSettings {
        IndexSettings {
            connect_policy: self.connect_policy(),
            client: ClientOptions {
                operation_policy: self.operation_policy(),
                query_policy: self.query_policy(),
                throttling_factor: self.throttling_factor,
                ..ClientOptions::default()
            },
            clock: Arc::new(SystemClock::default()),
        }
    }
}
