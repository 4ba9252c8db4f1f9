//! Shared HTTP client pool keyed by provider name (spec §4.A).
//!
//! Providers that talk HTTP share one [`reqwest::Client`] per provider
//! name rather than building a fresh client (and fresh connection pool)
//! per request. Pooled clients are configured from [`HttpPoolConfig`] and
//! track request counters for observability.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
    time::Duration,
};

use reqwest::Client;

use crate::error::{AgentShError, Result};

/// Configuration for a pooled HTTP client.
#[derive(Debug, Clone)]
pub struct HttpPoolConfig {
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub max_connections: usize,
    pub keep_alive_count: usize,
    pub keep_alive_expiry: Duration,
    pub http2: bool,
    pub retry_count: u32,
}

impl Default for HttpPoolConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(30),
            max_connections: 32,
            keep_alive_count: 8,
            keep_alive_expiry: Duration::from_secs(90),
            http2: true,
            retry_count: 3,
        }
    }
}

/// Running counters for a pooled client.
#[derive(Debug, Default, Clone, Copy)]
pub struct PoolStats {
    pub requests_made: u64,
    pub requests_failed: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub total_latency: Duration,
}

impl PoolStats {
    /// Fraction of requests that did not fail, in `[0, 1]`. `1.0` when no
    /// requests have been made yet.
    pub fn success_rate(&self) -> f64 {
        if self.requests_made == 0 {
            return 1.0;
        }
        let succeeded = self.requests_made.saturating_sub(self.requests_failed);
        succeeded as f64 / self.requests_made as f64
    }

    /// Mean latency across all recorded requests. `Duration::ZERO` when no
    /// requests have been made yet.
    pub fn mean_latency(&self) -> Duration {
        if self.requests_made == 0 {
            return Duration::ZERO;
        }
        self.total_latency / self.requests_made as u32
    }
}

struct PooledEntry {
    client: Client,
    stats: PoolStats,
}

/// Process-wide pool of HTTP clients, one per provider name.
pub struct HttpClientPool {
    entries: RwLock<HashMap<String, PooledEntry>>,
    closed: std::sync::atomic::AtomicBool,
}

impl Default for HttpClientPool {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClientPool {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            closed: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Return the shared client for `provider`, building it with `config`
    /// on first use. Subsequent calls for the same provider name ignore
    /// `config` and return the already-built client.
    pub fn client_for(&self, provider: &str, config: &HttpPoolConfig) -> Result<Client> {
        if self.closed.load(std::sync::atomic::Ordering::Acquire) {
            return Err(AgentShError::Config("HTTP client pool is closed".into()));
        }

        {
            let entries = self.entries.read().map_err(|_| {
                AgentShError::Config("HTTP client pool lock poisoned".into())
            })?;
            if let Some(entry) = entries.get(provider) {
                return Ok(entry.client.clone());
            }
        }

        let mut builder = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_max_idle_per_host(config.keep_alive_count)
            .pool_idle_timeout(config.keep_alive_expiry);
        if !config.http2 {
            builder = builder.http1_only();
        }
        let client = builder
            .build()
            .map_err(|e| AgentShError::Config(format!("failed to build HTTP client: {e}")))?;

        let mut entries = self.entries.write().map_err(|_| {
            AgentShError::Config("HTTP client pool lock poisoned".into())
        })?;
        let entry = entries.entry(provider.to_owned()).or_insert(PooledEntry {
            client: client.clone(),
            stats: PoolStats::default(),
        });
        Ok(entry.client.clone())
    }

    /// Record the outcome of a request issued through the pool.
    pub fn record(
        &self,
        provider: &str,
        succeeded: bool,
        bytes_sent: u64,
        bytes_received: u64,
        latency: Duration,
    ) {
        if let Ok(mut entries) = self.entries.write() {
            let entry = entries.entry(provider.to_owned()).or_insert_with(|| PooledEntry {
                client: Client::new(),
                stats: PoolStats::default(),
            });
            entry.stats.requests_made += 1;
            if !succeeded {
                entry.stats.requests_failed += 1;
            }
            entry.stats.bytes_sent += bytes_sent;
            entry.stats.bytes_received += bytes_received;
            entry.stats.total_latency += latency;
        }
    }

    pub fn stats_for(&self, provider: &str) -> PoolStats {
        self.entries
            .read()
            .ok()
            .and_then(|entries| entries.get(provider).map(|e| e.stats))
            .unwrap_or_default()
    }

    /// Close the pool: further `client_for` calls fail. Existing clones of
    /// pooled clients continue to work until dropped.
    pub fn close(&self) {
        self.closed.store(true, std::sync::atomic::Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(std::sync::atomic::Ordering::Acquire)
    }
}

/// Process-wide singleton accessor, with a test-only setter.
static POOL: std::sync::OnceLock<Arc<HttpClientPool>> = std::sync::OnceLock::new();

pub fn global_pool() -> Arc<HttpClientPool> {
    POOL.get_or_init(|| Arc::new(HttpClientPool::new())).clone()
}

#[cfg(test)]
pub fn set_global_pool_for_test(pool: Arc<HttpClientPool>) {
    let _ = POOL.set(pool);
}
