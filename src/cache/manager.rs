//! Cache manager.

use super::backend::{CacheBackend, MemoryCache, NullCache};
use super::key::CacheKey;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_entries: usize,
    /// Default entry lifetime in seconds; 0 disables expiry.
    pub default_ttl_secs: u64,
    /// Background sweep period in seconds; 0 disables the sweeper.
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 1000,
            default_ttl_secs: 3600,
            sweep_interval_secs: 300,
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl_secs = ttl.as_secs();
        self
    }
    pub fn default_ttl(&self) -> Option<Duration> {
        (self.default_ttl_secs > 0).then(|| Duration::from_secs(self.default_ttl_secs))
    }
    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_secs > 0).then(|| Duration::from_secs(self.sweep_interval_secs))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub ttl_seconds: u64,
    pub max_entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub evictions: u64,
    pub errors: u64,
    pub backend: &'static str,
}

impl CacheStats {
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Default)]
struct AtomicStats {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    evictions: AtomicU64,
    errors: AtomicU64,
}

/// Typed cache front-end: TTL defaults, enable switch and counters over a backend.
pub struct CacheManager<V> {
    config: CacheConfig,
    backend: Box<dyn CacheBackend<V>>,
    stats: AtomicStats,
}

impl<V> CacheManager<V>
where
    V: Send + Sync + 'static,
{
    pub fn new(config: CacheConfig, backend: Box<dyn CacheBackend<V>>) -> Self {
        Self {
            config,
            backend,
            stats: AtomicStats::default(),
        }
    }

    /// In-memory LRU when enabled, no-op otherwise.
    pub fn from_config(config: CacheConfig) -> Self {
        let backend: Box<dyn CacheBackend<V>> = if config.enabled {
            Box::new(MemoryCache::new(config.max_entries))
        } else {
            Box::new(NullCache::new())
        };
        Self::new(config, backend)
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub async fn get(&self, key: &CacheKey) -> Option<Arc<V>> {
        if !self.config.enabled {
            return None;
        }
        match self.backend.get(key).await {
            Ok(Some(v)) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "cache hit");
                Some(v)
            }
            Ok(None) => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "cache miss");
                None
            }
            Err(e) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                warn!(key = %key, error = %e, "cache read failed, treating as miss");
                None
            }
        }
    }

    /// Second lookup for a key whose miss was already counted; only a hit is recorded.
    pub async fn recheck(&self, key: &CacheKey) -> Option<Arc<V>> {
        if !self.config.enabled {
            return None;
        }
        match self.backend.get(key).await {
            Ok(Some(v)) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "cache hit on recheck");
                Some(v)
            }
            Ok(None) => None,
            Err(e) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                warn!(key = %key, error = %e, "cache recheck failed, treating as miss");
                None
            }
        }
    }

    pub async fn set(&self, key: CacheKey, value: Arc<V>) {
        let ttl = self.config.default_ttl();
        self.set_with_ttl(key, value, ttl).await
    }

    /// `ttl = None` stores without expiry.
    pub async fn set_with_ttl(&self, key: CacheKey, value: Arc<V>, ttl: Option<Duration>) {
        if !self.config.enabled {
            return;
        }
        let shown = key.to_string();
        match self.backend.set(key, value, ttl).await {
            Ok(evicted) => {
                self.stats.sets.fetch_add(1, Ordering::Relaxed);
                if let Some(old) = evicted {
                    self.stats.evictions.fetch_add(1, Ordering::Relaxed);
                    debug!(key = %shown, evicted = %old, "cache evicted least recently used entry");
                }
            }
            Err(e) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                warn!(key = %shown, error = %e, "cache write failed");
            }
        }
    }

    pub async fn delete(&self, key: &CacheKey) -> bool {
        self.backend.delete(key).await.unwrap_or(false)
    }

    pub async fn clear(&self) {
        if let Err(e) = self.backend.clear().await {
            warn!(error = %e, "cache clear failed");
        }
    }

    pub async fn purge_expired(&self) -> usize {
        match self.backend.purge_expired().await {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "cache purge failed");
                0
            }
        }
    }

    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.backend.len().await.unwrap_or(0),
            ttl_seconds: self.config.default_ttl_secs,
            max_entries: self.backend.capacity(),
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            sets: self.stats.sets.load(Ordering::Relaxed),
            evictions: self.stats.evictions.load(Ordering::Relaxed),
            errors: self.stats.errors.load(Ordering::Relaxed),
            backend: self.backend.name(),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Periodically drop expired entries until `shutdown` fires.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = cache.purge_expired().await;
                        if removed > 0 {
                            info!(removed, "cache sweeper dropped expired entries");
                        }
                    }
                }
            }
            debug!("cache sweeper stopped");
        })
    }
}
