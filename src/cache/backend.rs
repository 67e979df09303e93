//! Cache backend implementations.

use super::key::CacheKey;
use crate::Result;
use async_trait::async_trait;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

struct CacheEntry<V> {
    value: Arc<V>,
    inserted_at: Instant,
    expires_at: Option<Instant>,
}

impl<V> CacheEntry<V> {
    fn new(value: Arc<V>, ttl: Option<Duration>) -> Self {
        let now = Instant::now();
        Self {
            value,
            inserted_at: now,
            expires_at: ttl.map(|t| now + t),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map(|at| now >= at).unwrap_or(false)
    }
}

#[async_trait]
pub trait CacheBackend<V>: Send + Sync
where
    V: Send + Sync + 'static,
{
    async fn get(&self, key: &CacheKey) -> Result<Option<Arc<V>>>;
    /// Insert or replace; returns the key evicted to make room, if any.
    async fn set(&self, key: CacheKey, value: Arc<V>, ttl: Option<Duration>) -> Result<Option<CacheKey>>;
    async fn delete(&self, key: &CacheKey) -> Result<bool>;
    async fn clear(&self) -> Result<()>;
    /// Number of live (non-expired) entries.
    async fn len(&self) -> Result<usize>;
    /// Remove every expired entry, returning how many were dropped.
    async fn purge_expired(&self) -> Result<usize>;
    fn capacity(&self) -> usize;
    fn name(&self) -> &'static str;
}

/// In-memory LRU cache with per-entry expiry.
///
/// One mutex guards the recency list and the map together; every operation
/// except `len` and `purge_expired` is O(1) under the lock.
pub struct MemoryCache<V> {
    entries: Mutex<LruCache<CacheKey, CacheEntry<V>>>,
    max_entries: usize,
}

impl<V> MemoryCache<V> {
    pub fn new(max_entries: usize) -> Self {
        let cap = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(cap)),
            max_entries: cap.get(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<CacheKey, CacheEntry<V>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Age of an entry, if present (expired or not). Does not touch recency.
    pub fn entry_age(&self, key: &CacheKey) -> Option<Duration> {
        self.lock().peek(key).map(|e| e.inserted_at.elapsed())
    }
}

#[async_trait]
impl<V> CacheBackend<V> for MemoryCache<V>
where
    V: Send + Sync + 'static,
{
    async fn get(&self, key: &CacheKey) -> Result<Option<Arc<V>>> {
        let now = Instant::now();
        let mut entries = self.lock();
        match entries.get(key) {
            None => return Ok(None),
            Some(entry) if !entry.is_expired(now) => return Ok(Some(Arc::clone(&entry.value))),
            Some(_) => {}
        }
        entries.pop(key);
        Ok(None)
    }

    async fn set(&self, key: CacheKey, value: Arc<V>, ttl: Option<Duration>) -> Result<Option<CacheKey>> {
        let inserted = key.clone();
        let mut entries = self.lock();
        let displaced = entries.push(key, CacheEntry::new(value, ttl));
        Ok(displaced.and_then(|(old_key, _)| (old_key != inserted).then_some(old_key)))
    }

    async fn delete(&self, key: &CacheKey) -> Result<bool> {
        Ok(self.lock().pop(key).is_some())
    }

    async fn clear(&self) -> Result<()> {
        self.lock().clear();
        Ok(())
    }

    async fn len(&self) -> Result<usize> {
        let now = Instant::now();
        Ok(self.lock().iter().filter(|(_, e)| !e.is_expired(now)).count())
    }

    async fn purge_expired(&self) -> Result<usize> {
        let now = Instant::now();
        let mut entries = self.lock();
        let expired: Vec<CacheKey> = entries
            .iter()
            .filter(|(_, e)| e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            entries.pop(key);
        }
        Ok(expired.len())
    }

    fn capacity(&self) -> usize {
        self.max_entries
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// No-op backend used when caching is disabled.
pub struct NullCache;

impl NullCache {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NullCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<V> CacheBackend<V> for NullCache
where
    V: Send + Sync + 'static,
{
    async fn get(&self, _: &CacheKey) -> Result<Option<Arc<V>>> {
        Ok(None)
    }
    async fn set(&self, _: CacheKey, _: Arc<V>, _: Option<Duration>) -> Result<Option<CacheKey>> {
        Ok(None)
    }
    async fn delete(&self, _: &CacheKey) -> Result<bool> {
        Ok(false)
    }
    async fn clear(&self) -> Result<()> {
        Ok(())
    }
    async fn len(&self) -> Result<usize> {
        Ok(0)
    }
    async fn purge_expired(&self) -> Result<usize> {
        Ok(0)
    }
    fn capacity(&self) -> usize {
        0
    }
    fn name(&self) -> &'static str {
        "null"
    }
}
