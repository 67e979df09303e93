//! 结果缓存模块：带容量上限与过期时间的 LRU 缓存，避免重复的上游调用。
//!
//! # Result Caching Module
//!
//! Bounded, expiring storage for analysis results so identical requests never
//! reach the upstream model twice within the TTL window.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`CacheManager`] | Typed front-end with TTL defaults, statistics and a sweeper |
//! | [`CacheConfig`] | Capacity, TTL and sweep configuration |
//! | [`CacheBackend`] | Trait for implementing custom cache backends |
//! | [`MemoryCache`] | In-memory LRU + TTL implementation |
//! | [`NullCache`] | No-op cache for disabling caching |
//! | [`CacheKey`] | Normalized `(text, language, mode)` key |
//!
//! ## Semantics
//!
//! - Reads refresh recency (true LRU, not insertion order)
//! - Expired entries read as absent and are dropped when observed
//! - Values are handed out as `Arc<V>`; callers cannot mutate cached state
//!
//! ## Example
//!
//! ```rust
//! use ai_analysis_runtime::cache::{CacheConfig, CacheKey, CacheManager};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let cache: CacheManager<String> = CacheManager::from_config(
//!     CacheConfig::new().with_max_entries(100).with_ttl(Duration::from_secs(60)),
//! );
//! let key = CacheKey::new("Explain  bubble sort", "EN", "general");
//! cache.set(key.clone(), Arc::new("cached".to_string())).await;
//! assert!(cache.get(&CacheKey::new("Explain bubble sort", "en", "general")).await.is_some());
//! # }
//! ```

mod backend;
mod key;
mod manager;

pub use backend::{CacheBackend, MemoryCache, NullCache};
pub use key::CacheKey;
pub use manager::{CacheConfig, CacheManager, CacheStats};

pub(crate) use key::normalize_text;
