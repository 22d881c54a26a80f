//! Named response caches.
//!
//! Each configured cache is an independent moka instance. Several backends may
//! share one cache by name; keys are prefixed with the backend name by the
//! handlers that use them.

use bytes::Bytes;
use moka::future::Cache as MokaCache;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Named cache instances, looked up by cache name
pub type CacheCollection = HashMap<String, Arc<Cache>>;

/// Cache configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheOptions {
    /// Maximum number of entries in the cache
    #[serde(default = "default_max_capacity")]
    pub max_capacity: u64,
    /// Time to live for cache entries in seconds
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            max_capacity: default_max_capacity(),
            ttl_secs: default_ttl_secs(),
        }
    }
}

fn default_max_capacity() -> u64 {
    1000
}

fn default_ttl_secs() -> u64 {
    60
}

/// Cached response data
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

/// Named response cache using moka
pub struct Cache {
    name: String,
    options: CacheOptions,
    inner: MokaCache<String, CachedResponse>,
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("name", &self.name)
            .field("options", &self.options)
            .finish()
    }
}

impl Cache {
    /// Create a new response cache
    pub fn new(name: &str, options: CacheOptions) -> Self {
        let inner = MokaCache::builder()
            .max_capacity(options.max_capacity)
            .time_to_live(Duration::from_secs(options.ttl_secs))
            .build();

        Self {
            name: name.to_string(),
            options,
            inner,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &CacheOptions {
        &self.options
    }

    /// Get a cached response
    pub async fn get(&self, key: &str) -> Option<CachedResponse> {
        self.inner.get(key).await
    }

    /// Store a response in the cache
    pub async fn put(&self, key: String, response: CachedResponse) {
        self.inner.insert(key, response).await;
    }
}

/// Build every configured cache
pub fn build_caches(options: &HashMap<String, CacheOptions>) -> CacheCollection {
    options
        .iter()
        .map(|(name, cache_options)| {
            info!(
                cache = %name,
                max_capacity = cache_options.max_capacity,
                ttl_secs = cache_options.ttl_secs,
                "Initialized cache"
            );
            (name.clone(), Arc::new(Cache::new(name, cache_options.clone())))
        })
        .collect()
}
