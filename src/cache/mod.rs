//! Cache layer
//!
//! In-process caching of public post lookups and generated XML documents.
//! Keys are namespaced (`posts:`, `feeds:`) so a whole namespace can be
//! dropped with one glob pattern when content changes.
//!
//! ```rust,ignore
//! use ledgerpress::cache::{create_cache, CacheLayer};
//!
//! let cache = create_cache(&config.cache);
//! cache.set("posts:slug:q1", &post, cache.default_ttl()).await?;
//! ```

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::config::CacheConfig;

pub use memory::MemoryCache;

/// Key prefix for public post lookups and lists
pub const POSTS_PREFIX: &str = "posts:";
/// Key prefix for generated RSS and sitemap documents
pub const FEEDS_PREFIX: &str = "feeds:";

/// Cache layer trait
///
/// Generic methods make this trait not object safe; use the `Cache` enum
/// for runtime dispatch.
#[async_trait]
pub trait CacheLayer: Send + Sync {
    async fn get<T: DeserializeOwned + Send>(&self, key: &str) -> Result<Option<T>>;

    async fn set<T: Serialize + Send + Sync>(&self, key: &str, value: &T, ttl: Duration)
        -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Delete every key matching a glob pattern
    async fn delete_pattern(&self, pattern: &str) -> Result<()>;

    async fn clear(&self) -> Result<()>;
}

#[derive(Debug)]
pub enum Cache {
    Memory(MemoryCache),
}

impl Cache {
    pub fn default_ttl(&self) -> Duration {
        match self {
            Cache::Memory(cache) => cache.default_ttl(),
        }
    }

    /// Drop everything derived from posts and categories
    pub async fn invalidate_content(&self) -> Result<()> {
        self.delete_pattern(&format!("{}*", POSTS_PREFIX)).await?;
        self.delete_pattern(&format!("{}*", FEEDS_PREFIX)).await
    }
}

#[async_trait]
impl CacheLayer for Cache {
    async fn get<T: DeserializeOwned + Send>(&self, key: &str) -> Result<Option<T>> {
        match self {
            Cache::Memory(cache) => cache.get(key).await,
        }
    }

    async fn set<T: Serialize + Send + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<()> {
        match self {
            Cache::Memory(cache) => cache.set(key, value, ttl).await,
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        match self {
            Cache::Memory(cache) => cache.delete(key).await,
        }
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<()> {
        match self {
            Cache::Memory(cache) => cache.delete_pattern(pattern).await,
        }
    }

    async fn clear(&self) -> Result<()> {
        match self {
            Cache::Memory(cache) => cache.clear().await,
        }
    }
}

/// Create the cache described by `config`
pub fn create_cache(config: &CacheConfig) -> Arc<Cache> {
    let ttl = Duration::from_secs(config.ttl_seconds.max(1));
    Arc::new(Cache::Memory(MemoryCache::with_capacity_and_ttl(
        config.max_capacity,
        ttl,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_memory_cache() {
        let cache = create_cache(&CacheConfig::default());
        assert_eq!(cache.default_ttl(), Duration::from_secs(600));

        cache
            .set("test_key", &"test_value".to_string(), Duration::from_secs(60))
            .await
            .unwrap();
        let result: Option<String> = cache.get("test_key").await.unwrap();
        assert_eq!(result, Some("test_value".to_string()));
    }

    #[tokio::test]
    async fn test_invalidate_content_keeps_other_keys() {
        let cache = create_cache(&CacheConfig::default());
        let ttl = Duration::from_secs(60);
        cache.set("posts:slug:a", &1, ttl).await.unwrap();
        cache.set("feeds:rss", &2, ttl).await.unwrap();
        cache.set("site:info", &3, ttl).await.unwrap();

        cache.invalidate_content().await.unwrap();

        assert_eq!(cache.get::<i32>("posts:slug:a").await.unwrap(), None);
        assert_eq!(cache.get::<i32>("feeds:rss").await.unwrap(), None);
        assert_eq!(cache.get::<i32>("site:info").await.unwrap(), Some(3));
    }
}
