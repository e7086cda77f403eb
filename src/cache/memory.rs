//! In-memory cache implementation using moka
//!
//! Values are stored as JSON so any serializable type can be cached. Each
//! entry carries its own deadline; the moka-level TTL is the upper bound.

use super::CacheLayer;
use anyhow::{Context, Result};
use async_trait::async_trait;
use moka::future::Cache;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

const DEFAULT_MAX_CAPACITY: u64 = 10_000;
const DEFAULT_TTL: Duration = Duration::from_secs(600);

#[derive(Clone)]
struct CacheEntry {
    data: Arc<String>,
    expires_at: Instant,
}

impl CacheEntry {
    fn new<T: Serialize>(value: &T, ttl: Duration) -> Result<Self> {
        let json = serde_json::to_string(value).context("Failed to serialize cache value")?;
        Ok(Self {
            data: Arc::new(json),
            expires_at: Instant::now() + ttl,
        })
    }

    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    fn deserialize<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(&self.data).context("Failed to deserialize cache value")
    }
}

/// In-memory cache using moka
pub struct MemoryCache {
    cache: Cache<String, CacheEntry>,
    default_ttl: Duration,
}

impl std::fmt::Debug for MemoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCache")
            .field("entry_count", &self.cache.entry_count())
            .field("default_ttl", &self.default_ttl)
            .finish()
    }
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::with_capacity_and_ttl(DEFAULT_MAX_CAPACITY, DEFAULT_TTL)
    }

    /// `default_ttl` caps the lifetime of every entry
    pub fn with_capacity_and_ttl(max_capacity: u64, default_ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(default_ttl)
            .build();

        Self { cache, default_ttl }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    /// Glob-style match: `*` is any run of characters, `?` exactly one.
    ///
    /// `posts:*` matches `posts:slug:q1-deadlines`.
    fn pattern_matches(pattern: &str, key: &str) -> bool {
        let pattern: Vec<char> = pattern.chars().collect();
        let key: Vec<char> = key.chars().collect();

        // Iterative matcher with single-star backtracking
        let (mut p, mut k) = (0usize, 0usize);
        let mut star: Option<(usize, usize)> = None;
        while k < key.len() {
            if p < pattern.len() && (pattern[p] == '?' || pattern[p] == key[k]) {
                p += 1;
                k += 1;
            } else if p < pattern.len() && pattern[p] == '*' {
                star = Some((p, k));
                p += 1;
            } else if let Some((sp, sk)) = star {
                p = sp + 1;
                k = sk + 1;
                star = Some((sp, sk + 1));
            } else {
                return false;
            }
        }
        while p < pattern.len() && pattern[p] == '*' {
            p += 1;
        }
        p == pattern.len()
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheLayer for MemoryCache {
    async fn get<T: DeserializeOwned + Send>(&self, key: &str) -> Result<Option<T>> {
        match self.cache.get(key).await {
            Some(entry) if entry.is_expired() => {
                self.cache.invalidate(key).await;
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.deserialize()?)),
            None => Ok(None),
        }
    }

    async fn set<T: Serialize + Send + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<()> {
        let entry = CacheEntry::new(value, ttl.min(self.default_ttl))?;
        self.cache.insert(key.to_string(), entry).await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.cache.invalidate(key).await;
        Ok(())
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<()> {
        // Full scan; the cache holds at most a few thousand entries
        let keys: Vec<String> = self
            .cache
            .iter()
            .filter(|(key, _)| Self::pattern_matches(pattern, key.as_ref()))
            .map(|(key, _)| (*key).clone())
            .collect();

        for key in keys {
            self.cache.invalidate(&key).await;
        }
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[tokio::test]
    async fn test_set_and_get() {
        let cache = MemoryCache::new();
        cache
            .set("site:info", &"Ledgerpress".to_string(), Duration::from_secs(60))
            .await
            .unwrap();

        let result: Option<String> = cache.get("site:info").await.unwrap();
        assert_eq!(result, Some("Ledgerpress".to_string()));
    }

    #[tokio::test]
    async fn test_struct_values() {
        #[derive(Serialize, Deserialize, PartialEq, Debug)]
        struct Summary {
            slug: String,
            views: u32,
        }

        let cache = MemoryCache::new();
        let value = Summary {
            slug: "q1".into(),
            views: 3,
        };
        cache.set("posts:slug:q1", &value, Duration::from_secs(60)).await.unwrap();

        let got: Option<Summary> = cache.get("posts:slug:q1").await.unwrap();
        assert_eq!(got, Some(value));
    }

    #[tokio::test]
    async fn test_per_entry_ttl() {
        let cache = MemoryCache::with_capacity_and_ttl(100, Duration::from_secs(60));
        cache.set("short", &1u8, Duration::from_millis(10)).await.unwrap();
        cache.set("long", &2u8, Duration::from_secs(60)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(cache.get::<u8>("short").await.unwrap(), None);
        assert_eq!(cache.get::<u8>("long").await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn test_delete_pattern() {
        let cache = MemoryCache::new();
        let ttl = Duration::from_secs(60);
        cache.set("posts:slug:a", &1, ttl).await.unwrap();
        cache.set("posts:list:1", &2, ttl).await.unwrap();
        cache.set("feed:rss", &3, ttl).await.unwrap();

        cache.delete_pattern("posts:*").await.unwrap();

        assert_eq!(cache.get::<i32>("posts:slug:a").await.unwrap(), None);
        assert_eq!(cache.get::<i32>("posts:list:1").await.unwrap(), None);
        assert_eq!(cache.get::<i32>("feed:rss").await.unwrap(), Some(3));
    }

    #[tokio::test]
    async fn test_clear() {
        let cache = MemoryCache::new();
        cache.set("a", &1, Duration::from_secs(60)).await.unwrap();
        cache.clear().await.unwrap();
        assert_eq!(cache.get::<i32>("a").await.unwrap(), None);
    }

    #[test]
    fn test_pattern_matches() {
        assert!(MemoryCache::pattern_matches("posts:*", "posts:slug:x"));
        assert!(MemoryCache::pattern_matches("*", ""));
        assert!(MemoryCache::pattern_matches("user:?:profile", "user:1:profile"));
        assert!(MemoryCache::pattern_matches("a*b*c", "axxbyyc"));
        assert!(!MemoryCache::pattern_matches("posts:*", "feed:rss"));
        assert!(!MemoryCache::pattern_matches("a?c", "ac"));
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(50))]

            #[test]
            fn star_suffix_matches_any_extension(prefix in "[a-z:]{0,10}", rest in "[a-z0-9:-]{0,20}") {
                let pattern = format!("{}*", prefix);
                let key = format!("{}{}", prefix, rest);
                prop_assert!(MemoryCache::pattern_matches(&pattern, &key));
            }

            #[test]
            fn literal_pattern_matches_only_itself(a in "[a-z]{1,10}", b in "[a-z]{1,10}") {
                prop_assert_eq!(MemoryCache::pattern_matches(&a, &b), a == b);
            }
        }
    }
}
