//! Process-local cache backend: entries live in a map guarded by a
//! reader-writer lock, so concurrent reads never block each other and a
//! single lock around `put` keeps writes serialized.

use std::collections::HashMap;
use std::sync::RwLock;

use super::{CacheError, CacheKey, CachedResponse, ResponseCache};

#[derive(Default)]
struct Entries {
    map: HashMap<CacheKey, CachedResponse>,
    /// Running total of `CachedResponse::estimated_size()` for every stored
    /// value, kept up to date on every `put` so `byte_size` is O(1).
    byte_total: u64,
}

/// In-memory [`ResponseCache`]. Grows unbounded for the process lifetime;
/// no eviction policy.
pub struct MemoryCache {
    entries: RwLock<Entries>,
}

impl MemoryCache {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Entries::default()),
        }
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ResponseCache for MemoryCache {
    async fn contains(&self, key: &CacheKey) -> Result<bool, CacheError> {
        let entries = self.entries.read().expect("cache lock poisoned");
        Ok(entries.map.contains_key(key))
    }

    async fn get(&self, key: &CacheKey) -> Result<CachedResponse, CacheError> {
        let entries = self.entries.read().expect("cache lock poisoned");
        entries.map.get(key).cloned().ok_or(CacheError::NotFound)
    }

    async fn put(&self, key: CacheKey, value: CachedResponse) -> Result<(), CacheError> {
        let mut entries = self.entries.write().expect("cache lock poisoned");
        let size = value.estimated_size() as u64;
        if let Some(previous) = entries.map.insert(key, value) {
            entries.byte_total -= previous.estimated_size() as u64;
        }
        entries.byte_total += size;
        Ok(())
    }

    async fn iterate(&self) -> Result<Vec<CacheKey>, CacheError> {
        let entries = self.entries.read().expect("cache lock poisoned");
        Ok(entries.map.keys().cloned().collect())
    }

    async fn len(&self) -> Result<u64, CacheError> {
        let entries = self.entries.read().expect("cache lock poisoned");
        Ok(entries.map.len() as u64)
    }

    async fn byte_size(&self) -> Result<u64, CacheError> {
        let entries = self.entries.read().expect("cache lock poisoned");
        Ok(entries.byte_total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(status: u16) -> CachedResponse {
        let mut headers = HashMap::new();
        headers.insert("ETag".to_string(), "\"abc\"".to_string());
        CachedResponse::new(status, headers, b"{}".to_vec())
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let cache = MemoryCache::new();
        let key = CacheKey::new("https://api.github.com/user", None);
        cache.put(key.clone(), sample(200)).await.unwrap();
        assert!(cache.contains(&key).await.unwrap());
        let got = cache.get(&key).await.unwrap();
        assert_eq!(got.status, 200);
    }

    #[tokio::test]
    async fn get_missing_key_is_not_found() {
        let cache = MemoryCache::new();
        let key = CacheKey::new("https://api.github.com/user", None);
        assert!(matches!(cache.get(&key).await, Err(CacheError::NotFound)));
    }

    #[tokio::test]
    async fn byte_size_accounts_for_overwrites() {
        let cache = MemoryCache::new();
        let key = CacheKey::new("https://api.github.com/user", None);
        cache.put(key.clone(), sample(200)).await.unwrap();
        let first_size = cache.byte_size().await.unwrap();
        cache.put(key.clone(), sample(200)).await.unwrap();
        let second_size = cache.byte_size().await.unwrap();
        assert_eq!(first_size, second_size);
        assert_eq!(cache.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn iterate_yields_every_stored_key() {
        let cache = MemoryCache::new();
        let a = CacheKey::new("https://api.github.com/a", None);
        let b = CacheKey::new("https://api.github.com/b", Some("token x"));
        cache.put(a.clone(), sample(200)).await.unwrap();
        cache.put(b.clone(), sample(200)).await.unwrap();
        let mut keys = cache.iterate().await.unwrap();
        keys.sort_by(|a, b| a.url.cmp(&b.url));
        assert_eq!(keys, {
            let mut expected = vec![a, b];
            expected.sort_by(|a, b| a.url.cmp(&b.url));
            expected
        });
    }
}
