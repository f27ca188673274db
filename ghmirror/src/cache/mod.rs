//! The response cache: a keyed store mapping a `(url, caller fingerprint)`
//! pair to a captured upstream response. Two interchangeable backends are
//! provided — [`memory`] (process-local) and [`redis`] (a remote key-value
//! store) — both implementing [`ResponseCache`].

pub mod memory;
pub mod redis;

use std::collections::HashMap;

use displaydoc::Display;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::sync::OnceLock;
use thiserror::Error;

use crate::config::{CacheType, Config};

#[derive(Debug, Error, Display)]
pub enum CacheError {
    /// requested key was not found in the cache
    NotFound,
    /// error talking to the redis backend: {0}
    Redis(#[from] ::redis::RedisError),
    /// error checking out a pooled redis connection: {0}
    Pool(#[from] r2d2::Error),
    /// failed to (de)serialize a cache entry: {0}
    Codec(#[from] bincode::Error),
}

/// Identifies one cache slot. Two requests for the same URL under different
/// callers (or one anonymous, one authorized) never share an entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub url: String,
    /// SHA-1 hex digest of the raw `Authorization` header value, or `None`
    /// for an anonymous request.
    pub fingerprint: Option<String>,
}

impl CacheKey {
    #[must_use]
    pub fn new(url: impl Into<String>, authorization: Option<&str>) -> Self {
        Self {
            url: url.into(),
            fingerprint: authorization.map(fingerprint_of),
        }
    }
}

/// Hashes a raw secret (an `Authorization` header value) down to a
/// fingerprint suitable for use as a cache or allow-list key, so the secret
/// itself is never retained in memory longer than the call that produced it.
#[must_use]
pub fn fingerprint_of(secret: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// The captured upstream response, stored as a value object. Immutable once
/// written: the engine's `X-Cache` stamping produces a logical view, never a
/// new store write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedResponse {
    pub status: u16,
    /// Case-insensitively meaningful, but stored as given; lookups go
    /// through [`CachedResponse::header`].
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,

    #[serde(skip, default)]
    json_view: OnceLock<Option<serde_json::Value>>,
}

impl CachedResponse {
    #[must_use]
    pub fn new(status: u16, headers: HashMap<String, String>, body: Vec<u8>) -> Self {
        Self {
            status,
            headers,
            body,
            json_view: OnceLock::new(),
        }
    }

    /// Case-insensitive header lookup.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// True only when this response is eligible for caching per the
    /// invariant: status 200 and at least one of `ETag`/`Last-Modified`.
    #[must_use]
    pub fn is_cacheable(&self) -> bool {
        self.status == 200
            && (self.header("ETag").is_some() || self.header("Last-Modified").is_some())
    }

    /// Lazily-parsed JSON view of the body. `None` if the body isn't valid
    /// JSON; computed at most once per value.
    #[must_use]
    pub fn json(&self) -> Option<&serde_json::Value> {
        self.json_view
            .get_or_init(|| serde_json::from_slice(&self.body).ok())
            .as_ref()
    }

    /// `Link` header, parsed into its named relations (RFC 5988), e.g.
    /// `next`, `prev`, `last`.
    #[must_use]
    pub fn links(&self) -> HashMap<String, String> {
        self.header("Link").map(parse_link_header).unwrap_or_default()
    }

    /// Rough serialized size in bytes, used for the in-process backend's
    /// byte-size accounting. Uses the same portable binary serialization
    /// (`bincode`) as the redis backend's wire encoding, so the estimate
    /// reflects what would actually cross the wire if the backend were
    /// switched.
    #[must_use]
    pub fn estimated_size(&self) -> usize {
        bincode::serialize(self).map(|bytes| bytes.len()).unwrap_or(0)
    }
}

fn link_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"<([^>]+)>\s*;\s*rel="([^"]+)""#).expect("link header regex is valid")
    })
}

/// Parses an RFC 5988 `Link` header into a `rel -> url` mapping.
#[must_use]
pub fn parse_link_header(header: &str) -> HashMap<String, String> {
    link_regex()
        .captures_iter(header)
        .map(|caps| (caps[2].to_string(), caps[1].to_string()))
        .collect()
}

/// Shared contract for both cache backends: membership test, get, put,
/// iteration, length, and size-in-bytes.
#[async_trait::async_trait]
pub trait ResponseCache: Send + Sync {
    async fn contains(&self, key: &CacheKey) -> Result<bool, CacheError>;
    async fn get(&self, key: &CacheKey) -> Result<CachedResponse, CacheError>;
    async fn put(&self, key: CacheKey, value: CachedResponse) -> Result<(), CacheError>;
    async fn iterate(&self) -> Result<Vec<CacheKey>, CacheError>;
    async fn len(&self) -> Result<u64, CacheError>;
    async fn byte_size(&self) -> Result<u64, CacheError>;
}

/// The selected backend, chosen once at startup from [`CacheType`].
pub enum CacheBackend {
    Memory(memory::MemoryCache),
    Redis(redis::RedisCache),
}

impl CacheBackend {
    pub fn new(config: &Config) -> Result<Self, crate::error::init::InitError> {
        match config.cache_type {
            CacheType::InMemory => Ok(Self::Memory(memory::MemoryCache::new())),
            CacheType::Redis => {
                let redis_config = config
                    .redis
                    .as_ref()
                    .expect("redis config is present when cache_type is redis");
                Ok(Self::Redis(redis::RedisCache::connect(redis_config)?))
            }
        }
    }
}

#[async_trait::async_trait]
impl ResponseCache for CacheBackend {
    async fn contains(&self, key: &CacheKey) -> Result<bool, CacheError> {
        match self {
            Self::Memory(cache) => cache.contains(key).await,
            Self::Redis(cache) => cache.contains(key).await,
        }
    }

    async fn get(&self, key: &CacheKey) -> Result<CachedResponse, CacheError> {
        match self {
            Self::Memory(cache) => cache.get(key).await,
            Self::Redis(cache) => cache.get(key).await,
        }
    }

    async fn put(&self, key: CacheKey, value: CachedResponse) -> Result<(), CacheError> {
        match self {
            Self::Memory(cache) => cache.put(key, value).await,
            Self::Redis(cache) => cache.put(key, value).await,
        }
    }

    async fn iterate(&self) -> Result<Vec<CacheKey>, CacheError> {
        match self {
            Self::Memory(cache) => cache.iterate().await,
            Self::Redis(cache) => cache.iterate().await,
        }
    }

    async fn len(&self) -> Result<u64, CacheError> {
        match self {
            Self::Memory(cache) => cache.len().await,
            Self::Redis(cache) => cache.len().await,
        }
    }

    async fn byte_size(&self) -> Result<u64, CacheError> {
        match self {
            Self::Memory(cache) => cache.byte_size().await,
            Self::Redis(cache) => cache.byte_size().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_stable_and_does_not_retain_secret() {
        let a = fingerprint_of("token A");
        let b = fingerprint_of("token A");
        let c = fingerprint_of("token B");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 40);
    }

    #[test]
    fn anonymous_and_authorized_keys_differ() {
        let anon = CacheKey::new("https://api.github.com/user", None);
        let auth = CacheKey::new("https://api.github.com/user", Some("token abc"));
        assert_ne!(anon, auth);
    }

    #[test]
    fn parses_multiple_link_relations() {
        let header = r#"<https://api.github.com/resource?page=2>; rel="next", <https://api.github.com/resource?page=5>; rel="last""#;
        let links = parse_link_header(header);
        assert_eq!(
            links.get("next").map(String::as_str),
            Some("https://api.github.com/resource?page=2")
        );
        assert_eq!(
            links.get("last").map(String::as_str),
            Some("https://api.github.com/resource?page=5")
        );
    }

    #[test]
    fn cacheable_requires_200_and_validator_header() {
        let mut headers = HashMap::new();
        headers.insert("ETag".to_string(), "\"abc\"".to_string());
        let cacheable = CachedResponse::new(200, headers.clone(), b"{}".to_vec());
        assert!(cacheable.is_cacheable());

        let not_200 = CachedResponse::new(404, headers, b"{}".to_vec());
        assert!(!not_200.is_cacheable());

        let no_validator = CachedResponse::new(200, HashMap::new(), b"{}".to_vec());
        assert!(!no_validator.is_cacheable());
    }

    #[test]
    fn json_view_parses_once_and_caches() {
        let response = CachedResponse::new(200, HashMap::new(), br#"{"login":"octocat"}"#.to_vec());
        let first = response.json().cloned();
        let second = response.json().cloned();
        assert_eq!(first, second);
        assert_eq!(first.unwrap()["login"], "octocat");
    }
}
