//! The conditional request engine: the heart of the mirror. Consumes a
//! proxied request plus the health flag and cache, and returns a response
//! together with the [`CacheStatusTag`] that explains where it came from.

pub mod tag;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::{Method, StatusCode};

use crate::cache::{CacheBackend, CacheKey, CachedResponse, ResponseCache};
use crate::config::DEFAULT_PER_PAGE;
use crate::error::api::ApiError;

pub use tag::CacheStatusTag;

const RATE_LIMIT_MARKERS: [&str; 3] = [
    "API rate limit exceeded",
    "secondary rate limit",
    "abuse detection mechanism",
];

const GATEWAY_TIMEOUT_BODY: &[u8] = br#"{"message":"gateway timeout"}"#;

/// A request the engine is asked to mediate, already stripped of routing
/// concerns by the caller.
#[derive(Debug, Clone)]
pub struct EngineRequest {
    pub method: Method,
    /// Full upstream URL, including query string.
    pub url: url::Url,
    pub authorization: Option<String>,
    pub body: Bytes,
}

/// What the engine decided to send back to the client.
#[derive(Debug, Clone)]
pub struct EngineResponse {
    pub status: StatusCode,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
    pub tag: CacheStatusTag,
}

impl EngineResponse {
    fn from_cached(cached: CachedResponse, tag: CacheStatusTag) -> Self {
        Self {
            status: StatusCode::from_u16(cached.status).unwrap_or(StatusCode::OK),
            headers: cached.headers.clone(),
            body: Bytes::from(cached.body.clone()),
            tag,
        }
    }

    fn gateway_timeout(tag: CacheStatusTag) -> Self {
        Self {
            status: StatusCode::GATEWAY_TIMEOUT,
            headers: HashMap::new(),
            body: Bytes::from_static(GATEWAY_TIMEOUT_BODY),
            tag,
        }
    }
}

/// An upstream response with its headers already captured into an owned
/// map, so the body can be consumed without losing them.
struct UpstreamResponse {
    status: StatusCode,
    headers: HashMap<String, String>,
    body: Bytes,
}

impl UpstreamResponse {
    async fn capture(response: reqwest::Response, url: &url::Url) -> Result<Self, ApiError> {
        let status = response.status();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value.to_str().ok().map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await.map_err(|source| upstream_error(url, source))?;
        Ok(Self { status, headers, body })
    }

    fn into_engine_response(self, tag: CacheStatusTag) -> EngineResponse {
        EngineResponse {
            status: self.status,
            headers: self.headers,
            body: self.body,
            tag,
        }
    }
}

pub struct ConditionalRequestEngine {
    client: reqwest::Client,
    cache: Arc<CacheBackend>,
    online: Arc<AtomicBool>,
    timeout: Duration,
}

impl ConditionalRequestEngine {
    #[must_use]
    pub fn new(
        client: reqwest::Client,
        cache: Arc<CacheBackend>,
        online: Arc<AtomicBool>,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            cache,
            online,
            timeout,
        }
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Relaxed)
    }

    pub async fn handle(&self, mut request: EngineRequest) -> Result<EngineResponse, ApiError> {
        inject_default_per_page(&mut request.url);
        let fingerprint = request.authorization.as_deref().map(crate::cache::fingerprint_of);
        let key = CacheKey {
            url: request.url.to_string(),
            fingerprint,
        };

        if request.method != Method::GET {
            return self.handle_non_get(&request).await;
        }

        if !self.is_online() {
            return self.handle_offline_get(&key).await;
        }

        self.handle_online_get(&request, &key).await
    }

    async fn handle_non_get(&self, request: &EngineRequest) -> Result<EngineResponse, ApiError> {
        if !self.is_online() {
            return Ok(EngineResponse::gateway_timeout(CacheStatusTag::OfflineMiss));
        }
        let response = self
            .send(
                request.method.clone(),
                &request.url,
                request.authorization.as_deref(),
                &HashMap::new(),
                Some(request.body.clone()),
            )
            .await
            .map_err(|source| upstream_error(&request.url, source))?;
        let upstream = UpstreamResponse::capture(response, &request.url).await?;
        Ok(upstream.into_engine_response(CacheStatusTag::OnlineMiss))
    }

    async fn handle_offline_get(&self, key: &CacheKey) -> Result<EngineResponse, ApiError> {
        match self.cache.get(key).await {
            Ok(cached) => Ok(EngineResponse::from_cached(cached, CacheStatusTag::OfflineHit)),
            Err(crate::cache::CacheError::NotFound) => {
                Ok(EngineResponse::gateway_timeout(CacheStatusTag::OfflineMiss))
            }
            Err(other) => Err(ApiError::Cache(other)),
        }
    }

    async fn handle_online_get(
        &self,
        request: &EngineRequest,
        key: &CacheKey,
    ) -> Result<EngineResponse, ApiError> {
        let cached = self.cache.get(key).await.ok();
        let conditional_headers = cached.as_ref().map(conditional_headers_for).unwrap_or_default();

        let outcome = self
            .send(
                Method::GET,
                &request.url,
                request.authorization.as_deref(),
                &conditional_headers,
                None,
            )
            .await;

        let response = match outcome {
            Ok(response) => response,
            Err(source) if source.is_timeout() => {
                return match cached {
                    Some(cached) => {
                        Ok(EngineResponse::from_cached(cached, CacheStatusTag::ApiTimeoutHit))
                    }
                    None => Err(upstream_error(&request.url, source)),
                };
            }
            Err(source) if source.is_connect() => {
                return match cached {
                    Some(cached) => Ok(EngineResponse::from_cached(
                        cached,
                        CacheStatusTag::ApiConnectionErrorHit,
                    )),
                    None => Err(upstream_error(&request.url, source)),
                };
            }
            Err(source) => return Err(upstream_error(&request.url, source)),
        };

        if response.status() == StatusCode::NOT_MODIFIED {
            return self.handle_not_modified(request, key, cached).await;
        }

        let upstream = UpstreamResponse::capture(response, &request.url).await?;

        if upstream.status == StatusCode::FORBIDDEN && is_rate_limited(&upstream.body) {
            return Ok(match cached {
                Some(cached) => {
                    EngineResponse::from_cached(cached, CacheStatusTag::RateLimitedHit)
                }
                None => upstream.into_engine_response(CacheStatusTag::RateLimitedMiss),
            });
        }

        if upstream.status.is_server_error() {
            return Ok(match cached {
                Some(cached) => EngineResponse::from_cached(cached, CacheStatusTag::ApiErrorHit),
                None => upstream.into_engine_response(CacheStatusTag::ApiErrorMiss),
            });
        }

        if upstream.status.is_success() {
            self.store_if_eligible(key, &upstream).await?;
        }

        Ok(upstream.into_engine_response(CacheStatusTag::OnlineMiss))
    }

    /// Handles upstream's 304. Guards against the last-full-page heuristic:
    /// a cached response that looks like the last page of a growing list is
    /// revalidated unconditionally rather than trusted outright.
    async fn handle_not_modified(
        &self,
        request: &EngineRequest,
        key: &CacheKey,
        cached: Option<CachedResponse>,
    ) -> Result<EngineResponse, ApiError> {
        let Some(cached) = cached else {
            // Upstream returned 304 against a conditional header we never
            // sent (cache evicted concurrently); treat as a plain miss with
            // an empty body rather than trust a stale store we don't have.
            return Ok(EngineResponse {
                status: StatusCode::OK,
                headers: HashMap::new(),
                body: Bytes::new(),
                tag: CacheStatusTag::OnlineMiss,
            });
        };

        let per_page = effective_per_page(&request.url);
        if is_last_full_page(&cached, per_page) {
            let response = self
                .send(Method::GET, &request.url, request.authorization.as_deref(), &HashMap::new(), None)
                .await
                .map_err(|source| upstream_error(&request.url, source))?;
            let upstream = UpstreamResponse::capture(response, &request.url).await?;
            if upstream.status.is_success() {
                self.store_if_eligible(key, &upstream).await?;
            }
            return Ok(upstream.into_engine_response(CacheStatusTag::OnlineMiss));
        }

        Ok(EngineResponse::from_cached(cached, CacheStatusTag::OnlineHit))
    }

    async fn store_if_eligible(
        &self,
        key: &CacheKey,
        upstream: &UpstreamResponse,
    ) -> Result<(), ApiError> {
        let candidate = CachedResponse::new(
            upstream.status.as_u16(),
            upstream.headers.clone(),
            upstream.body.to_vec(),
        );
        if candidate.is_cacheable() {
            self.cache.put(key.clone(), candidate).await?;
        }
        Ok(())
    }

    async fn send(
        &self,
        method: Method,
        url: &url::Url,
        authorization: Option<&str>,
        extra_headers: &HashMap<&'static str, String>,
        body: Option<Bytes>,
    ) -> Result<reqwest::Response, reqwest::Error> {
        let mut builder = self
            .client
            .request(method, url.clone())
            .timeout(self.timeout);
        if let Some(authorization) = authorization {
            builder = builder.header(http::header::AUTHORIZATION, authorization);
        }
        for (name, value) in extra_headers {
            builder = builder.header(*name, value);
        }
        if let Some(body) = body {
            builder = builder.body(body);
        }
        builder.send().await
    }
}

fn conditional_headers_for(cached: &CachedResponse) -> HashMap<&'static str, String> {
    let mut headers = HashMap::new();
    if let Some(etag) = cached.header("ETag") {
        headers.insert("If-None-Match", etag.to_string());
    }
    if let Some(last_modified) = cached.header("Last-Modified") {
        headers.insert("If-Modified-Since", last_modified.to_string());
    }
    headers
}

fn is_rate_limited(body: &Bytes) -> bool {
    let text = String::from_utf8_lossy(body);
    RATE_LIMIT_MARKERS.iter().any(|marker| text.contains(marker))
}

fn inject_default_per_page(url: &mut url::Url) {
    let has_per_page = url.query_pairs().any(|(name, _)| name == "per_page");
    if !has_per_page {
        url.query_pairs_mut().append_pair("per_page", &DEFAULT_PER_PAGE.to_string());
    }
}

fn effective_per_page(url: &url::Url) -> u32 {
    url.query_pairs()
        .find(|(name, _)| name == "per_page")
        .and_then(|(_, value)| value.parse().ok())
        .unwrap_or(DEFAULT_PER_PAGE)
}

fn is_last_full_page(cached: &CachedResponse, per_page: u32) -> bool {
    let Some(serde_json::Value::Array(items)) = cached.json() else {
        return false;
    };
    let has_next = cached.links().contains_key("next");
    items.len() as u32 == per_page && !has_next
}

fn upstream_error(url: &url::Url, source: reqwest::Error) -> ApiError {
    ApiError::Upstream {
        upstream: url.to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;

    #[test]
    fn default_per_page_is_injected_when_absent() {
        let mut url = url::Url::parse("https://api.github.com/repos/a/b").unwrap();
        inject_default_per_page(&mut url);
        assert_eq!(effective_per_page(&url), DEFAULT_PER_PAGE);
    }

    #[test]
    fn explicit_per_page_is_preserved() {
        let mut url = url::Url::parse("https://api.github.com/items?per_page=2").unwrap();
        inject_default_per_page(&mut url);
        assert_eq!(effective_per_page(&url), 2);
    }

    #[test]
    fn rate_limit_markers_are_detected() {
        assert!(is_rate_limited(&Bytes::from_static(
            b"{\"message\":\"API rate limit exceeded for xxx\"}"
        )));
        assert!(!is_rate_limited(&Bytes::from_static(b"{\"message\":\"not found\"}")));
    }

    #[test]
    fn last_full_page_requires_exact_length_and_no_next_link() {
        let mut headers: Map<String, String> = Map::new();
        headers.insert("ETag".to_string(), "\"x\"".to_string());
        let full_no_next = CachedResponse::new(200, headers.clone(), br#"[1,2]"#.to_vec());
        assert!(is_last_full_page(&full_no_next, 2));

        headers.insert(
            "Link".to_string(),
            r#"<https://api.github.com/items?page=2>; rel="next""#.to_string(),
        );
        let full_with_next = CachedResponse::new(200, headers, br#"[1,2]"#.to_vec());
        assert!(!is_last_full_page(&full_with_next, 2));
    }

    #[test]
    fn non_array_body_short_circuits_last_page_check() {
        let mut headers: Map<String, String> = Map::new();
        headers.insert("ETag".to_string(), "\"x\"".to_string());
        let object_body = CachedResponse::new(200, headers, br#"{"login":"octocat"}"#.to_vec());
        assert!(!is_last_full_page(&object_body, 2));
    }
}
