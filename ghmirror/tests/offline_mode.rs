//! End-to-end coverage of spec scenarios 4 and 5: while the health flag is
//! offline, a cached GET is served from cache and an uncached GET/POST is
//! synthesized as a 504, with upstream never contacted.

#![cfg(feature = "testing")]

use std::collections::HashMap;

use axum::body::Body;
use ghmirror::cache::{CacheKey, CachedResponse, ResponseCache};
use ghmirror::testing::{router_with_state, test_config};
use http::{Method, Request, StatusCode};
use tower::ServiceExt;

fn cached_key(upstream: &str, path: &str) -> CacheKey {
    let mut url = url::Url::parse(upstream).unwrap().join(path).unwrap();
    url.query_pairs_mut().append_pair("per_page", "30");
    CacheKey::new(url.as_str(), None)
}

#[tokio::test]
async fn offline_get_with_cache_entry_is_a_hit() {
    let server = mockito::Server::new_async().await;
    let config = test_config(&server.url(), &server.url());
    let (router, state) = router_with_state(config);

    let mut headers = HashMap::new();
    headers.insert("ETag".to_string(), "\"abc\"".to_string());
    let cached = CachedResponse::new(200, headers, b"{\"ok\":true}".to_vec());
    state
        .cache()
        .put(cached_key(&server.url(), "r"), cached)
        .await
        .unwrap();
    state.health().set(false);

    let request = Request::builder()
        .method(Method::GET)
        .uri("http://mirror.example/r")
        .body(Body::empty())
        .unwrap();

    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("X-Cache").unwrap(),
        "OFFLINE_HIT"
    );
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"{\"ok\":true}");
}

#[tokio::test]
async fn offline_get_without_cache_entry_synthesizes_gateway_timeout() {
    let server = mockito::Server::new_async().await;
    let config = test_config(&server.url(), &server.url());
    let (router, state) = router_with_state(config);
    state.health().set(false);

    let request = Request::builder()
        .method(Method::GET)
        .uri("http://mirror.example/r")
        .body(Body::empty())
        .unwrap();

    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(response.headers().get("X-Cache").unwrap(), "OFFLINE_MISS");
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], br#"{"message":"gateway timeout"}"#);
}

#[tokio::test]
async fn offline_post_never_reaches_upstream() {
    let mut server = mockito::Server::new_async().await;
    let unreachable_mock = server
        .mock("POST", "/r")
        .expect(0)
        .with_status(200)
        .create_async()
        .await;

    let config = test_config(&server.url(), &server.url());
    let (router, state) = router_with_state(config);
    state.health().set(false);

    let request = Request::builder()
        .method(Method::POST)
        .uri("http://mirror.example/r")
        .body(Body::from("foo"))
        .unwrap();

    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(response.headers().get("X-Cache").unwrap(), "OFFLINE_MISS");
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], br#"{"message":"gateway timeout"}"#);
    unreachable_mock.assert_async().await;
}
