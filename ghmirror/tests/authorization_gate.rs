//! End-to-end coverage of spec scenario 7 and the authorization decision
//! table in spec §4.2: a caller not on the allow-list never reaches the
//! proxied resource, and a missing `Authorization` header is rejected
//! outright once an allow-list is configured.

#![cfg(feature = "testing")]

use axum::body::Body;
use ghmirror::testing::{router, test_config};
use http::{Method, Request, StatusCode};
use serde_json::Value;
use tower::ServiceExt;

fn get(path: &str, authorization: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(Method::GET).uri(format!("http://mirror.example{path}"));
    if let Some(authorization) = authorization {
        builder = builder.header(http::header::AUTHORIZATION, authorization);
    }
    builder.body(Body::empty()).unwrap()
}

#[tokio::test]
async fn caller_not_on_allow_list_is_rejected_before_reaching_upstream() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/user")
        .with_status(200)
        .with_body(r#"{"login":"other"}"#)
        .create_async()
        .await;
    let never_called = server.mock("GET", "/r").expect(0).create_async().await;

    let mut config = test_config(&server.url(), &server.url());
    config.github_users = Some(vec!["app-sre-bot".to_string()]);
    let router = router(config);

    let response = router.oneshot(get("/r", Some("token foo"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert!(json.get("message").is_some());
    assert!(json.get("documentation_url").is_some());
    never_called.assert_async().await;
}

#[tokio::test]
async fn missing_authorization_is_rejected_when_allow_list_configured() {
    let server = mockito::Server::new_async().await;
    let mut config = test_config(&server.url(), &server.url());
    config.github_users = Some(vec!["app-sre-bot".to_string()]);
    let router = router(config);

    let response = router.oneshot(get("/r", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn allow_listed_caller_passes_through() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/user")
        .with_status(200)
        .with_body(r#"{"login":"app-sre-bot"}"#)
        .create_async()
        .await;
    let resource = server
        .mock("GET", "/r")
        .with_status(200)
        .with_header("etag", "\"abc\"")
        .with_body("{}")
        .create_async()
        .await;

    let mut config = test_config(&server.url(), &server.url());
    config.github_users = Some(vec!["app-sre-bot".to_string()]);
    let router = router(config);

    let response = router.oneshot(get("/r", Some("token foo"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    resource.assert_async().await;
}
