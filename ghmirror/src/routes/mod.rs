//! HTTP surface (spec §6): `/healthz`, `/metrics`, and the catch-all proxy
//! that drives the request through the authorization gate (applied as a
//! layer, not here), the engine, and the rewriter.

use axum::body::Body;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use tokio::time::Instant;

use crate::app_state::AppState;
use crate::engine::EngineRequest;
use crate::error::api::ApiError;
use crate::middleware::auth::ResolvedLogin;
use crate::rewrite;

pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
}

pub fn proxy_router() -> Router<AppState> {
    Router::new().fallback(proxy)
}

async fn healthz() -> &'static str {
    "OK"
}

async fn metrics(State(app_state): State<AppState>) -> Response {
    let cache = app_state.cache();
    let byte_size = cache.byte_size().await.unwrap_or(0);
    let len = cache.len().await.unwrap_or(0);
    app_state.metrics().set_cache_gauges(byte_size, len);

    match app_state.metrics().encode() {
        Ok(body) => (
            StatusCode::OK,
            [("Content-Type", "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(error) => {
            tracing::error!(error = %error, "failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn proxy(
    State(app_state): State<AppState>,
    request: http::Request<Body>,
) -> Result<Response, ApiError> {
    let start = request
        .extensions()
        .get::<Instant>()
        .copied()
        .unwrap_or_else(Instant::now);

    let method = request.method().clone();
    let authorization = request
        .headers()
        .get(http::header::AUTHORIZATION)
        .and_then(|header| header.to_str().ok())
        .map(str::to_string);
    let resolved_login = request.extensions().get::<ResolvedLogin>().map(|login| login.0.clone());

    let mirror_base = mirror_base_url(&app_state, request.headers());
    let path_and_query = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().trim_start_matches('/'))
        .unwrap_or_default();
    let url = app_state
        .config()
        .upstream_url
        .join(path_and_query)
        .map_err(|_source| ApiError::InvalidPath(path_and_query.to_string()))?;

    let body = axum::body::to_bytes(request.into_body(), usize::MAX)
        .await
        .unwrap_or_default();

    let engine_response = app_state
        .engine()
        .handle(EngineRequest {
            method: method.clone(),
            url,
            authorization: authorization.clone(),
            body,
        })
        .await?;

    let rewritten = rewrite::rewrite(
        &engine_response.headers,
        &engine_response.body,
        mirror_base.as_str(),
        app_state.config().upstream_url.as_str(),
    );

    let user = resolve_user_label(&app_state, authorization.as_deref(), resolved_login.as_deref(), &engine_response.body);

    app_state.metrics().record_request(
        crate::metrics::RequestLabels {
            cache: engine_response.tag.as_ref(),
            status: engine_response.status.as_str(),
            method: method.as_str(),
            user: &user,
        },
        start.elapsed(),
    );

    let mut response = Response::builder().status(engine_response.status);
    for (name, value) in &rewritten.headers {
        response = response.header(name, value);
    }
    response = response.header("X-Cache", engine_response.tag.as_ref());

    Ok(response
        .body(Body::from(rewritten.body))
        .expect("response built from validated parts"))
}

fn mirror_base_url(app_state: &AppState, headers: &HeaderMap) -> url::Url {
    if let Some(configured) = &app_state.config().github_mirror_url {
        return configured.clone();
    }
    let host = headers
        .get(http::header::HOST)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("localhost");
    url::Url::parse(&format!("http://{host}")).unwrap_or_else(|_| {
        url::Url::parse("http://localhost").expect("hardcoded fallback url is valid")
    })
}

fn resolve_user_label(
    app_state: &AppState,
    authorization: Option<&str>,
    resolved_login: Option<&str>,
    body: &Bytes,
) -> String {
    if let Some(login) = resolved_login {
        return login.to_string();
    }
    if let Some(authorization) = authorization {
        let fingerprint = crate::cache::fingerprint_of(authorization);
        if let Some(login) = app_state.authorized_users().login_for(&fingerprint) {
            return login;
        }
    }
    serde_json::from_slice::<serde_json::Value>(body)
        .ok()
        .and_then(|value| value.get("login").and_then(|v| v.as_str()).map(str::to_string))
        .unwrap_or_else(|| "None".to_string())
}
