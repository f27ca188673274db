//! Test-only fixtures for driving the assembled `axum` router end to end
//! against a mock upstream, gated behind the `testing` feature the same
//! way the ambient stack's own fixtures are.

use std::time::Duration;

use axum::Router;

use crate::app;
use crate::app_state::AppState;
use crate::config::{CacheType, Config};

/// Builds a [`Config`] suitable for an integration test: in-memory cache, a
/// short request timeout, and the caller's mock URLs standing in for
/// GitHub's REST API and status document. The health monitor is not spun up
/// by these fixtures, so `github_status_sleep_time` is irrelevant here.
#[must_use]
pub fn test_config(upstream_url: &str, status_url: &str) -> Config {
    Config {
        github_users: None,
        cache_type: CacheType::InMemory,
        redis: None,
        github_status_sleep_time: Duration::from_secs(3600),
        github_mirror_url: Some(
            url::Url::parse("https://mirror.example").expect("hardcoded test url is valid"),
        ),
        requests_timeout: Duration::from_secs(5),
        listen_addr: "127.0.0.1:0".parse().expect("hardcoded test addr is valid"),
        upstream_url: url::Url::parse(upstream_url).expect("caller-provided upstream url is valid"),
        status_url: url::Url::parse(status_url).expect("caller-provided status url is valid"),
    }
}

/// Builds the fully-wired router (authorization gate, engine, rewriter,
/// metrics) over the given config, ready to drive with
/// `tower::ServiceExt::oneshot`, alongside the [`AppState`] handle so a test
/// can reach into the health flag, cache, or authorized-user set it
/// shares with the running router.
#[must_use]
pub fn router_with_state(config: Config) -> (Router, AppState) {
    let app = app::build(config).expect("test config should always assemble an app");
    let state = app.state().clone();
    (app.router(), state)
}

/// Convenience wrapper around [`router_with_state`] for tests that don't
/// need the state handle.
#[must_use]
pub fn router(config: Config) -> Router {
    router_with_state(config).0
}
