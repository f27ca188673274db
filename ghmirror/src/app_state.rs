//! The process-wide dependency container. Constructed once in `main` and
//! cloned cheaply (an `Arc` handle) into every request handler and the
//! health monitor task.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::cache::CacheBackend;
use crate::config::Config;
use crate::engine::ConditionalRequestEngine;
use crate::error::api::ApiError;
use crate::error::init::InitError;
use crate::health::HealthFlag;
use crate::metrics::Metrics;

/// Caller fingerprints known to be authorized, mapping `fingerprint ->
/// login` so the resolved login can be reused as the metrics `user` label
/// without re-hashing.
#[derive(Default)]
pub struct AuthorizedUserSet(RwLock<HashMap<String, String>>);

impl AuthorizedUserSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn login_for(&self, fingerprint: &str) -> Option<String> {
        self.0
            .read()
            .expect("authorized user set lock poisoned")
            .get(fingerprint)
            .cloned()
    }

    pub fn insert(&self, fingerprint: String, login: String) {
        self.0
            .write()
            .expect("authorized user set lock poisoned")
            .insert(fingerprint, login);
    }
}

struct InnerAppState {
    config: Config,
    client: reqwest::Client,
    cache: Arc<CacheBackend>,
    health: HealthFlag,
    authorized_users: AuthorizedUserSet,
    engine: ConditionalRequestEngine,
    metrics: Metrics,
}

/// Cheaply-cloned handle to the process-wide dependency container.
#[derive(Clone)]
pub struct AppState(Arc<InnerAppState>);

impl AppState {
    pub fn new(config: Config) -> Result<Self, InitError> {
        let client = reqwest::Client::builder()
            .timeout(config.requests_timeout)
            .build()?;
        let cache = Arc::new(CacheBackend::new(&config)?);
        let health = HealthFlag::new();
        let engine = ConditionalRequestEngine::new(
            client.clone(),
            cache.clone(),
            health.shared(),
            config.requests_timeout,
        );
        let metrics = Metrics::new().map_err(|_source| {
            InitError::Metrics(prometheus::Error::Msg(
                "failed to build the metrics registry".to_string(),
            ))
        })?;

        Ok(Self(Arc::new(InnerAppState {
            config,
            client,
            cache,
            health,
            authorized_users: AuthorizedUserSet::new(),
            engine,
            metrics,
        })))
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.0.config
    }

    #[must_use]
    pub fn client(&self) -> &reqwest::Client {
        &self.0.client
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<CacheBackend> {
        &self.0.cache
    }

    #[must_use]
    pub fn health(&self) -> &HealthFlag {
        &self.0.health
    }

    #[must_use]
    pub fn authorized_users(&self) -> &AuthorizedUserSet {
        &self.0.authorized_users
    }

    #[must_use]
    pub fn engine(&self) -> &ConditionalRequestEngine {
        &self.0.engine
    }

    #[must_use]
    pub fn metrics(&self) -> &Metrics {
        &self.0.metrics
    }

    /// Resolves the caller behind `authorization` by issuing `GET /user`
    /// through the engine itself, so the lookup benefits from the same
    /// caching and failure handling as any other proxied request. Returns
    /// the engine's full response: on a non-200 status the gate forwards it
    /// to the client verbatim rather than synthesizing its own.
    pub async fn resolve_login(
        &self,
        authorization: &str,
    ) -> Result<crate::engine::EngineResponse, ApiError> {
        let url = self
            .0
            .config
            .upstream_url
            .join("user")
            .expect("'user' is a valid path segment");
        self.0
            .engine
            .handle(crate::engine::EngineRequest {
                method: http::Method::GET,
                url,
                authorization: Some(authorization.to_string()),
                body: bytes::Bytes::new(),
            })
            .await
    }

    /// Outbound HTTP timeout every ambient consumer (engine, health
    /// monitor, authorization gate) should honor.
    #[must_use]
    pub fn requests_timeout(&self) -> Duration {
        self.0.config.requests_timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authorized_user_set_round_trips() {
        let set = AuthorizedUserSet::new();
        assert!(set.login_for("abc").is_none());
        set.insert("abc".to_string(), "octocat".to_string());
        assert_eq!(set.login_for("abc"), Some("octocat".to_string()));
    }
}
