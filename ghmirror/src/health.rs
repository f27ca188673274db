//! The upstream health monitor: a single background task that polls
//! GitHub's public status document and maintains the `online` flag the
//! engine consults before every GET.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use meltdown::Token;
use serde::Deserialize;

use crate::config::HEALTH_COMPONENT_NAME;
use crate::error::runtime::RuntimeError;

const RETRY_BUDGET: u32 = 3;

#[derive(Debug, Deserialize)]
struct StatusDocument {
    components: Vec<Component>,
}

#[derive(Debug, Deserialize)]
struct Component {
    name: String,
    status: String,
}

/// Shared flag the engine reads before deciding whether to attempt an
/// upstream call. Starts `true`, as the spec requires.
#[derive(Clone)]
pub struct HealthFlag(Arc<AtomicBool>);

impl HealthFlag {
    #[must_use]
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    #[must_use]
    pub fn shared(&self) -> Arc<AtomicBool> {
        self.0.clone()
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Forces the flag to a value, bypassing the monitor loop. Used by the
    /// monitor itself and by integration tests that need to exercise the
    /// engine's offline path without waiting on a real poll.
    pub fn set(&self, online: bool) {
        self.0.store(online, Ordering::Relaxed);
    }
}

impl Default for HealthFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// Polls `status_url` on a loop, updating a [`HealthFlag`] shared with the
/// engine. Runs as a `meltdown`-managed service alongside the HTTP server.
pub struct HealthMonitor {
    client: reqwest::Client,
    status_url: url::Url,
    sleep_time: Duration,
    flag: HealthFlag,
}

impl HealthMonitor {
    #[must_use]
    pub fn new(
        client: reqwest::Client,
        status_url: url::Url,
        sleep_time: Duration,
        flag: HealthFlag,
    ) -> Self {
        Self {
            client,
            status_url,
            sleep_time,
            flag,
        }
    }

    async fn poll_once(&self) -> bool {
        for attempt in 1..=RETRY_BUDGET {
            match self.client.get(self.status_url.clone()).send().await {
                Ok(response) => match response.json::<StatusDocument>().await {
                    Ok(document) => {
                        return document
                            .components
                            .iter()
                            .find(|component| component.name == HEALTH_COMPONENT_NAME)
                            .is_none_or(|component| component.status != "major_outage");
                    }
                    Err(error) => {
                        tracing::warn!(attempt, error = %error, "failed to parse status document");
                    }
                },
                Err(error) => {
                    tracing::warn!(attempt, error = %error, "failed to reach status document");
                }
            }
        }
        false
    }

    async fn run_forever(self) {
        loop {
            let online = self.poll_once().await;
            if online != self.flag.is_online() {
                tracing::info!(online, "upstream health changed");
            }
            self.flag.set(online);
            tokio::time::sleep(self.sleep_time).await;
        }
    }
}

impl meltdown::Service for HealthMonitor {
    type Future = BoxFuture<'static, Result<(), RuntimeError>>;

    fn run(self, mut token: Token) -> Self::Future {
        Box::pin(async move {
            tokio::select! {
                () = self.run_forever() => {
                    tracing::debug!(name = "health-monitor-task", "monitor loop exited unexpectedly");
                    token.trigger();
                }
                () = &mut token => {
                    tracing::debug!(name = "health-monitor-task", "task shut down successfully");
                }
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_starts_online() {
        let flag = HealthFlag::new();
        assert!(flag.is_online());
    }

    #[test]
    fn flag_reflects_writes() {
        let flag = HealthFlag::new();
        flag.set(false);
        assert!(!flag.is_online());
    }

    #[test]
    fn major_outage_marks_offline() {
        let document: StatusDocument = serde_json::from_str(
            r#"{"components":[{"name":"API Requests","status":"major_outage"}]}"#,
        )
        .unwrap();
        let online = document
            .components
            .iter()
            .find(|c| c.name == HEALTH_COMPONENT_NAME)
            .is_none_or(|c| c.status != "major_outage");
        assert!(!online);
    }

    #[test]
    fn degraded_but_not_major_outage_stays_online() {
        let document: StatusDocument = serde_json::from_str(
            r#"{"components":[{"name":"API Requests","status":"degraded_performance"}]}"#,
        )
        .unwrap();
        let online = document
            .components
            .iter()
            .find(|c| c.name == HEALTH_COMPONENT_NAME)
            .is_none_or(|c| c.status != "major_outage");
        assert!(online);
    }
}
