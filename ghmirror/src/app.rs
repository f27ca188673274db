//! The top-level app: assembles the `tower`/`axum` service stack and
//! drives the HTTP server to completion under `meltdown`'s shutdown
//! orchestration, alongside the health monitor.
//!
//! Middleware stack, outermost first:
//! 0. `CatchPanic` — converts a panicking handler into a 502 response.
//! 1. `TraceLayer` — structured request/response spans.
//! 2. `TimerLayer` — stamps a start `Instant` used for the latency metric.
//! 3. Authorization gate — 401/403 short-circuit before the router.
//! 4. Router — `/healthz`, `/metrics`, and the catch-all proxy.

use std::net::SocketAddr;

use axum::Router;
use futures::future::BoxFuture;
use meltdown::Token;
use tower::ServiceBuilder;
use tower_http::auth::AsyncRequireAuthorizationLayer;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;
use crate::error::init::InitError;
use crate::error::runtime::RuntimeError;
use crate::middleware::auth::AuthService;
use crate::routes;
use crate::utils::catch_panic::PanicResponder;
use crate::utils::timer::TimerLayer;

pub struct App {
    state: AppState,
    listen_addr: SocketAddr,
}

impl App {
    #[must_use]
    pub fn new(state: AppState) -> Self {
        let listen_addr = state.config().listen_addr;
        Self { state, listen_addr }
    }

    /// The process-wide dependency container this app was built with, so
    /// the top-level orchestrator in `main` can spawn sibling tasks (the
    /// health monitor) sharing the same state.
    #[must_use]
    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub(crate) fn router(&self) -> Router {
        let protected = routes::proxy_router()
            .layer(AsyncRequireAuthorizationLayer::new(AuthService::new(self.state.clone())));

        routes::public_router()
            .merge(protected)
            .layer(
                ServiceBuilder::new()
                    .layer(CatchPanicLayer::custom(PanicResponder))
                    .layer(TraceLayer::new_for_http())
                    .layer(TimerLayer::new()),
            )
            .with_state(self.state.clone())
    }
}

impl meltdown::Service for App {
    type Future = BoxFuture<'static, Result<(), RuntimeError>>;

    fn run(self, token: Token) -> Self::Future {
        Box::pin(async move {
            let addr = self.listen_addr;
            tracing::info!(address = %addr, "server starting");

            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .map_err(RuntimeError::Serve)?;
            let router = self.router();

            axum::serve(listener, router.into_make_service())
                .with_graceful_shutdown(async move {
                    token.await;
                    tracing::debug!(name = "http-server-task", "shutdown signal observed");
                })
                .await
                .map_err(RuntimeError::Serve)?;

            Ok(())
        })
    }
}

/// Validates the parts of [`AppState`] construction that can fail before
/// the server binds a socket, surfacing an [`InitError`] instead of
/// panicking mid-request.
pub fn build(config: crate::config::Config) -> Result<App, InitError> {
    let state = AppState::new(config)?;
    Ok(App::new(state))
}
