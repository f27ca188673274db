//! A thin wrapper giving a registered [`meltdown::Service`] a
//! human-readable name, so the top-level orchestrator in `main` can log
//! which task stopped (and why) without each service needing to know its
//! own name. Also home to the OS-signal service that starts the shutdown
//! cascade in the first place.

use futures::future::BoxFuture;
use meltdown::{Service, Token};

use crate::error::runtime::RuntimeError;

pub struct TaggedService<S> {
    name: &'static str,
    inner: S,
}

impl<S> TaggedService<S> {
    #[must_use]
    pub fn new(name: &'static str, inner: S) -> Self {
        Self { name, inner }
    }
}

impl<S> Service for TaggedService<S>
where
    S: Service<Future = BoxFuture<'static, Result<(), RuntimeError>>> + Send + 'static,
{
    type Future = BoxFuture<'static, Result<(), RuntimeError>>;

    fn run(self, token: Token) -> Self::Future {
        let name = self.name;
        Box::pin(async move {
            let result = self.inner.run(token).await;
            if let Err(error) = &result {
                tracing::error!(service = name, %error, "service exited with error");
            } else {
                tracing::debug!(service = name, "service stopped");
            }
            result
        })
    }
}

/// Waits for either a Ctrl-C or (on unix) a SIGTERM, whichever comes
/// first, and triggers the shared shutdown token so every other
/// registered service unwinds alongside it.
pub struct ShutdownSignal;

impl Service for ShutdownSignal {
    type Future = BoxFuture<'static, Result<(), RuntimeError>>;

    fn run(self, mut token: Token) -> Self::Future {
        Box::pin(async move {
            tokio::select! {
                () = wait_for_signal() => {
                    tracing::info!("shutdown signal received");
                    token.trigger();
                }
                () = &mut token => {}
            }
            Ok(())
        })
    }
}

async fn wait_for_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
