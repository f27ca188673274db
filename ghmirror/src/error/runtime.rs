use displaydoc::Display;
use thiserror::Error;

/// Errors that end a long-running task (the HTTP server or the health
/// monitor). Surfacing one of these triggers process-wide shutdown.
#[derive(Debug, Error, Display)]
pub enum RuntimeError {
    /// server failed while serving requests: {0}
    Serve(#[source] std::io::Error),
    /// health monitor task panicked: {0}
    Join(#[from] tokio::task::JoinError),
}
