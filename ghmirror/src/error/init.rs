use displaydoc::Display;
use thiserror::Error;

/// Errors that can only occur while assembling the application, before it
/// binds a socket. These abort the process.
#[derive(Debug, Error, Display)]
pub enum InitError {
    /// invalid configuration: {0}
    Config(#[from] crate::config::Error),
    /// failed to build the redis connection pool: {0}
    RedisPool(#[from] r2d2::Error),
    /// failed to connect to redis: {0}
    Redis(#[from] redis::RedisError),
    /// failed to build the upstream http client: {0}
    HttpClient(#[from] reqwest::Error),
    /// failed to register a prometheus collector: {0}
    Metrics(#[from] prometheus::Error),
    /// failed to bind the listen address: {0}
    Bind(#[source] std::io::Error),
}
