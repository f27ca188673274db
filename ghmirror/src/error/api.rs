use axum::response::{IntoResponse, Response};
use axum::Json;
use displaydoc::Display;
use http::StatusCode;
use serde::Serialize;
use thiserror::Error;

/// Request-time errors: any of these is caught by the outermost handler and
/// turned into an HTTP response, never a process abort (`SPEC_FULL.md` §7).
#[derive(Debug, Error, Display)]
pub enum ApiError {
    /// Error reaching {upstream}: {source}
    Upstream { upstream: String, source: reqwest::Error },
    /// cache backend error: {0}
    Cache(#[from] crate::cache::CacheError),
    /// request path could not be resolved against the upstream base url: {0}
    InvalidPath(String),
    /// service panicked: {0}
    Panic(String),
}

#[derive(Debug, Serialize)]
pub struct GatewayErrorBody {
    pub message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Upstream { upstream, source } => {
                tracing::error!(upstream = %upstream, error = %source, "error reaching upstream");
                (
                    StatusCode::BAD_GATEWAY,
                    Json(GatewayErrorBody {
                        message: format!(
                            "Error reaching {upstream}: {}",
                            error_class_name(&source)
                        ),
                    }),
                )
                    .into_response()
            }
            ApiError::Cache(error) => {
                tracing::error!(error = %error, "cache backend error");
                (
                    StatusCode::BAD_GATEWAY,
                    Json(GatewayErrorBody {
                        message: format!("Error reaching cache: {error}"),
                    }),
                )
                    .into_response()
            }
            ApiError::InvalidPath(path) => {
                tracing::warn!(path = %path, "invalid request path");
                (
                    StatusCode::BAD_REQUEST,
                    Json(GatewayErrorBody {
                        message: format!("invalid request path: {path}"),
                    }),
                )
                    .into_response()
            }
            ApiError::Panic(details) => {
                tracing::error!(details = %details, "service panicked");
                (
                    StatusCode::BAD_GATEWAY,
                    Json(GatewayErrorBody {
                        message: "Error reaching upstream: Panic".to_string(),
                    }),
                )
                    .into_response()
            }
        }
    }
}

/// Approximates the Python-source behavior of interpolating the raised
/// exception's class name into the 502 body.
fn error_class_name(error: &reqwest::Error) -> &'static str {
    if error.is_timeout() {
        "Timeout"
    } else if error.is_connect() {
        "ConnectionError"
    } else if error.is_decode() {
        "DecodeError"
    } else {
        "RequestException"
    }
}
