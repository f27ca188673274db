use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use displaydoc::Display;
use http::StatusCode;
use serde::Serialize;
use strum::AsRefStr;
use thiserror::Error;

/// Errors raised while deciding whether a request is allowed through the
/// gate. Each maps to a specific status code and a GitHub-shaped JSON body,
/// except [`AuthError::UpstreamRejected`] which passes the `/user` lookup's
/// own status and body straight through (spec §4.2, §7).
#[derive(Debug, Error, Display, AsRefStr)]
pub enum AuthError {
    /// no `Authorization` header was present on the request
    MissingAuthorization,
    /// the `Authorization` header could not be used to resolve a caller: {0}
    UnresolvableCaller(String),
    /// caller {login} is not on the allow list
    NotAllowed { login: String },
    /// `/user` rejected the caller's authorization with status {status}
    UpstreamRejected {
        status: StatusCode,
        body: Bytes,
    },
}

#[derive(Debug, Serialize)]
struct AuthErrorBody {
    message: String,
    documentation_url: &'static str,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        tracing::warn!(reason = self.as_ref(), "{self}");

        match self {
            AuthError::UpstreamRejected { status, body } => (status, body).into_response(),
            other => {
                let status = match &other {
                    AuthError::MissingAuthorization | AuthError::UnresolvableCaller(_) => {
                        StatusCode::UNAUTHORIZED
                    }
                    AuthError::NotAllowed { .. } => StatusCode::FORBIDDEN,
                    AuthError::UpstreamRejected { .. } => unreachable!("handled above"),
                };
                let body = AuthErrorBody {
                    message: other.to_string(),
                    documentation_url: "https://docs.github.com/rest",
                };
                (status, Json(body)).into_response()
            }
        }
    }
}
