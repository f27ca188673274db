use axum_core::response::IntoResponse;
use futures::future::BoxFuture;
use http::Request;
use tower_http::auth::AsyncAuthorizeRequest;

use crate::app_state::AppState;
use crate::cache::fingerprint_of;
use crate::error::auth::AuthError;

/// The user authorization gate (spec §4.2), implemented as a
/// `tower`/`axum` async-authorization layer sitting in front of the
/// router, in the same style as the ambient stack's other cross-cutting
/// layers.
#[derive(Clone)]
pub struct AuthService {
    app_state: AppState,
}

impl AuthService {
    #[must_use]
    pub fn new(app_state: AppState) -> Self {
        Self { app_state }
    }

    async fn authorize_inner(app_state: &AppState, authorization: Option<&str>) -> Result<Option<String>, AuthError> {
        let allow_list = app_state.config().github_users.as_deref();

        let Some(authorization) = authorization else {
            return match allow_list {
                None => Ok(None),
                Some(_) => Err(AuthError::MissingAuthorization),
            };
        };

        let fingerprint = fingerprint_of(authorization);

        if let Some(login) = app_state.authorized_users().login_for(&fingerprint) {
            return Ok(Some(login));
        }

        let response = app_state
            .resolve_login(authorization)
            .await
            .map_err(|source| AuthError::UnresolvableCaller(source.to_string()))?;

        if !response.status.is_success() {
            return Err(AuthError::UpstreamRejected {
                status: response.status,
                body: response.body,
            });
        }

        let login = serde_json::from_slice::<serde_json::Value>(&response.body)
            .ok()
            .and_then(|value| value.get("login").and_then(|v| v.as_str()).map(str::to_string))
            .unwrap_or_default();

        match allow_list {
            None => {
                app_state.authorized_users().insert(fingerprint, login.clone());
                Ok(Some(login))
            }
            Some(allow_list) if allow_list.iter().any(|user| user == &login) => {
                app_state.authorized_users().insert(fingerprint, login.clone());
                Ok(Some(login))
            }
            Some(_) => Err(AuthError::NotAllowed { login }),
        }
    }
}

impl<B> AsyncAuthorizeRequest<B> for AuthService
where
    B: Send + 'static,
{
    type RequestBody = B;
    type ResponseBody = axum_core::body::Body;
    type Future = BoxFuture<'static, Result<Request<B>, http::Response<Self::ResponseBody>>>;

    #[tracing::instrument(skip_all)]
    fn authorize(&mut self, mut request: Request<B>) -> Self::Future {
        let app_state = self.app_state.clone();
        Box::pin(async move {
            let authorization = request
                .headers()
                .get(http::header::AUTHORIZATION)
                .and_then(|header| header.to_str().ok())
                .map(str::to_string);

            match Self::authorize_inner(&app_state, authorization.as_deref()).await {
                Ok(login) => {
                    if let Some(login) = login {
                        request.extensions_mut().insert(ResolvedLogin(login));
                    }
                    Ok(request)
                }
                Err(error) => Err(error.into_response()),
            }
        })
    }
}

/// Stamped onto the request by the gate when the caller was successfully
/// resolved, so the metrics layer can use it as the `user` label without
/// re-resolving.
#[derive(Debug, Clone)]
pub struct ResolvedLogin(pub String);
