//! Authentication extractors for Axum.
//!
//! - `RequireAuth`: HTML pages; anonymous users are sent to the login page
//! - `ApiUser`: JSON endpoints; anonymous users get 401
//! - `RequireStaff`: the admin panel; non-staff users get 403

use axum::{
    Json,
    extract::{FromRef, FromRequestParts},
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::SignedCookieJar;
use serde_json::json;
use sso_portal_identity::{AuthenticatedUser, SessionId, SessionLookup};
use std::sync::Arc;

use super::{
    AppState,
    routes::{SESSION_COOKIE, login_redirect},
};

/// Resolves the session cookie of a request.
pub async fn lookup_session(
    state: &AppState,
    parts: &Parts,
) -> Result<SessionLookup, AuthRejection> {
    let jar = SignedCookieJar::from_headers(&parts.headers, state.cookie_key.clone());
    let Some(cookie) = jar.get(SESSION_COOKIE) else {
        return Ok(SessionLookup::Anonymous);
    };
    let session_id = SessionId::new(cookie.value().to_string());

    let Some(session) = state.sessions.find_by_id(&session_id).await.map_err(|e| {
        tracing::error!(error = %e, "failed to load session");
        AuthRejection::InternalError
    })?
    else {
        return Ok(SessionLookup::Anonymous);
    };

    if session.is_expired() {
        if let Err(e) = state.sessions.delete(&session_id).await {
            tracing::warn!(error = %e, "failed to delete expired session");
        }
        return Ok(SessionLookup::Expired { session_id });
    }

    let user = state
        .users
        .find_by_id(session.user_id())
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "failed to load session user");
            AuthRejection::InternalError
        })?;

    Ok(match user {
        Some(user) => SessionLookup::Authenticated(Box::new(AuthenticatedUser::new(session, user))),
        None => SessionLookup::Anonymous,
    })
}

fn requested_path(parts: &Parts) -> String {
    parts
        .uri
        .path_and_query()
        .map_or_else(|| "/".to_string(), |pq| pq.as_str().to_string())
}

/// Extractor for requiring an authenticated user.
///
/// If the user is not authenticated, they will be redirected to the login
/// page, which returns them here afterwards.
pub struct RequireAuth(pub AuthenticatedUser);

impl<S> FromRequestParts<S> for RequireAuth
where
    Arc<AppState>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AuthRejection;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = Arc::<AppState>::from_ref(state);
        lookup_session(&app_state, parts)
            .await?
            .into_user()
            .map(RequireAuth)
            .ok_or_else(|| AuthRejection::LoginRequired {
                next: requested_path(parts),
            })
    }
}

/// Extractor for API endpoints. Anonymous requests are rejected with 401.
pub struct ApiUser(pub AuthenticatedUser);

impl<S> FromRequestParts<S> for ApiUser
where
    Arc<AppState>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AuthRejection;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match RequireAuth::from_request_parts(parts, state).await {
            Ok(RequireAuth(user)) => Ok(ApiUser(user)),
            Err(AuthRejection::LoginRequired { .. }) => Err(AuthRejection::CredentialsMissing),
            Err(other) => Err(other),
        }
    }
}

/// Extractor for requiring an authenticated staff user.
pub struct RequireStaff(pub AuthenticatedUser);

impl<S> FromRequestParts<S> for RequireStaff
where
    Arc<AppState>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AuthRejection;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let RequireAuth(user) = RequireAuth::from_request_parts(parts, state).await?;

        if !user.is_staff() {
            tracing::warn!(user_id = %user.user_id(), "non-staff user denied admin access");
            return Err(AuthRejection::StaffRequired);
        }

        Ok(RequireStaff(user))
    }
}

/// Rejection type for authentication extractors.
#[derive(Debug, PartialEq, Eq)]
pub enum AuthRejection {
    /// Anonymous request for an HTML page.
    LoginRequired { next: String },
    /// Anonymous API request.
    CredentialsMissing,
    StaffRequired,
    InternalError,
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        match self {
            Self::LoginRequired { next } => Redirect::to(&login_redirect(&next)).into_response(),
            Self::CredentialsMissing => (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "detail": "Authentication credentials were not provided." })),
            )
                .into_response(),
            Self::StaffRequired => (StatusCode::FORBIDDEN, "Staff access required").into_response(),
            Self::InternalError => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
            }
        }
    }
}
