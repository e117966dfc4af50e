//! Authentication routes for login, callback, and logout.

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::{Cookie, SameSite, SignedCookieJar};
use chrono::Duration as ChronoDuration;
use serde::Deserialize;
use sso_portal_identity::{BackendError, OidcConfig, Session, SessionId};
use std::sync::Arc;
use time::Duration as TimeDuration;

use super::{AppState, oidc::AuthState};
use crate::config::SessionConfig;

/// Session cookie name.
pub const SESSION_COOKIE: &str = "sessionid";

/// Auth state cookie name (CSRF state, nonce and PKCE verifier during the
/// OIDC flow).
pub const AUTH_STATE_COOKIE: &str = "oidc_auth_state";

pub const LOGIN_PATH: &str = "/oidc/authenticate/";
pub const CALLBACK_PATH: &str = "/oidc/callback/";

/// How long a started login may take, in minutes.
const AUTH_STATE_MAX_AGE_MINUTES: i64 = 10;

/// Query parameters for login initiation.
#[derive(Debug, Deserialize)]
pub struct LoginQuery {
    next: Option<String>,
}

/// Query parameters for the OIDC callback.
#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// Keeps `next` only if it is a path on this site.
#[must_use]
pub fn safe_next(next: Option<&str>) -> Option<String> {
    let next = next?.trim();
    let mut chars = next.chars();
    match (chars.next(), chars.next()) {
        (Some('/'), Some('/' | '\\')) => None,
        (Some('/'), _) if !next.chars().any(char::is_control) => Some(next.to_string()),
        _ => None,
    }
}

/// Location of the login page that returns to `next` afterwards.
#[must_use]
pub fn login_redirect(next: &str) -> String {
    let encoded: String = url::form_urlencoded::byte_serialize(next.as_bytes()).collect();
    format!("{LOGIN_PATH}?next={encoded}")
}

/// The callback URL Keycloak redirects back to.
///
/// Uses the configured redirect URI, or builds one from the request host.
#[must_use]
pub fn callback_url(config: &OidcConfig, headers: &HeaderMap) -> Option<String> {
    if let Some(uri) = config.redirect_uri() {
        return Some(uri.to_string());
    }
    let host = headers
        .get(header::HOST)?
        .to_str()
        .ok()
        .filter(|h| !h.is_empty())?;
    let scheme = match headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
    {
        Some(proto) if proto.eq_ignore_ascii_case("https") => "https",
        _ => "http",
    };
    Some(format!("{scheme}://{host}{CALLBACK_PATH}"))
}

fn session_cookie(session: &Session, config: &SessionConfig) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, session.id().as_str().to_string()))
        .path("/")
        .http_only(true)
        .secure(config.secure_cookies)
        .same_site(SameSite::Lax)
        .max_age(TimeDuration::minutes(config.cookie_age_minutes))
        .build()
}

fn removal(name: &'static str) -> Cookie<'static> {
    Cookie::build(name).path("/").build()
}

/// Initiates the OIDC login flow by redirecting to Keycloak.
pub async fn login(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<LoginQuery>,
) -> Response {
    let jar = SignedCookieJar::from_headers(&headers, state.cookie_key.clone());
    match start_login(&state, &headers, query) {
        Ok((cookie, auth_url)) => (jar.add(cookie), Redirect::to(&auth_url)).into_response(),
        Err(err) => err.respond(state.debug),
    }
}

fn start_login(
    state: &AppState,
    headers: &HeaderMap,
    query: LoginQuery,
) -> Result<(Cookie<'static>, String), CallbackError> {
    let config = state.oidc_client.config();
    let redirect_uri = callback_url(config, headers).ok_or(CallbackError::MissingHost)?;
    let next = safe_next(query.next.as_deref());

    let (auth_url, auth_state) = state
        .oidc_client
        .authorization_url(&redirect_uri, next)
        .map_err(|e| CallbackError::Configuration(e.to_string()))?;

    let value = serde_json::to_string(&auth_state)
        .map_err(|e| CallbackError::Configuration(format!("failed to encode auth state: {e}")))?;

    let cookie = Cookie::build((AUTH_STATE_COOKIE, value))
        .path("/")
        .http_only(true)
        .secure(state.session_config.secure_cookies)
        .same_site(SameSite::Lax)
        .max_age(TimeDuration::minutes(AUTH_STATE_MAX_AGE_MINUTES))
        .build();

    tracing::debug!(redirect_uri = %redirect_uri, "redirecting to identity provider");
    Ok((cookie, auth_url))
}

/// Handles the OIDC callback after the user authenticates with Keycloak.
pub async fn callback(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<CallbackQuery>,
) -> Response {
    let jar = SignedCookieJar::from_headers(&headers, state.cookie_key.clone());
    let result = complete_login(&state, &jar, query).await;
    let jar = jar.remove(removal(AUTH_STATE_COOKIE));

    match result {
        Ok((cookie, next)) => (jar.add(cookie), Redirect::to(&next)).into_response(),
        Err(err) => (jar, err.respond(state.debug)).into_response(),
    }
}

async fn complete_login(
    state: &AppState,
    jar: &SignedCookieJar,
    query: CallbackQuery,
) -> Result<(Cookie<'static>, String), CallbackError> {
    if let Some(error) = query.error {
        return Err(CallbackError::Provider {
            error,
            description: query.error_description,
        });
    }

    let auth_state_cookie = jar
        .get(AUTH_STATE_COOKIE)
        .ok_or(CallbackError::MissingAuthState)?;
    let auth_state: AuthState = serde_json::from_str(auth_state_cookie.value())
        .map_err(|_| CallbackError::InvalidAuthState)?;

    if query.state.as_deref() != Some(auth_state.csrf_token.as_str()) {
        return Err(CallbackError::CsrfMismatch);
    }
    let code = query
        .code
        .filter(|c| !c.is_empty())
        .ok_or(CallbackError::MissingCode)?;

    let tokens = state
        .oidc_client
        .exchange_code(&code, &auth_state)
        .await
        .map_err(|e| CallbackError::TokenExchange(e.to_string()))?;

    let outcome = state.backend.authenticate(&tokens.claims).await?;

    let session = Session::with_tokens(
        SessionId::generate(),
        outcome.user.id(),
        ChronoDuration::minutes(state.session_config.cookie_age_minutes),
        tokens.access_token,
        tokens.refresh_token,
    );
    state
        .sessions
        .create(&session)
        .await
        .map_err(|e| CallbackError::Database(e.to_string()))?;

    tracing::info!(
        user_id = %outcome.user.id(),
        created = outcome.created,
        "user logged in"
    );

    let next = safe_next(auth_state.next.as_deref()).unwrap_or_else(|| "/".to_string());
    Ok((session_cookie(&session, &state.session_config), next))
}

/// Logs out the user by deleting their session.
pub async fn logout(State(state): State<Arc<AppState>>, headers: HeaderMap) -> impl IntoResponse {
    let jar = SignedCookieJar::from_headers(&headers, state.cookie_key.clone());

    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        let session_id = SessionId::new(cookie.value().to_string());
        match state.sessions.delete(&session_id).await {
            Ok(()) => tracing::info!(session_id = %session_id, "user logged out"),
            Err(e) => tracing::warn!(error = %e, "failed to delete session on logout"),
        }
    }

    (jar.remove(removal(SESSION_COOKIE)), Redirect::to("/"))
}

/// Login flow errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackError {
    /// No `Host` header to build the callback URL from.
    MissingHost,
    MissingAuthState,
    InvalidAuthState,
    CsrfMismatch,
    MissingCode,
    /// Keycloak redirected back with an `error` parameter.
    Provider {
        error: String,
        description: Option<String>,
    },
    /// The backend refused the claims.
    LoginRejected(String),
    /// More than one user matched the identity.
    Suspicious(String),
    Configuration(String),
    TokenExchange(String),
    Database(String),
}

impl std::fmt::Display for CallbackError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingHost => write!(f, "request has no host"),
            Self::MissingAuthState => write!(f, "missing auth state"),
            Self::InvalidAuthState => write!(f, "invalid auth state"),
            Self::CsrfMismatch => write!(f, "CSRF token mismatch"),
            Self::MissingCode => write!(f, "missing authorization code"),
            Self::Provider { error, description } => match description {
                Some(description) => write!(f, "provider error {error}: {description}"),
                None => write!(f, "provider error {error}"),
            },
            Self::LoginRejected(msg)
            | Self::Suspicious(msg)
            | Self::Configuration(msg)
            | Self::TokenExchange(msg)
            | Self::Database(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for CallbackError {}

impl From<BackendError> for CallbackError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::ClaimsRejected { .. } | BackendError::MissingSubject => {
                Self::LoginRejected(err.to_string())
            }
            BackendError::MultipleUsers { .. } => Self::Suspicious(err.to_string()),
            BackendError::Directory { details } => Self::Database(details),
        }
    }
}

impl CallbackError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingHost
            | Self::MissingAuthState
            | Self::InvalidAuthState
            | Self::CsrfMismatch
            | Self::MissingCode
            | Self::Suspicious(_) => StatusCode::BAD_REQUEST,
            Self::Provider { .. } | Self::LoginRejected(_) => StatusCode::FORBIDDEN,
            Self::Configuration(_) | Self::TokenExchange(_) | Self::Database(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn public_message(&self) -> &'static str {
        match self {
            Self::MissingHost => "Bad request",
            Self::MissingAuthState => "Missing auth state",
            Self::InvalidAuthState => "Invalid auth state",
            Self::CsrfMismatch => "CSRF token mismatch",
            Self::MissingCode => "Missing authorization code",
            Self::Suspicious(_) => "Bad request",
            Self::Provider { .. } | Self::LoginRejected(_) => "Login failed",
            Self::TokenExchange(_) => "Authentication failed",
            Self::Configuration(_) | Self::Database(_) => "Internal server error",
        }
    }

    /// Renders the error. Details are only included in debug mode.
    pub fn respond(self, debug: bool) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "login failed");
        } else {
            tracing::warn!(error = %self, "login rejected");
        }

        let message = self.public_message();
        if debug {
            (status, format!("{message}: {self}")).into_response()
        } else {
            (status, message).into_response()
        }
    }
}

impl IntoResponse for CallbackError {
    fn into_response(self) -> Response {
        self.respond(false)
    }
}
