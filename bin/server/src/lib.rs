//! sso-portal web server.
//!
//! Serves the authenticated pages, the `/api/me/` endpoint and the admin
//! panel, and runs the Keycloak OIDC login flow in front of them.

pub mod admin;
pub mod api;
pub mod auth;
pub mod config;
pub mod health;
pub mod hosts;
pub mod views;

use axum::{
    Router, middleware,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::auth::AppState;

/// Builds the application router.
///
/// Logout is `POST` only unless the state allows `GET`.
pub fn build_router(state: Arc<AppState>) -> Router {
    let logout = if state.allow_logout_get {
        get(auth::logout).post(auth::logout)
    } else {
        post(auth::logout)
    };

    Router::new()
        .route("/", get(views::index))
        .route("/userinfo/", get(views::user_info))
        .route("/api/me/", get(api::me))
        .route("/admin/", get(admin::users))
        .route("/oidc/authenticate/", get(auth::login))
        .route("/oidc/callback/", get(auth::callback))
        .route("/oidc/logout/", logout)
        .route("/health", get(health::health))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            hosts::enforce_allowed_hosts,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
