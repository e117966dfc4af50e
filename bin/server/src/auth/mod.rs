//! Authentication for the portal.
//!
//! This module provides:
//! - The Keycloak OIDC relying party (`/oidc/authenticate/`, `/oidc/callback/`,
//!   `/oidc/logout/`)
//! - Postgres-backed user directory and session store
//! - Session extractors for Axum routes
//!
//! A successful callback hands the verified claims to the
//! [`KeycloakBackend`], which creates or updates the user and records the
//! Keycloak subject. The session is stored server-side and referenced from a
//! signed cookie.

pub mod db;
pub mod middleware;
pub mod oidc;
pub mod routes;

use axum_extra::extract::cookie::Key;
use sso_portal_identity::{KeycloakBackend, SessionStore, UserDirectory};
use std::sync::Arc;

use crate::config::SessionConfig;
use crate::hosts::AllowedHosts;

pub use middleware::{ApiUser, AuthRejection, RequireAuth, RequireStaff};
pub use oidc::OidcClient;
pub use routes::{callback, login, logout};

/// Shared application state.
pub struct AppState {
    pub users: Arc<dyn UserDirectory>,
    pub sessions: Arc<dyn SessionStore>,
    /// Links verified claims to users.
    pub backend: KeycloakBackend,
    pub oidc_client: OidcClient,
    pub session_config: SessionConfig,
    /// Signs the session and auth-state cookies.
    pub cookie_key: Key,
    /// Show error details in 500 responses.
    pub debug: bool,
    pub allowed_hosts: AllowedHosts,
    /// Whether `GET /oidc/logout/` logs out. Otherwise only `POST` does.
    pub allow_logout_get: bool,
}

impl AppState {
    /// Creates the application state. The backend is built from the OIDC
    /// client's configuration and the user directory.
    pub fn new(
        users: Arc<dyn UserDirectory>,
        sessions: Arc<dyn SessionStore>,
        oidc_client: OidcClient,
        session_config: SessionConfig,
        cookie_key: Key,
    ) -> Self {
        let backend = KeycloakBackend::from_config(oidc_client.config(), users.clone());
        Self {
            users,
            sessions,
            backend,
            oidc_client,
            session_config,
            cookie_key,
            debug: false,
            allowed_hosts: AllowedHosts::any(),
            allow_logout_get: false,
        }
    }

    #[must_use]
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    #[must_use]
    pub fn with_allowed_hosts(mut self, allowed_hosts: AllowedHosts) -> Self {
        self.allowed_hosts = allowed_hosts;
        self
    }

    #[must_use]
    pub fn with_logout_get(mut self, allow: bool) -> Self {
        self.allow_logout_get = allow;
        self
    }
}
