//! Identity linking for sso-portal.
//!
//! This crate provides:
//! - The user directory record (`User`) and its storage seam (`UserDirectory`)
//! - Login sessions (`Session`, `SessionId`, `SessionStore`)
//! - Keycloak relying-party configuration (`OidcConfig`)
//! - The authentication backend that links users to Keycloak subjects
//!   (`KeycloakBackend`)
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use sso_portal_identity::{ClaimSet, KeycloakBackend, MemoryUserDirectory, OidcConfig};
//!
//! # tokio_test_block_on(async {
//! let config = OidcConfig::new(
//!     "http://keycloak:8080/realms/demo".to_string(),
//!     "portal".to_string(),
//!     "secret".to_string(),
//! );
//! let backend = KeycloakBackend::from_config(&config, Arc::new(MemoryUserDirectory::new()));
//!
//! let claims = ClaimSet::default()
//!     .with("sub", "f81d4fae")
//!     .with("email", "alice@example.com");
//! let outcome = backend.authenticate(&claims).await.unwrap();
//!
//! assert!(outcome.created);
//! assert_eq!(outcome.user.keycloak_id(), Some("f81d4fae"));
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

pub mod auth;
pub mod backend;
pub mod claims;
pub mod directory;
pub mod error;
pub mod oidc;
pub mod session;
pub mod user;

pub use auth::{AuthenticatedUser, SessionLookup};
pub use backend::{
    ClaimsResolver, KeycloakBackend, LoginOutcome, MissingSubjectPolicy, UsernameStrategy,
    hashed_username,
};
pub use claims::ClaimSet;
pub use directory::{MemorySessionStore, MemoryUserDirectory, SessionStore, UserDirectory};
pub use error::{BackendError, DirectoryError};
pub use oidc::{KeycloakEndpoints, OidcConfig, OidcConfigBuilder};
pub use session::{Session, SessionId};
pub use user::User;
