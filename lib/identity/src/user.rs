//! User directory record.
//!
//! A `User` is keyed internally by an application-assigned [`UserId`] and
//! externally by the identity provider's subject identifier, stored as
//! `keycloak_id`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sso_portal_core::UserId;

/// An application account.
///
/// Created on the first successful login of a previously unseen identity
/// and updated on every later login. This crate never deletes users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Internal id assigned by the directory.
    id: UserId,
    /// Unique login name, derived from the claims at creation time.
    username: String,
    /// Email address from the `email` claim.
    email: Option<String>,
    /// Subject identifier (`sub`) of the linked Keycloak account.
    keycloak_id: Option<String>,
    /// Grants access to the admin panel.
    is_staff: bool,
    /// When the user record was created (date joined).
    created_at: DateTime<Utc>,
    /// When the user record was last written.
    updated_at: DateTime<Utc>,
}

impl User {
    /// Creates a new, not yet persisted user.
    #[must_use]
    pub fn new(username: String, email: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: UserId::new(),
            username,
            email,
            keycloak_id: None,
            is_staff: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Creates a user with all fields specified.
    ///
    /// Use this when reconstituting a user from storage.
    #[must_use]
    #[expect(clippy::too_many_arguments)]
    pub fn with_all_fields(
        id: UserId,
        username: String,
        email: Option<String>,
        keycloak_id: Option<String>,
        is_staff: bool,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            username,
            email,
            keycloak_id,
            is_staff,
            created_at,
            updated_at,
        }
    }

    #[must_use]
    pub fn id(&self) -> UserId {
        self.id
    }

    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    #[must_use]
    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    /// Returns the linked Keycloak subject identifier, if one was stored.
    #[must_use]
    pub fn keycloak_id(&self) -> Option<&str> {
        self.keycloak_id.as_deref()
    }

    #[must_use]
    pub fn is_staff(&self) -> bool {
        self.is_staff
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    #[must_use]
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Overwrites the linked subject identifier.
    pub fn set_keycloak_id(&mut self, keycloak_id: Option<String>) {
        self.keycloak_id = keycloak_id;
        self.updated_at = Utc::now();
    }

    pub fn set_email(&mut self, email: Option<String>) {
        self.email = email;
        self.updated_at = Utc::now();
    }

    pub fn set_staff(&mut self, is_staff: bool) {
        self.is_staff = is_staff;
        self.updated_at = Utc::now();
    }
}
