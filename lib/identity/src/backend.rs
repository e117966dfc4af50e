//! OIDC authentication backend.
//!
//! Turns a verified [`ClaimSet`] into a directory [`User`]. The flow is
//! split in two layers:
//!
//! - [`ClaimsResolver`] holds the generic rules: which claims are required,
//!   how an existing user is matched (by email, ignoring case) and how the
//!   username of a new user is derived.
//! - [`KeycloakBackend`] runs those rules against a [`UserDirectory`] and
//!   links every created or updated user to the Keycloak account through
//!   the `sub` claim, stored as `keycloak_id`. A user already linked to the
//!   subject is found by it before any email matching, so an email change
//!   in Keycloak keeps the same account.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rootcause::Report;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha224};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::claims::ClaimSet;
use crate::directory::UserDirectory;
use crate::error::{BackendError, DirectoryError};
use crate::oidc::OidcConfig;
use crate::user::User;

/// How the username of a newly created user is chosen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsernameStrategy {
    /// URL-safe base64 of the SHA-224 digest of the email address.
    #[default]
    HashedEmail,
    /// The `preferred_username` claim, or the hashed email when absent.
    PreferredUsername,
}

/// What to do when the claims carry no `sub`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingSubjectPolicy {
    /// Fail the login with [`BackendError::MissingSubject`].
    #[default]
    Reject,
    /// Store an empty `keycloak_id` and let the login through.
    StoreNull,
}

/// Derives a stable, opaque username from an email address.
#[must_use]
pub fn hashed_username(email: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha224::digest(email.as_bytes()))
}

/// Generic claim handling shared by every backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClaimsResolver {
    require_email: bool,
    username_strategy: UsernameStrategy,
}

impl ClaimsResolver {
    #[must_use]
    pub fn new(require_email: bool, username_strategy: UsernameStrategy) -> Self {
        Self {
            require_email,
            username_strategy,
        }
    }

    /// Email is required whenever the `email` scope is requested.
    #[must_use]
    pub fn from_config(config: &OidcConfig) -> Self {
        Self::new(config.requests_email(), config.username_strategy())
    }

    /// Checks that the claims carry what the configured scopes promise.
    pub fn verify_claims(&self, claims: &ClaimSet) -> Result<(), BackendError> {
        if self.require_email && claims.email().is_none() {
            return Err(BackendError::ClaimsRejected {
                reason: "email claim is missing".to_string(),
            });
        }
        Ok(())
    }

    /// Returns the users the claims could belong to.
    ///
    /// Without an email claim nothing matches and the login creates a user.
    pub async fn filter_users_by_claims(
        &self,
        directory: &dyn UserDirectory,
        claims: &ClaimSet,
    ) -> Result<Vec<User>, BackendError> {
        let Some(email) = claims.email() else {
            return Ok(Vec::new());
        };
        directory
            .filter_by_email(email)
            .await
            .map_err(directory_error)
    }

    /// Picks the username for a user created from these claims.
    pub fn username_for(&self, claims: &ClaimSet) -> Result<String, BackendError> {
        if self.username_strategy == UsernameStrategy::PreferredUsername {
            if let Some(name) = claims.preferred_username() {
                return Ok(name.to_string());
            }
        }
        claims
            .email()
            .map(hashed_username)
            .ok_or_else(|| BackendError::ClaimsRejected {
                reason: "no claim to derive a username from".to_string(),
            })
    }

    /// Builds a new, unsaved user from the claims.
    pub fn build_user(&self, claims: &ClaimSet) -> Result<User, BackendError> {
        let username = self.username_for(claims)?;
        Ok(User::new(username, claims.email().map(str::to_string)))
    }

    /// Refreshes an existing user from the claims.
    ///
    /// The generic rules keep the stored profile as it is.
    #[must_use]
    pub fn apply_update(&self, user: User, _claims: &ClaimSet) -> User {
        user
    }
}

/// Result of a successful [`KeycloakBackend::authenticate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginOutcome {
    pub user: User,
    /// True when the login created the user.
    pub created: bool,
}

/// Authentication backend that records the Keycloak subject on each user.
#[derive(Clone)]
pub struct KeycloakBackend {
    base: ClaimsResolver,
    directory: Arc<dyn UserDirectory>,
    missing_subject: MissingSubjectPolicy,
}

impl std::fmt::Debug for KeycloakBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeycloakBackend")
            .field("base", &self.base)
            .field("missing_subject", &self.missing_subject)
            .finish_non_exhaustive()
    }
}

impl KeycloakBackend {
    #[must_use]
    pub fn new(
        base: ClaimsResolver,
        directory: Arc<dyn UserDirectory>,
        missing_subject: MissingSubjectPolicy,
    ) -> Self {
        Self {
            base,
            directory,
            missing_subject,
        }
    }

    #[must_use]
    pub fn from_config(config: &OidcConfig, directory: Arc<dyn UserDirectory>) -> Self {
        Self::new(
            ClaimsResolver::from_config(config),
            directory,
            config.missing_subject(),
        )
    }

    #[must_use]
    pub fn directory(&self) -> &Arc<dyn UserDirectory> {
        &self.directory
    }

    fn subject_for(&self, claims: &ClaimSet) -> Result<Option<String>, BackendError> {
        match (claims.subject(), self.missing_subject) {
            (Some(sub), _) => Ok(Some(sub.to_string())),
            (None, MissingSubjectPolicy::Reject) => Err(BackendError::MissingSubject),
            (None, MissingSubjectPolicy::StoreNull) => {
                warn!("claims carry no sub, storing an empty keycloak_id");
                Ok(None)
            }
        }
    }

    /// Creates a user from the claims and links it to the Keycloak subject.
    ///
    /// Exactly one insert is issued. Nothing is written when the subject is
    /// missing and the policy rejects it.
    pub async fn create_user(&self, claims: &ClaimSet) -> Result<User, BackendError> {
        let mut user = self.base.build_user(claims)?;
        let keycloak_id = self.subject_for(claims)?;
        user.set_keycloak_id(keycloak_id);

        self.directory
            .insert(&user)
            .await
            .map_err(directory_error)?;

        info!(
            user_id = %user.id(),
            username = %user.username(),
            keycloak_id = ?user.keycloak_id(),
            "created user from OIDC claims"
        );
        Ok(user)
    }

    /// Refreshes an existing user and overwrites its `keycloak_id` with the
    /// current subject. Exactly one save is issued.
    ///
    /// The email follows Keycloak when the claims carry one.
    pub async fn update_user(&self, user: User, claims: &ClaimSet) -> Result<User, BackendError> {
        let mut user = self.base.apply_update(user, claims);
        let keycloak_id = self.subject_for(claims)?;
        if let Some(email) = claims.email() {
            if user.email() != Some(email) {
                debug!(user_id = %user.id(), "refreshing email from claims");
                user.set_email(Some(email.to_string()));
            }
        }
        if user.keycloak_id() != keycloak_id.as_deref() {
            debug!(
                user_id = %user.id(),
                previous = ?user.keycloak_id(),
                current = ?keycloak_id,
                "relinking user to keycloak subject"
            );
        }
        user.set_keycloak_id(keycloak_id);

        self.directory.save(&user).await.map_err(directory_error)?;

        info!(user_id = %user.id(), "updated user from OIDC claims");
        Ok(user)
    }

    /// Resolves the claims to a user, creating or updating it.
    ///
    /// The user linked to the claims' subject wins. Email matching only runs
    /// when no user holds the subject yet.
    pub async fn authenticate(&self, claims: &ClaimSet) -> Result<LoginOutcome, BackendError> {
        self.base.verify_claims(claims)?;

        if let Some(subject) = claims.subject() {
            let linked = self
                .directory
                .find_by_keycloak_id(subject)
                .await
                .map_err(directory_error)?;
            if let Some(existing) = linked {
                return Ok(LoginOutcome {
                    user: self.update_user(existing, claims).await?,
                    created: false,
                });
            }
        }

        let mut matches = self
            .base
            .filter_users_by_claims(self.directory.as_ref(), claims)
            .await?;

        match matches.len() {
            0 => Ok(LoginOutcome {
                user: self.create_user(claims).await?,
                created: true,
            }),
            1 => {
                let existing = matches.remove(0);
                Ok(LoginOutcome {
                    user: self.update_user(existing, claims).await?,
                    created: false,
                })
            }
            count => {
                warn!(count, "multiple users matched one identity");
                Err(BackendError::MultipleUsers { count })
            }
        }
    }
}

fn directory_error(report: Report<DirectoryError>) -> BackendError {
    BackendError::Directory {
        details: report.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::MemoryUserDirectory;

    fn backend(policy: MissingSubjectPolicy) -> (KeycloakBackend, Arc<MemoryUserDirectory>) {
        let directory = Arc::new(MemoryUserDirectory::new());
        let backend = KeycloakBackend::new(
            ClaimsResolver::new(true, UsernameStrategy::HashedEmail),
            directory.clone(),
            policy,
        );
        (backend, directory)
    }

    fn alice(sub: &str) -> ClaimSet {
        ClaimSet::default()
            .with("sub", sub)
            .with("email", "alice@example.com")
            .with("preferred_username", "alice")
    }

    #[test]
    fn hashed_username_is_urlsafe_sha224() {
        assert_eq!(
            hashed_username("alice@example.com"),
            "D7qn-SpH_jxSAel_BjmDxwJDLpDde_DHIzhlQw"
        );
    }

    #[test]
    fn preferred_username_strategy_falls_back_to_hash() {
        let resolver = ClaimsResolver::new(true, UsernameStrategy::PreferredUsername);
        assert_eq!(resolver.username_for(&alice("s")).expect("name"), "alice");

        let no_name = ClaimSet::default().with("email", "alice@example.com");
        assert_eq!(
            resolver.username_for(&no_name).expect("name"),
            hashed_username("alice@example.com")
        );
    }

    #[test]
    fn email_is_required_when_requested() {
        let claims = ClaimSet::default().with("sub", "abc");

        let strict = ClaimsResolver::new(true, UsernameStrategy::HashedEmail);
        assert!(matches!(
            strict.verify_claims(&claims),
            Err(BackendError::ClaimsRejected { .. })
        ));

        let lenient = ClaimsResolver::new(false, UsernameStrategy::HashedEmail);
        assert!(lenient.verify_claims(&claims).is_ok());
    }

    #[tokio::test]
    async fn create_user_stores_subject() {
        let (backend, directory) = backend(MissingSubjectPolicy::Reject);

        let user = backend.create_user(&alice("abc-123")).await.expect("create");

        assert_eq!(user.keycloak_id(), Some("abc-123"));
        assert_eq!(user.email(), Some("alice@example.com"));
        assert_eq!(directory.count().await.expect("count"), 1);
        let stored = directory.find_by_id(user.id()).await.expect("find");
        assert_eq!(stored.as_ref().and_then(User::keycloak_id), Some("abc-123"));
    }

    #[tokio::test]
    async fn first_login_creates_exactly_one_user() {
        let (backend, directory) = backend(MissingSubjectPolicy::Reject);

        let outcome = backend.authenticate(&alice("abc-123")).await.expect("login");

        assert!(outcome.created);
        assert_eq!(outcome.user.keycloak_id(), Some("abc-123"));
        assert_eq!(directory.count().await.expect("count"), 1);
    }

    #[tokio::test]
    async fn later_login_updates_in_place() {
        let (backend, directory) = backend(MissingSubjectPolicy::Reject);
        let first = backend.authenticate(&alice("abc-123")).await.expect("login");

        let second = backend.authenticate(&alice("xyz-789")).await.expect("login");

        assert!(!second.created);
        assert_eq!(second.user.id(), first.user.id());
        assert_eq!(second.user.keycloak_id(), Some("xyz-789"));
        assert_eq!(directory.count().await.expect("count"), 1);
    }

    #[tokio::test]
    async fn email_change_in_keycloak_keeps_the_account() {
        let (backend, directory) = backend(MissingSubjectPolicy::Reject);
        let old = ClaimSet::default()
            .with("sub", "kc-1")
            .with("email", "alice@old.example");
        let first = backend.authenticate(&old).await.expect("login");

        let new = ClaimSet::default()
            .with("sub", "kc-1")
            .with("email", "alice@new.example");
        let second = backend.authenticate(&new).await.expect("login");

        assert!(!second.created);
        assert_eq!(second.user.id(), first.user.id());
        assert_eq!(second.user.email(), Some("alice@new.example"));
        assert_eq!(directory.count().await.expect("count"), 1);
        let stored = directory.find_by_id(first.user.id()).await.expect("find");
        assert_eq!(
            stored.as_ref().and_then(User::email),
            Some("alice@new.example")
        );
    }

    #[tokio::test]
    async fn subject_match_wins_over_email_match() {
        let (backend, directory) = backend(MissingSubjectPolicy::Reject);
        let linked = backend.create_user(&alice("kc-1")).await.expect("create");
        let other = User::new("other".to_string(), Some("shared@example.com".to_string()));
        directory.insert(&other).await.expect("insert");

        let claims = ClaimSet::default()
            .with("sub", "kc-1")
            .with("email", "shared@example.com");
        let outcome = backend.authenticate(&claims).await.expect("login");

        assert_eq!(outcome.user.id(), linked.id());
        assert_eq!(directory.count().await.expect("count"), 2);
    }

    #[tokio::test]
    async fn repeated_update_is_idempotent() {
        let (backend, directory) = backend(MissingSubjectPolicy::Reject);
        let user = backend.create_user(&alice("abc-123")).await.expect("create");

        let once = backend
            .update_user(user, &alice("abc-123"))
            .await
            .expect("update");
        let twice = backend
            .update_user(once.clone(), &alice("abc-123"))
            .await
            .expect("update");

        assert_eq!(once.keycloak_id(), twice.keycloak_id());
        assert_eq!(once.username(), twice.username());
        assert_eq!(directory.count().await.expect("count"), 1);
    }

    #[tokio::test]
    async fn update_matches_email_ignoring_case() {
        let (backend, directory) = backend(MissingSubjectPolicy::Reject);
        let existing = User::new("legacy".to_string(), Some("Alice@Example.com".to_string()));
        directory.insert(&existing).await.expect("insert");

        let outcome = backend.authenticate(&alice("abc-123")).await.expect("login");

        assert!(!outcome.created);
        assert_eq!(outcome.user.id(), existing.id());
        assert_eq!(outcome.user.username(), "legacy");
        assert_eq!(outcome.user.keycloak_id(), Some("abc-123"));
    }

    #[tokio::test]
    async fn missing_subject_is_rejected_without_writes() {
        let (backend, directory) = backend(MissingSubjectPolicy::Reject);
        let claims = ClaimSet::default().with("email", "alice@example.com");

        let err = backend.create_user(&claims).await.expect_err("rejected");

        assert_eq!(err, BackendError::MissingSubject);
        assert_eq!(directory.count().await.expect("count"), 0);
    }

    #[tokio::test]
    async fn missing_subject_can_store_null() {
        let (backend, _directory) = backend(MissingSubjectPolicy::StoreNull);
        let claims = ClaimSet::default().with("email", "alice@example.com");

        let user = backend.create_user(&claims).await.expect("create");
        assert!(user.keycloak_id().is_none());

        let relinked = backend
            .update_user(user, &alice("abc-123"))
            .await
            .expect("update");
        let unlinked = backend.update_user(relinked, &claims).await.expect("update");
        assert!(unlinked.keycloak_id().is_none());
    }

    #[tokio::test]
    async fn ambiguous_email_fails() {
        let (backend, directory) = backend(MissingSubjectPolicy::Reject);
        for name in ["one", "two"] {
            let user = User::new(name.to_string(), Some("alice@example.com".to_string()));
            directory.insert(&user).await.expect("insert");
        }

        let err = backend
            .authenticate(&alice("abc-123"))
            .await
            .expect_err("ambiguous");

        assert_eq!(err, BackendError::MultipleUsers { count: 2 });
    }

    #[tokio::test]
    async fn claims_without_email_are_rejected() {
        let (backend, directory) = backend(MissingSubjectPolicy::Reject);

        let err = backend
            .authenticate(&ClaimSet::default().with("sub", "abc-123"))
            .await
            .expect_err("rejected");

        assert!(matches!(err, BackendError::ClaimsRejected { .. }));
        assert_eq!(directory.count().await.expect("count"), 0);
    }

    #[tokio::test]
    async fn subject_taken_by_another_user_is_a_directory_error() {
        let (backend, _directory) = backend(MissingSubjectPolicy::Reject);
        backend.create_user(&alice("abc-123")).await.expect("create");

        let bob = ClaimSet::default()
            .with("sub", "abc-123")
            .with("email", "bob@example.com");
        let err = backend.create_user(&bob).await.expect_err("conflict");

        assert!(matches!(err, BackendError::Directory { .. }));
    }

    #[test]
    fn policies_parse_from_snake_case() {
        let policy: MissingSubjectPolicy =
            serde_json::from_str("\"store_null\"").expect("policy");
        assert_eq!(policy, MissingSubjectPolicy::StoreNull);
        let strategy: UsernameStrategy =
            serde_json::from_str("\"preferred_username\"").expect("strategy");
        assert_eq!(strategy, UsernameStrategy::PreferredUsername);
    }
}
