//! Storage seams for users and sessions.
//!
//! The server provides Postgres implementations. The in-memory ones here
//! enforce the same uniqueness rules and back the tests.

use async_trait::async_trait;
use sso_portal_core::{Result, UserId};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::error::DirectoryError;
use crate::session::{Session, SessionId};
use crate::user::User;

/// Persistent store of [`User`] records.
///
/// `username` is unique. `keycloak_id` is unique among users that have one.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, DirectoryError>;

    /// Returns the user linked to a Keycloak subject.
    async fn find_by_keycloak_id(&self, keycloak_id: &str)
    -> Result<Option<User>, DirectoryError>;

    /// Returns every user whose email matches, ignoring case.
    async fn filter_by_email(&self, email: &str) -> Result<Vec<User>, DirectoryError>;

    /// Inserts a new user.
    async fn insert(&self, user: &User) -> Result<(), DirectoryError>;

    /// Writes all mutable fields of an existing user.
    async fn save(&self, user: &User) -> Result<(), DirectoryError>;

    /// Lists users ordered by creation time.
    async fn list(&self) -> Result<Vec<User>, DirectoryError>;

    async fn count(&self) -> Result<u64, DirectoryError>;
}

/// Persistent store of login [`Session`]s.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn find_by_id(&self, id: &SessionId) -> Result<Option<Session>, DirectoryError>;

    async fn create(&self, session: &Session) -> Result<(), DirectoryError>;

    async fn delete(&self, id: &SessionId) -> Result<(), DirectoryError>;

    /// Deletes expired sessions and returns how many were removed.
    async fn delete_expired(&self) -> Result<u64, DirectoryError>;
}

/// In-memory [`UserDirectory`].
#[derive(Default)]
pub struct MemoryUserDirectory {
    users: RwLock<HashMap<UserId, User>>,
}

impl MemoryUserDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn check_unique(users: &HashMap<UserId, User>, user: &User) -> Result<(), DirectoryError> {
        for other in users.values().filter(|u| u.id() != user.id()) {
            if other.username() == user.username() {
                return Err(DirectoryError::Conflict {
                    field: "username",
                    value: user.username().to_string(),
                }
                .into());
            }
            if let (Some(mine), Some(theirs)) = (user.keycloak_id(), other.keycloak_id()) {
                if mine == theirs {
                    return Err(DirectoryError::Conflict {
                        field: "keycloak_id",
                        value: mine.to_string(),
                    }
                    .into());
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, DirectoryError> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn find_by_keycloak_id(
        &self,
        keycloak_id: &str,
    ) -> Result<Option<User>, DirectoryError> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|u| u.keycloak_id() == Some(keycloak_id))
            .cloned())
    }

    async fn filter_by_email(&self, email: &str) -> Result<Vec<User>, DirectoryError> {
        let users = self.users.read().await;
        let mut matches: Vec<User> = users
            .values()
            .filter(|u| u.email().is_some_and(|e| e.eq_ignore_ascii_case(email)))
            .cloned()
            .collect();
        matches.sort_by_key(User::created_at);
        Ok(matches)
    }

    async fn insert(&self, user: &User) -> Result<(), DirectoryError> {
        let mut users = self.users.write().await;
        if users.contains_key(&user.id()) {
            return Err(DirectoryError::Conflict {
                field: "id",
                value: user.id().to_string(),
            }
            .into());
        }
        Self::check_unique(&users, user)?;
        users.insert(user.id(), user.clone());
        Ok(())
    }

    async fn save(&self, user: &User) -> Result<(), DirectoryError> {
        let mut users = self.users.write().await;
        if !users.contains_key(&user.id()) {
            return Err(DirectoryError::NotFound {
                id: user.id().to_string(),
            }
            .into());
        }
        Self::check_unique(&users, user)?;
        users.insert(user.id(), user.clone());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<User>, DirectoryError> {
        let mut users: Vec<User> = self.users.read().await.values().cloned().collect();
        users.sort_by_key(User::created_at);
        Ok(users)
    }

    async fn count(&self) -> Result<u64, DirectoryError> {
        Ok(self.users.read().await.len() as u64)
    }
}

/// In-memory [`SessionStore`].
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<SessionId, Session>>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn find_by_id(&self, id: &SessionId) -> Result<Option<Session>, DirectoryError> {
        Ok(self.sessions.read().await.get(id).cloned())
    }

    async fn create(&self, session: &Session) -> Result<(), DirectoryError> {
        self.sessions
            .write()
            .await
            .insert(session.id().clone(), session.clone());
        Ok(())
    }

    async fn delete(&self, id: &SessionId) -> Result<(), DirectoryError> {
        self.sessions.write().await.remove(id);
        Ok(())
    }

    async fn delete_expired(&self) -> Result<u64, DirectoryError> {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_expired());
        Ok((before - sessions.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn user(username: &str, email: &str) -> User {
        User::new(username.to_string(), Some(email.to_string()))
    }

    #[tokio::test]
    async fn insert_and_find() {
        let dir = MemoryUserDirectory::new();
        let alice = user("alice", "alice@example.com");
        dir.insert(&alice).await.expect("insert");

        let found = dir.find_by_id(alice.id()).await.expect("find");
        assert_eq!(found, Some(alice));
        assert_eq!(dir.count().await.expect("count"), 1);
    }

    #[tokio::test]
    async fn email_filter_ignores_case() {
        let dir = MemoryUserDirectory::new();
        dir.insert(&user("alice", "Alice@Example.com"))
            .await
            .expect("insert");
        dir.insert(&user("bob", "bob@example.com")).await.expect("insert");

        let found = dir
            .filter_by_email("alice@example.COM")
            .await
            .expect("filter");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].username(), "alice");
    }

    #[tokio::test]
    async fn duplicate_username_conflicts() {
        let dir = MemoryUserDirectory::new();
        dir.insert(&user("alice", "a@example.com")).await.expect("insert");

        let err = dir
            .insert(&user("alice", "other@example.com"))
            .await
            .expect_err("conflict");
        assert!(err.to_string().contains("username"));
        assert_eq!(dir.count().await.expect("count"), 1);
    }

    #[tokio::test]
    async fn duplicate_keycloak_id_conflicts() {
        let dir = MemoryUserDirectory::new();
        let mut alice = user("alice", "a@example.com");
        alice.set_keycloak_id(Some("sub-1".to_string()));
        dir.insert(&alice).await.expect("insert");

        let mut bob = user("bob", "b@example.com");
        dir.insert(&bob).await.expect("insert");
        bob.set_keycloak_id(Some("sub-1".to_string()));

        let err = dir.save(&bob).await.expect_err("conflict");
        assert!(err.to_string().contains("keycloak_id"));
    }

    #[tokio::test]
    async fn find_by_keycloak_id_returns_linked_user() {
        let dir = MemoryUserDirectory::new();
        let mut alice = user("alice", "a@example.com");
        alice.set_keycloak_id(Some("sub-1".to_string()));
        dir.insert(&alice).await.expect("insert");
        dir.insert(&user("bob", "b@example.com")).await.expect("insert");

        let found = dir.find_by_keycloak_id("sub-1").await.expect("find");
        assert_eq!(found.map(|u| u.id()), Some(alice.id()));
        assert!(dir.find_by_keycloak_id("sub-2").await.expect("find").is_none());
    }

    #[tokio::test]
    async fn users_without_keycloak_id_do_not_conflict() {
        let dir = MemoryUserDirectory::new();
        dir.insert(&user("alice", "a@example.com")).await.expect("insert");
        dir.insert(&user("bob", "b@example.com")).await.expect("insert");
        assert_eq!(dir.count().await.expect("count"), 2);
    }

    #[tokio::test]
    async fn saving_unknown_user_fails() {
        let dir = MemoryUserDirectory::new();
        let err = dir
            .save(&user("ghost", "g@example.com"))
            .await
            .expect_err("not found");
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn expired_sessions_are_purged() {
        let store = MemorySessionStore::new();
        let live = Session::new(SessionId::generate(), UserId::new(), Duration::hours(1));
        let dead = Session::new(SessionId::generate(), UserId::new(), Duration::seconds(-1));
        store.create(&live).await.expect("create");
        store.create(&dead).await.expect("create");

        assert_eq!(store.delete_expired().await.expect("purge"), 1);
        assert!(store.find_by_id(live.id()).await.expect("find").is_some());
        assert!(store.find_by_id(dead.id()).await.expect("find").is_none());
    }

    #[tokio::test]
    async fn delete_removes_session() {
        let store = MemorySessionStore::new();
        let session = Session::new(SessionId::generate(), UserId::new(), Duration::hours(1));
        store.create(&session).await.expect("create");
        store.delete(session.id()).await.expect("delete");
        assert!(store.find_by_id(session.id()).await.expect("find").is_none());
    }
}
