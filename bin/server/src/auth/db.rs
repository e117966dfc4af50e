//! Postgres implementations of the user directory and session store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use sso_portal_core::{Result, UserId};
use sso_portal_identity::{DirectoryError, Session, SessionId, SessionStore, User, UserDirectory};
use std::str::FromStr;

/// Row type for user queries.
#[derive(FromRow)]
struct UserRow {
    id: String,
    username: String,
    email: Option<String>,
    keycloak_id: Option<String>,
    is_staff: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl UserRow {
    fn try_into_user(self) -> std::result::Result<User, DirectoryError> {
        let id = UserId::from_str(&self.id).map_err(|e| DirectoryError::Decode {
            details: format!("invalid user id '{}': {e}", self.id),
        })?;
        Ok(User::with_all_fields(
            id,
            self.username,
            self.email,
            self.keycloak_id,
            self.is_staff,
            self.created_at,
            self.updated_at,
        ))
    }
}

/// Row type for session queries.
#[derive(FromRow)]
struct SessionRow {
    id: String,
    user_id: String,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    access_token: Option<String>,
    refresh_token: Option<String>,
}

impl SessionRow {
    fn try_into_session(self) -> std::result::Result<Session, DirectoryError> {
        let user_id = UserId::from_str(&self.user_id).map_err(|e| DirectoryError::Decode {
            details: format!("invalid user id '{}': {e}", self.user_id),
        })?;
        Ok(Session::with_all_fields(
            SessionId::new(self.id),
            user_id,
            self.created_at,
            self.expires_at,
            self.access_token,
            self.refresh_token,
        ))
    }
}

fn storage_error(err: sqlx::Error) -> DirectoryError {
    DirectoryError::Storage {
        details: err.to_string(),
    }
}

/// Maps a failed user write, turning unique violations into conflicts.
fn user_write_error(err: sqlx::Error, user: &User) -> DirectoryError {
    let constraint = err
        .as_database_error()
        .filter(|db| db.is_unique_violation())
        .map(|db| db.constraint().unwrap_or_default().to_string());

    match constraint {
        Some(name) if name.contains("keycloak_id") => DirectoryError::Conflict {
            field: "keycloak_id",
            value: user.keycloak_id().unwrap_or_default().to_string(),
        },
        Some(name) if name.contains("username") => DirectoryError::Conflict {
            field: "username",
            value: user.username().to_string(),
        },
        Some(_) => DirectoryError::Conflict {
            field: "id",
            value: user.id().to_string(),
        },
        None => storage_error(err),
    }
}

/// User directory stored in the `users` table.
#[derive(Clone)]
pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, DirectoryError> {
        let row: Option<UserRow> = sqlx::query_as(
            r#"
            SELECT id, username, email, keycloak_id, is_staff, created_at, updated_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?;

        match row {
            Some(r) => Ok(Some(r.try_into_user()?)),
            None => Ok(None),
        }
    }

    async fn find_by_keycloak_id(
        &self,
        keycloak_id: &str,
    ) -> Result<Option<User>, DirectoryError> {
        let row: Option<UserRow> = sqlx::query_as(
            r#"
            SELECT id, username, email, keycloak_id, is_staff, created_at, updated_at
            FROM users
            WHERE keycloak_id = $1
            "#,
        )
        .bind(keycloak_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?;

        match row {
            Some(r) => Ok(Some(r.try_into_user()?)),
            None => Ok(None),
        }
    }

    async fn filter_by_email(&self, email: &str) -> Result<Vec<User>, DirectoryError> {
        let rows: Vec<UserRow> = sqlx::query_as(
            r#"
            SELECT id, username, email, keycloak_id, is_staff, created_at, updated_at
            FROM users
            WHERE LOWER(email) = LOWER($1)
            ORDER BY created_at
            "#,
        )
        .bind(email)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(rows
            .into_iter()
            .map(UserRow::try_into_user)
            .collect::<std::result::Result<_, _>>()?)
    }

    async fn insert(&self, user: &User) -> Result<(), DirectoryError> {
        sqlx::query(
            r#"
            INSERT INTO users (id, username, email, keycloak_id, is_staff, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(user.id().to_string())
        .bind(user.username())
        .bind(user.email())
        .bind(user.keycloak_id())
        .bind(user.is_staff())
        .bind(user.created_at())
        .bind(user.updated_at())
        .execute(&self.pool)
        .await
        .map_err(|e| user_write_error(e, user))?;

        Ok(())
    }

    async fn save(&self, user: &User) -> Result<(), DirectoryError> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET username = $2, email = $3, keycloak_id = $4, is_staff = $5, updated_at = $6
            WHERE id = $1
            "#,
        )
        .bind(user.id().to_string())
        .bind(user.username())
        .bind(user.email())
        .bind(user.keycloak_id())
        .bind(user.is_staff())
        .bind(user.updated_at())
        .execute(&self.pool)
        .await
        .map_err(|e| user_write_error(e, user))?;

        if result.rows_affected() == 0 {
            return Err(DirectoryError::NotFound {
                id: user.id().to_string(),
            }
            .into());
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<User>, DirectoryError> {
        let rows: Vec<UserRow> = sqlx::query_as(
            r#"
            SELECT id, username, email, keycloak_id, is_staff, created_at, updated_at
            FROM users
            ORDER BY created_at
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(rows
            .into_iter()
            .map(UserRow::try_into_user)
            .collect::<std::result::Result<_, _>>()?)
    }

    async fn count(&self) -> Result<u64, DirectoryError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await
            .map_err(storage_error)?;

        Ok(count.unsigned_abs())
    }
}

/// Session store backed by the `sessions` table.
#[derive(Clone)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn find_by_id(&self, id: &SessionId) -> Result<Option<Session>, DirectoryError> {
        let row: Option<SessionRow> = sqlx::query_as(
            r#"
            SELECT id, user_id, created_at, expires_at, access_token, refresh_token
            FROM sessions
            WHERE id = $1
            "#,
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?;

        match row {
            Some(r) => Ok(Some(r.try_into_session()?)),
            None => Ok(None),
        }
    }

    async fn create(&self, session: &Session) -> Result<(), DirectoryError> {
        sqlx::query(
            r#"
            INSERT INTO sessions (id, user_id, created_at, expires_at, access_token, refresh_token)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(session.id().as_str())
        .bind(session.user_id().to_string())
        .bind(session.created_at())
        .bind(session.expires_at())
        .bind(session.access_token())
        .bind(session.refresh_token())
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(())
    }

    async fn delete(&self, id: &SessionId) -> Result<(), DirectoryError> {
        sqlx::query("DELETE FROM sessions WHERE id = $1")
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;

        Ok(())
    }

    async fn delete_expired(&self) -> Result<u64, DirectoryError> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at < NOW()")
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;

        Ok(result.rows_affected())
    }
}
