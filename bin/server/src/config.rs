//! Centralized server configuration.
//!
//! Loaded via the `config` crate from environment variables. The variable
//! names are the ones the portal's deployment already uses (`DJANGO_*`,
//! `POSTGRES_*`, `OIDC_*`). Nested settings use `__` as separator, e.g.
//! `SESSION__COOKIE_AGE_MINUTES`.
//!
//! See [`OidcConfig`](sso_portal_identity::OidcConfig) for the relying-party
//! settings and how Keycloak endpoints are derived from the issuer.

use axum_extra::extract::cookie::Key;
use serde::Deserialize;
use sha2::{Digest, Sha512};
use sqlx::postgres::PgConnectOptions;
use sso_portal_identity::{MissingSubjectPolicy, OidcConfig, UsernameStrategy};
use std::collections::HashMap;

use crate::hosts::AllowedHosts;

/// Server configuration composed from the environment.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Key material for signing cookies. A random key is used when unset.
    pub secret_key: Option<String>,
    /// Verbose logging and error details in 500 responses.
    pub debug: bool,
    pub allowed_hosts: AllowedHosts,
    pub database: DatabaseConfig,
    /// Address the HTTP listener binds to.
    pub bind_address: String,
    pub session: SessionConfig,
    pub oidc: OidcConfig,
    /// Accept `GET /oidc/logout/` as well as `POST`.
    pub allow_logout_get: bool,
}

/// PostgreSQL connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub name: String,
    pub user: String,
    pub password: String,
    pub host: String,
    pub port: u16,
}

impl DatabaseConfig {
    /// Connection options for the pool.
    #[must_use]
    pub fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .password(&self.password)
            .database(&self.name)
    }
}

/// Session-related configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Lifetime of a login session and its cookie, in minutes.
    #[serde(default = "default_cookie_age_minutes")]
    pub cookie_age_minutes: i64,

    /// Interval between session cleanup runs, in seconds.
    #[serde(default = "default_cleanup_interval_seconds")]
    pub cleanup_interval_seconds: u64,

    /// Whether to set the Secure flag on cookies (requires HTTPS).
    #[serde(default)]
    pub secure_cookies: bool,
}

/// Longest accepted session lifetime, ten years in minutes.
const MAX_COOKIE_AGE_MINUTES: i64 = 10 * 365 * 24 * 60;

fn default_cookie_age_minutes() -> i64 {
    // Two weeks.
    14 * 24 * 60
}

fn default_cleanup_interval_seconds() -> u64 {
    300
}

impl SessionConfig {
    /// Rejects values that would break session handling at runtime.
    ///
    /// # Errors
    ///
    /// Returns an error for a lifetime outside one minute to ten years, or a
    /// zero cleanup interval.
    pub fn validate(&self) -> Result<(), config::ConfigError> {
        if !(1..=MAX_COOKIE_AGE_MINUTES).contains(&self.cookie_age_minutes) {
            return Err(config::ConfigError::Message(format!(
                "SESSION__COOKIE_AGE_MINUTES must be between 1 and {MAX_COOKIE_AGE_MINUTES}, got {}",
                self.cookie_age_minutes
            )));
        }
        if self.cleanup_interval_seconds == 0 {
            return Err(config::ConfigError::Message(
                "SESSION__CLEANUP_INTERVAL_SECONDS must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_age_minutes: default_cookie_age_minutes(),
            cleanup_interval_seconds: default_cleanup_interval_seconds(),
            secure_cookies: false,
        }
    }
}

/// Raw environment, one field per variable.
#[derive(Debug, Deserialize)]
struct EnvSettings {
    django_secret_key: Option<String>,
    django_debug: Option<String>,
    #[serde(default = "default_allowed_hosts")]
    allowed_hosts: String,
    #[serde(default = "default_postgres_db")]
    postgres_db: String,
    #[serde(default = "default_postgres_user")]
    postgres_user: String,
    #[serde(default = "default_postgres_password")]
    postgres_password: String,
    #[serde(default = "default_postgres_host")]
    postgres_host: String,
    #[serde(default = "default_postgres_port")]
    postgres_port: u16,
    #[serde(default)]
    oidc_rp_client_id: String,
    #[serde(default)]
    oidc_rp_client_secret: String,
    #[serde(default)]
    oidc_op_issuer: String,
    oidc_public_op_issuer: Option<String>,
    oidc_rp_scopes: Option<String>,
    oidc_rp_redirect_uri: Option<String>,
    #[serde(default)]
    oidc_username_strategy: UsernameStrategy,
    #[serde(default)]
    oidc_missing_subject: MissingSubjectPolicy,
    #[serde(default = "default_bind_address")]
    bind_address: String,
    #[serde(default)]
    session: SessionConfig,
    #[serde(default)]
    allow_logout_get_method: bool,
}

fn default_allowed_hosts() -> String {
    "*".to_string()
}

fn default_postgres_db() -> String {
    "djangoapp".to_string()
}

fn default_postgres_user() -> String {
    "django".to_string()
}

fn default_postgres_password() -> String {
    "django".to_string()
}

fn default_postgres_host() -> String {
    "django-db".to_string()
}

fn default_postgres_port() -> u16 {
    5432
}

fn default_bind_address() -> String {
    "0.0.0.0:8000".to_string()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl ServerConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration is missing or invalid.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        Self::load(config::Environment::default().separator("__"))
    }

    /// Loads configuration from an explicit variable map instead of the
    /// process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration is missing or invalid.
    pub fn from_env_map(vars: HashMap<String, String>) -> Result<Self, config::ConfigError> {
        Self::load(
            config::Environment::default()
                .separator("__")
                .source(Some(vars)),
        )
    }

    fn load(source: config::Environment) -> Result<Self, config::ConfigError> {
        let env: EnvSettings = config::Config::builder()
            .add_source(source)
            .build()?
            .try_deserialize()?;
        Self::from_settings(env)
    }

    fn from_settings(env: EnvSettings) -> Result<Self, config::ConfigError> {
        if env.oidc_op_issuer.trim().is_empty() {
            return Err(config::ConfigError::Message(
                "OIDC_OP_ISSUER is required".to_string(),
            ));
        }
        env.session.validate()?;

        let mut oidc = OidcConfig::builder(
            env.oidc_op_issuer,
            env.oidc_rp_client_id,
            env.oidc_rp_client_secret,
        )
        .public_issuer(non_empty(env.oidc_public_op_issuer))
        .redirect_uri(non_empty(env.oidc_rp_redirect_uri))
        .username_strategy(env.oidc_username_strategy)
        .missing_subject(env.oidc_missing_subject);
        if let Some(scopes) = non_empty(env.oidc_rp_scopes) {
            oidc = oidc.scopes(scopes);
        }

        Ok(Self {
            secret_key: non_empty(env.django_secret_key),
            debug: env.django_debug.as_deref() == Some("1"),
            allowed_hosts: AllowedHosts::parse(&env.allowed_hosts),
            database: DatabaseConfig {
                name: env.postgres_db,
                user: env.postgres_user,
                password: env.postgres_password,
                host: env.postgres_host,
                port: env.postgres_port,
            },
            bind_address: env.bind_address,
            session: env.session,
            oidc: oidc.build(),
            allow_logout_get: env.allow_logout_get_method,
        })
    }

    /// Default log filter when `RUST_LOG` is unset.
    #[must_use]
    pub fn default_log_filter(&self) -> &'static str {
        if self.debug {
            "debug"
        } else {
            "info,tower_http=debug"
        }
    }

    /// Derives the cookie signing key from the secret key.
    ///
    /// Without a secret key every process start invalidates existing
    /// sessions.
    #[must_use]
    pub fn cookie_key(&self) -> Key {
        cookie_key(self.secret_key.as_deref())
    }
}

/// Builds a signing key from arbitrary secret material.
#[must_use]
pub fn cookie_key(secret: Option<&str>) -> Key {
    match secret {
        Some(secret) => Key::from(Sha512::digest(secret.as_bytes()).as_slice()),
        None => Key::generate(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    fn minimal() -> Vec<(&'static str, &'static str)> {
        vec![("OIDC_OP_ISSUER", "http://keycloak:8080/realms/demo")]
    }

    #[test]
    fn session_config_has_correct_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.cookie_age_minutes, 20160);
        assert_eq!(config.cleanup_interval_seconds, 300);
        assert!(!config.secure_cookies);
    }

    #[test]
    fn issuer_is_required() {
        let err = ServerConfig::from_env_map(vars(&[])).expect_err("missing issuer");
        assert!(err.to_string().contains("OIDC_OP_ISSUER"));
    }

    #[test]
    fn defaults_apply() {
        let config = ServerConfig::from_env_map(vars(&minimal())).expect("config");

        assert!(!config.debug);
        assert!(config.secret_key.is_none());
        assert_eq!(config.bind_address, "0.0.0.0:8000");
        assert_eq!(
            config.database,
            DatabaseConfig {
                name: "djangoapp".to_string(),
                user: "django".to_string(),
                password: "django".to_string(),
                host: "django-db".to_string(),
                port: 5432,
            }
        );
        assert!(config.allowed_hosts.allows("anything.example"));
        assert_eq!(
            config.oidc.public_issuer(),
            "http://keycloak:8080/realms/demo"
        );
        assert_eq!(config.oidc.scopes(), vec!["openid", "profile", "email"]);
        assert_eq!(config.default_log_filter(), "info,tower_http=debug");
        assert!(!config.allow_logout_get);
    }

    #[test]
    fn reads_portal_variables() {
        let mut pairs = minimal();
        pairs.extend([
            ("DJANGO_SECRET_KEY", "s3cret"),
            ("DJANGO_DEBUG", "1"),
            ("ALLOWED_HOSTS", "portal.example.com,.internal"),
            ("POSTGRES_DB", "portal"),
            ("POSTGRES_PASSWORD", "007"),
            ("POSTGRES_PORT", "6543"),
            ("OIDC_RP_CLIENT_ID", "portal"),
            ("OIDC_RP_CLIENT_SECRET", "shh"),
            ("OIDC_PUBLIC_OP_ISSUER", "https://sso.example.com/realms/demo"),
            ("OIDC_MISSING_SUBJECT", "store_null"),
            ("OIDC_USERNAME_STRATEGY", "preferred_username"),
            ("SESSION__COOKIE_AGE_MINUTES", "60"),
            ("SESSION__SECURE_COOKIES", "true"),
            ("ALLOW_LOGOUT_GET_METHOD", "true"),
        ]);

        let config = ServerConfig::from_env_map(vars(&pairs)).expect("config");

        assert!(config.debug);
        assert_eq!(config.secret_key.as_deref(), Some("s3cret"));
        assert_eq!(config.database.name, "portal");
        assert_eq!(config.database.password, "007");
        assert_eq!(config.database.port, 6543);
        assert!(config.allowed_hosts.allows("portal.example.com"));
        assert!(config.allowed_hosts.allows("db.internal"));
        assert!(!config.allowed_hosts.allows("evil.example.com"));
        assert_eq!(config.oidc.client_id(), "portal");
        assert_eq!(config.oidc.client_secret(), "shh");
        assert_eq!(
            config.oidc.public_issuer(),
            "https://sso.example.com/realms/demo"
        );
        assert_eq!(config.oidc.missing_subject(), MissingSubjectPolicy::StoreNull);
        assert_eq!(
            config.oidc.username_strategy(),
            UsernameStrategy::PreferredUsername
        );
        assert_eq!(config.session.cookie_age_minutes, 60);
        assert!(config.session.secure_cookies);
        assert!(config.allow_logout_get);
        assert_eq!(config.default_log_filter(), "debug");
    }

    #[test]
    fn zero_cleanup_interval_is_rejected() {
        let mut pairs = minimal();
        pairs.push(("SESSION__CLEANUP_INTERVAL_SECONDS", "0"));

        let err = ServerConfig::from_env_map(vars(&pairs)).expect_err("invalid");
        assert!(err.to_string().contains("CLEANUP_INTERVAL_SECONDS"));
    }

    #[test]
    fn cookie_age_out_of_range_is_rejected() {
        for age in ["0", "-5", "9223372036854775807"] {
            let mut pairs = minimal();
            pairs.push(("SESSION__COOKIE_AGE_MINUTES", age));

            let err = ServerConfig::from_env_map(vars(&pairs)).expect_err("invalid");
            assert!(err.to_string().contains("COOKIE_AGE_MINUTES"), "{age}: {err}");
        }
    }

    #[test]
    fn longest_cookie_age_is_accepted() {
        let config = SessionConfig {
            cookie_age_minutes: MAX_COOKIE_AGE_MINUTES,
            ..SessionConfig::default()
        };
        assert!(config.validate().is_ok());
        assert!(chrono::Duration::try_minutes(MAX_COOKIE_AGE_MINUTES).is_some());
    }

    #[test]
    fn debug_only_for_exactly_one() {
        let mut pairs = minimal();
        pairs.push(("DJANGO_DEBUG", "true"));
        let config = ServerConfig::from_env_map(vars(&pairs)).expect("config");
        assert!(!config.debug);
    }

    #[test]
    fn same_secret_gives_same_key() {
        let a = cookie_key(Some("secret"));
        let b = cookie_key(Some("secret"));
        let c = cookie_key(Some("other"));
        assert_eq!(a.master(), b.master());
        assert_ne!(a.master(), c.master());
    }
}
