//! OIDC relying-party configuration for a Keycloak realm.
//!
//! Endpoints are not discovered. Keycloak publishes them at fixed paths
//! under the realm issuer, so they are derived by appending
//! `/protocol/openid-connect/{token,userinfo,certs,auth}`.
//!
//! Two issuers are involved. The back-channel issuer is the address this
//! server uses to reach Keycloak (token, userinfo and JWKS calls). The public
//! issuer is the address browsers are redirected to and the value Keycloak
//! puts in the `iss` claim. They only differ when Keycloak is reached over
//! an internal network, and the public one defaults to the back-channel one.

use serde::{Deserialize, Serialize};

use crate::backend::{MissingSubjectPolicy, UsernameStrategy};

const KEYCLOAK_OIDC_PATH: &str = "/protocol/openid-connect";

/// Provider endpoints derived from the configured issuers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeycloakEndpoints {
    /// Browser-facing authorization endpoint (public issuer).
    pub authorization: String,
    pub token: String,
    pub userinfo: String,
    /// JSON Web Key Set used to verify ID token signatures.
    pub jwks: String,
}

/// Relying-party configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OidcConfig {
    issuer: String,
    public_issuer: Option<String>,
    client_id: String,
    client_secret: String,
    /// Fixed callback URL. When unset it is derived from the request host.
    redirect_uri: Option<String>,
    /// Space separated scopes.
    #[serde(default = "default_scopes")]
    scopes: String,
    #[serde(default)]
    username_strategy: UsernameStrategy,
    #[serde(default)]
    missing_subject: MissingSubjectPolicy,
}

fn default_scopes() -> String {
    "openid profile email".to_string()
}

fn strip_trailing_slashes(url: &str) -> &str {
    url.trim_end_matches('/')
}

impl OidcConfig {
    /// Creates a configuration with defaults for the optional fields.
    #[must_use]
    pub fn new(issuer: String, client_id: String, client_secret: String) -> Self {
        Self {
            issuer,
            public_issuer: None,
            client_id,
            client_secret,
            redirect_uri: None,
            scopes: default_scopes(),
            username_strategy: UsernameStrategy::default(),
            missing_subject: MissingSubjectPolicy::default(),
        }
    }

    /// Creates a configuration builder for more customization.
    #[must_use]
    pub fn builder(issuer: String, client_id: String, client_secret: String) -> OidcConfigBuilder {
        OidcConfigBuilder {
            config: Self::new(issuer, client_id, client_secret),
        }
    }

    /// The back-channel issuer, without trailing slashes.
    #[must_use]
    pub fn issuer(&self) -> &str {
        strip_trailing_slashes(&self.issuer)
    }

    /// The browser-facing issuer, falling back to the back-channel issuer.
    #[must_use]
    pub fn public_issuer(&self) -> &str {
        match self.public_issuer.as_deref().map(strip_trailing_slashes) {
            Some(public) if !public.is_empty() => public,
            _ => self.issuer(),
        }
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    #[must_use]
    pub fn client_secret(&self) -> &str {
        &self.client_secret
    }

    #[must_use]
    pub fn redirect_uri(&self) -> Option<&str> {
        self.redirect_uri.as_deref()
    }

    /// Returns the scopes to request.
    #[must_use]
    pub fn scopes(&self) -> Vec<&str> {
        self.scopes.split_whitespace().collect()
    }

    /// Returns true if the `email` scope is requested.
    #[must_use]
    pub fn requests_email(&self) -> bool {
        self.scopes().contains(&"email")
    }

    #[must_use]
    pub fn username_strategy(&self) -> UsernameStrategy {
        self.username_strategy
    }

    #[must_use]
    pub fn missing_subject(&self) -> MissingSubjectPolicy {
        self.missing_subject
    }

    /// Derives the provider endpoints from the issuers.
    #[must_use]
    pub fn endpoints(&self) -> KeycloakEndpoints {
        let backchannel = format!("{}{}", self.issuer(), KEYCLOAK_OIDC_PATH);
        KeycloakEndpoints {
            authorization: format!("{}{}/auth", self.public_issuer(), KEYCLOAK_OIDC_PATH),
            token: format!("{backchannel}/token"),
            userinfo: format!("{backchannel}/userinfo"),
            jwks: format!("{backchannel}/certs"),
        }
    }
}

/// Builder for [`OidcConfig`].
#[derive(Debug)]
pub struct OidcConfigBuilder {
    config: OidcConfig,
}

impl OidcConfigBuilder {
    #[must_use]
    pub fn public_issuer(mut self, public_issuer: Option<String>) -> Self {
        self.config.public_issuer = public_issuer;
        self
    }

    #[must_use]
    pub fn redirect_uri(mut self, redirect_uri: Option<String>) -> Self {
        self.config.redirect_uri = redirect_uri;
        self
    }

    #[must_use]
    pub fn scopes(mut self, scopes: String) -> Self {
        self.config.scopes = scopes;
        self
    }

    #[must_use]
    pub fn username_strategy(mut self, strategy: UsernameStrategy) -> Self {
        self.config.username_strategy = strategy;
        self
    }

    #[must_use]
    pub fn missing_subject(mut self, policy: MissingSubjectPolicy) -> Self {
        self.config.missing_subject = policy;
        self
    }

    #[must_use]
    pub fn build(self) -> OidcConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(issuer: &str) -> OidcConfig {
        OidcConfig::new(
            issuer.to_string(),
            "portal".to_string(),
            "secret".to_string(),
        )
    }

    #[test]
    fn endpoints_follow_keycloak_layout() {
        let endpoints = config("http://keycloak:8080/realms/demo").endpoints();

        assert_eq!(
            endpoints.token,
            "http://keycloak:8080/realms/demo/protocol/openid-connect/token"
        );
        assert_eq!(
            endpoints.userinfo,
            "http://keycloak:8080/realms/demo/protocol/openid-connect/userinfo"
        );
        assert_eq!(
            endpoints.jwks,
            "http://keycloak:8080/realms/demo/protocol/openid-connect/certs"
        );
        assert_eq!(
            endpoints.authorization,
            "http://keycloak:8080/realms/demo/protocol/openid-connect/auth"
        );
    }

    #[test]
    fn trailing_slashes_are_stripped() {
        let config = config("http://keycloak:8080/realms/demo//");
        assert_eq!(config.issuer(), "http://keycloak:8080/realms/demo");
        assert!(
            config
                .endpoints()
                .token
                .starts_with("http://keycloak:8080/realms/demo/protocol")
        );
    }

    #[test]
    fn authorization_uses_public_issuer() {
        let config = OidcConfig::builder(
            "http://keycloak:8080/realms/demo".to_string(),
            "portal".to_string(),
            "secret".to_string(),
        )
        .public_issuer(Some("https://sso.example.com/realms/demo/".to_string()))
        .build();

        let endpoints = config.endpoints();
        assert_eq!(
            endpoints.authorization,
            "https://sso.example.com/realms/demo/protocol/openid-connect/auth"
        );
        assert_eq!(
            endpoints.token,
            "http://keycloak:8080/realms/demo/protocol/openid-connect/token"
        );
        assert_eq!(config.public_issuer(), "https://sso.example.com/realms/demo");
    }

    #[test]
    fn empty_public_issuer_falls_back() {
        let config = OidcConfig::builder(
            "http://keycloak:8080/realms/demo".to_string(),
            "portal".to_string(),
            "secret".to_string(),
        )
        .public_issuer(Some(String::new()))
        .build();

        assert_eq!(config.public_issuer(), "http://keycloak:8080/realms/demo");
    }

    #[test]
    fn default_scopes_request_email() {
        let config = config("http://kc/realms/demo");
        assert_eq!(config.scopes(), vec!["openid", "profile", "email"]);
        assert!(config.requests_email());
    }

    #[test]
    fn custom_scopes_without_email() {
        let config = OidcConfig::builder(
            "http://kc/realms/demo".to_string(),
            "portal".to_string(),
            "secret".to_string(),
        )
        .scopes("openid  profile".to_string())
        .build();

        assert_eq!(config.scopes(), vec!["openid", "profile"]);
        assert!(!config.requests_email());
    }
}
