//! OIDC client implementation using the openidconnect crate.
//!
//! Provider metadata is assembled from the Keycloak endpoint layout instead
//! of being discovered. The JSON Web Key Set is cached and fetched again
//! whenever an ID token names a key the cache does not hold.

use openidconnect::core::{
    CoreAuthenticationFlow, CoreClient, CoreIdToken, CoreJsonWebKeySet, CoreJwsSigningAlgorithm,
    CoreProviderMetadata, CoreResponseType, CoreSubjectIdentifierType,
};
use openidconnect::{
    AuthUrl, AuthorizationCode, ClaimsVerificationError, ClientId, ClientSecret, CsrfToken,
    EmptyAdditionalProviderMetadata, EndpointMaybeSet, EndpointNotSet, EndpointSet, IssuerUrl,
    JsonWebKeySetUrl, Nonce, OAuth2TokenResponse, PkceCodeChallenge, PkceCodeVerifier,
    RedirectUrl, ResponseTypes, Scope, SignatureVerificationError, TokenResponse, TokenUrl,
    UserInfoUrl,
};
use serde::{Deserialize, Serialize};
use sso_portal_identity::{ClaimSet, KeycloakEndpoints, OidcConfig};
use tokio::sync::RwLock;

type ProviderClient = CoreClient<
    EndpointSet,
    EndpointNotSet,
    EndpointNotSet,
    EndpointNotSet,
    EndpointMaybeSet,
    EndpointMaybeSet,
>;

/// OIDC client for authenticating users against Keycloak.
pub struct OidcClient {
    provider_metadata: CoreProviderMetadata,
    /// Provider signing keys, replaced on refresh.
    signing_keys: RwLock<CoreJsonWebKeySet>,
    client_id: ClientId,
    client_secret: ClientSecret,
    endpoints: KeycloakEndpoints,
    http_client: reqwest::Client,
    config: OidcConfig,
}

/// Data needed to complete the OIDC callback.
///
/// Kept in a signed cookie between the redirect to Keycloak and the
/// callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthState {
    pub csrf_token: String,
    pub pkce_verifier: String,
    pub nonce: String,
    /// Redirect URI sent with the authorization request. The token request
    /// must repeat it.
    pub redirect_uri: String,
    /// Local path to return to after login.
    pub next: Option<String>,
}

/// Result of a successful token exchange.
#[derive(Debug)]
pub struct TokenResult {
    /// Claims returned by the userinfo endpoint.
    pub claims: ClaimSet,
    pub access_token: String,
    pub refresh_token: Option<String>,
}

fn http_client() -> Result<reqwest::Client, OidcError> {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .map_err(|e| OidcError::Configuration(format!("failed to create HTTP client: {e}")))
}

async fn fetch_signing_keys(
    endpoints: &KeycloakEndpoints,
    http_client: &reqwest::Client,
) -> Result<CoreJsonWebKeySet, OidcError> {
    let jwks_url = JsonWebKeySetUrl::new(endpoints.jwks.clone())
        .map_err(|e| OidcError::Configuration(format!("invalid JWKS endpoint: {e}")))?;

    CoreJsonWebKeySet::fetch_async(&jwks_url, http_client)
        .await
        .map_err(|e| OidcError::KeyFetch(format!("failed to fetch {}: {e}", endpoints.jwks)))
}

fn verified_subject(
    client: &ProviderClient,
    id_token: &CoreIdToken,
    nonce: &Nonce,
) -> Result<String, ClaimsVerificationError> {
    id_token
        .claims(&client.id_token_verifier(), nonce)
        .map(|claims| claims.subject().as_str().to_string())
}

fn provider_metadata(
    config: &OidcConfig,
    endpoints: &KeycloakEndpoints,
) -> Result<CoreProviderMetadata, OidcError> {
    let invalid = |what: &str, e: openidconnect::url::ParseError| {
        OidcError::Configuration(format!("invalid {what}: {e}"))
    };

    // Keycloak puts the browser-facing issuer in the `iss` claim.
    let issuer =
        IssuerUrl::new(config.public_issuer().to_string()).map_err(|e| invalid("issuer URL", e))?;
    let auth_url = AuthUrl::new(endpoints.authorization.clone())
        .map_err(|e| invalid("authorization endpoint", e))?;
    let jwks_url =
        JsonWebKeySetUrl::new(endpoints.jwks.clone()).map_err(|e| invalid("JWKS endpoint", e))?;
    let token_url =
        TokenUrl::new(endpoints.token.clone()).map_err(|e| invalid("token endpoint", e))?;
    let userinfo_url = UserInfoUrl::new(endpoints.userinfo.clone())
        .map_err(|e| invalid("userinfo endpoint", e))?;

    Ok(CoreProviderMetadata::new(
        issuer,
        auth_url,
        jwks_url,
        vec![ResponseTypes::new(vec![CoreResponseType::Code])],
        vec![CoreSubjectIdentifierType::Public],
        vec![CoreJwsSigningAlgorithm::RsaSsaPkcs1V15Sha256],
        EmptyAdditionalProviderMetadata {},
    )
    .set_token_endpoint(Some(token_url))
    .set_userinfo_endpoint(Some(userinfo_url)))
}

impl OidcClient {
    /// Creates a client with an already known key set.
    pub fn new(config: OidcConfig, jwks: CoreJsonWebKeySet) -> Result<Self, OidcError> {
        let endpoints = config.endpoints();
        let provider_metadata = provider_metadata(&config, &endpoints)?;

        Ok(Self {
            provider_metadata,
            signing_keys: RwLock::new(jwks),
            client_id: ClientId::new(config.client_id().to_string()),
            client_secret: ClientSecret::new(config.client_secret().to_string()),
            endpoints,
            http_client: http_client()?,
            config,
        })
    }

    /// Creates a client and tries to fetch the provider's signing keys.
    ///
    /// An unreachable provider is not fatal: the keys are fetched again at
    /// the first login.
    pub async fn connect(config: OidcConfig) -> Result<Self, OidcError> {
        let client = Self::new(config, CoreJsonWebKeySet::new(Vec::new()))?;

        match client.refresh_signing_keys().await {
            Ok(keys) => tracing::info!(
                jwks_uri = %client.endpoints.jwks,
                keys = keys.keys().len(),
                "fetched provider signing keys"
            ),
            Err(e) => tracing::warn!(error = %e, "provider signing keys unavailable"),
        }
        Ok(client)
    }

    /// Fetches the provider's signing keys and replaces the cached set.
    pub async fn refresh_signing_keys(&self) -> Result<CoreJsonWebKeySet, OidcError> {
        let keys = fetch_signing_keys(&self.endpoints, &self.http_client).await?;
        *self.signing_keys.write().await = keys.clone();
        Ok(keys)
    }

    fn client(
        &self,
        redirect_uri: &str,
        signing_keys: CoreJsonWebKeySet,
    ) -> Result<ProviderClient, OidcError> {
        let redirect_url = RedirectUrl::new(redirect_uri.to_string())
            .map_err(|e| OidcError::Configuration(format!("invalid redirect URI: {e}")))?;

        Ok(CoreClient::from_provider_metadata(
            self.provider_metadata.clone().set_jwks(signing_keys),
            self.client_id.clone(),
            Some(self.client_secret.clone()),
        )
        .set_redirect_uri(redirect_url))
    }

    /// Generates the authorization URL for redirecting the user.
    pub fn authorization_url(
        &self,
        redirect_uri: &str,
        next: Option<String>,
    ) -> Result<(String, AuthState), OidcError> {
        // Building the request does not need the signing keys.
        let client = self.client(redirect_uri, CoreJsonWebKeySet::new(Vec::new()))?;
        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();

        let mut auth_request = client
            .authorize_url(
                CoreAuthenticationFlow::AuthorizationCode,
                CsrfToken::new_random,
                Nonce::new_random,
            )
            .set_pkce_challenge(pkce_challenge);

        for scope in self.config.scopes().into_iter().filter(|s| *s != "openid") {
            auth_request = auth_request.add_scope(Scope::new(scope.to_string()));
        }

        let (auth_url, csrf_token, nonce) = auth_request.url();

        let state = AuthState {
            csrf_token: csrf_token.secret().clone(),
            pkce_verifier: pkce_verifier.secret().clone(),
            nonce: nonce.secret().clone(),
            redirect_uri: redirect_uri.to_string(),
            next,
        };

        Ok((auth_url.to_string(), state))
    }

    /// Exchanges the authorization code, verifies the ID token and fetches
    /// the user's claims from the userinfo endpoint.
    pub async fn exchange_code(
        &self,
        code: &str,
        state: &AuthState,
    ) -> Result<TokenResult, OidcError> {
        let signing_keys = self.signing_keys.read().await.clone();
        let client = self.client(&state.redirect_uri, signing_keys)?;

        let token_response = client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .map_err(|e| OidcError::TokenExchange(format!("token endpoint error: {e}")))?
            .set_pkce_verifier(PkceCodeVerifier::new(state.pkce_verifier.clone()))
            .request_async(&self.http_client)
            .await
            .map_err(|e| OidcError::TokenExchange(format!("token exchange failed: {e}")))?;

        let id_token = token_response
            .id_token()
            .ok_or_else(|| OidcError::TokenExchange("no ID token in response".to_string()))?;

        let nonce = Nonce::new(state.nonce.clone());
        let subject = match verified_subject(&client, id_token, &nonce) {
            Err(ClaimsVerificationError::SignatureVerification(
                SignatureVerificationError::NoMatchingKey,
            )) => {
                tracing::info!("ID token signed with an unknown key, refreshing signing keys");
                let signing_keys = self.refresh_signing_keys().await?;
                let client = self.client(&state.redirect_uri, signing_keys)?;
                verified_subject(&client, id_token, &nonce)
            }
            verified => verified,
        }
        .map_err(|e| OidcError::TokenValidation(format!("ID token validation failed: {e}")))?;

        let access_token = token_response.access_token().secret().clone();
        let claims = self.fetch_userinfo(&access_token).await?;

        if let Some(userinfo_subject) = claims.subject() {
            if userinfo_subject != subject {
                return Err(OidcError::TokenValidation(
                    "userinfo subject does not match ID token".to_string(),
                ));
            }
        }

        Ok(TokenResult {
            claims,
            access_token,
            refresh_token: token_response.refresh_token().map(|t| t.secret().clone()),
        })
    }

    async fn fetch_userinfo(&self, access_token: &str) -> Result<ClaimSet, OidcError> {
        let response = self
            .http_client
            .get(&self.endpoints.userinfo)
            .bearer_auth(access_token)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| OidcError::UserInfo(format!("userinfo request failed: {e}")))?;

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| OidcError::UserInfo(format!("invalid userinfo response: {e}")))?;

        ClaimSet::from_value(body)
            .ok_or_else(|| OidcError::UserInfo("userinfo response is not an object".to_string()))
    }

    /// Returns the configuration.
    pub fn config(&self) -> &OidcConfig {
        &self.config
    }

    pub fn endpoints(&self) -> &KeycloakEndpoints {
        &self.endpoints
    }
}

/// OIDC-related errors.
#[derive(Debug)]
pub enum OidcError {
    /// Configuration error (invalid URLs, etc.)
    Configuration(String),
    /// Failed to fetch the provider's signing keys.
    KeyFetch(String),
    /// Token exchange failed.
    TokenExchange(String),
    /// Token validation failed.
    TokenValidation(String),
    /// The userinfo endpoint failed.
    UserInfo(String),
}

impl std::fmt::Display for OidcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Configuration(msg) => write!(f, "OIDC configuration error: {msg}"),
            Self::KeyFetch(msg) => write!(f, "OIDC key fetch error: {msg}"),
            Self::TokenExchange(msg) => write!(f, "OIDC token exchange error: {msg}"),
            Self::TokenValidation(msg) => write!(f, "OIDC token validation error: {msg}"),
            Self::UserInfo(msg) => write!(f, "OIDC userinfo error: {msg}"),
        }
    }
}

impl std::error::Error for OidcError {}
