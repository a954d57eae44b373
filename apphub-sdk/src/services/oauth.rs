//! OAuth2 / OIDC client for the hub.
//!
//! One `AuthClient` is built per process and shared (it is cheap to clone).
//! Endpoint resolution happens once: the first caller runs discovery, any
//! concurrent callers wait on the same attempt, and the outcome (discovered
//! or fallen back to defaults) is kept for the life of the client.

use apphub_core::utils::{pkce_challenge, secure_random_hex};
use chrono::{DateTime, Utc};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::instrument;
use validator::Validate;

use crate::config::SdkConfig;
use crate::services::context::TenantContext;
use crate::services::discovery::{fetch_discovery_document, HubEndpoints};
use crate::services::error::SdkError;
use crate::services::token::{JwksCache, KeySource, TokenValidation, TokenVerifier, VerifyOptions};

pub const DEFAULT_SCOPES: &[&str] = &["openid", "profile", "email"];

const STATE_BYTES: usize = 16;
const NONCE_BYTES: usize = 16;
const CODE_VERIFIER_BYTES: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryStatus {
    /// Nothing has resolved endpoints yet.
    Pending,
    Discovered,
    /// Discovery failed; default endpoints are in use for good.
    Fallback,
    /// Discovery is switched off in configuration.
    Static,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenTypeHint {
    AccessToken,
    RefreshToken,
}

impl TokenTypeHint {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenTypeHint::AccessToken => "access_token",
            TokenTypeHint::RefreshToken => "refresh_token",
        }
    }
}

/// Token endpoint response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    /// Computed on receipt from `expires_in`.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl TokenSet {
    /// An `expires_in` too large to represent leaves `expires_at` unset.
    fn stamp_expiry(mut self, received_at: DateTime<Utc>) -> Self {
        self.expires_at = self
            .expires_in
            .and_then(chrono::Duration::try_seconds)
            .and_then(|lifetime| received_at.checked_add_signed(lifetime));
        self
    }

    /// True once `expires_at` is within `margin` of now. Sets without an
    /// expiry never report expired.
    pub fn expires_within(&self, margin: Duration) -> bool {
        let margin = chrono::Duration::from_std(margin).unwrap_or_else(|_| chrono::Duration::zero());
        self.expires_at.map_or(false, |expires_at| {
            expires_at
                .checked_sub_signed(margin)
                .map_or(true, |threshold| threshold <= Utc::now())
        })
    }

    pub fn is_expired(&self) -> bool {
        self.expires_within(Duration::ZERO)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntrospectionResponse {
    pub active: bool,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub exp: Option<i64>,
    #[serde(default)]
    pub iat: Option<i64>,
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub aud: Option<Value>,
    #[serde(default)]
    pub iss: Option<String>,
    /// Hub-specific fields (entity, role, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserInfo {
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub email_verified: Option<bool>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct OAuthErrorBody {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Inputs for [`AuthClient::create_authorization_url`]. Anything left unset
/// is generated or taken from configuration.
#[derive(Debug, Clone, Default)]
pub struct AuthorizationUrlOptions {
    pub redirect_uri: Option<String>,
    pub scopes: Option<Vec<String>>,
    pub state: Option<String>,
    pub code_verifier: Option<String>,
    pub nonce: Option<String>,
    pub prompt: Option<String>,
}

impl AuthorizationUrlOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn redirect_uri(mut self, redirect_uri: impl Into<String>) -> Self {
        self.redirect_uri = Some(redirect_uri.into());
        self
    }

    pub fn scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = Some(scopes.into_iter().map(Into::into).collect());
        self
    }

    pub fn state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    pub fn code_verifier(mut self, code_verifier: impl Into<String>) -> Self {
        self.code_verifier = Some(code_verifier.into());
        self
    }

    pub fn nonce(mut self, nonce: impl Into<String>) -> Self {
        self.nonce = Some(nonce.into());
        self
    }

    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }
}

/// What the caller must keep (session storage) until the callback:
/// `state`, `code_verifier` and `nonce`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationRequest {
    pub state: String,
    pub code_verifier: String,
    pub code_challenge: String,
    pub nonce: Option<String>,
    pub authorization_url: String,
}

struct Resolved {
    endpoints: HubEndpoints,
    status: DiscoveryStatus,
    verifier: TokenVerifier,
}

struct Inner {
    config: SdkConfig,
    http: reqwest::Client,
    static_key: Option<KeySource>,
    resolved: OnceCell<Resolved>,
}

#[derive(Clone)]
pub struct AuthClient {
    inner: Arc<Inner>,
}

impl AuthClient {
    /// Validate `config`, import the static key if one is configured and
    /// build the HTTP client. No network traffic happens here.
    pub fn new(config: SdkConfig) -> Result<Self, SdkError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_seconds))
            .build()
            .map_err(|e| SdkError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Self::with_http_client(config, http)
    }

    pub fn with_http_client(config: SdkConfig, http: reqwest::Client) -> Result<Self, SdkError> {
        config
            .validate()
            .map_err(|e| SdkError::Config(format!("Invalid SDK configuration: {}", e)))?;

        let static_key = config
            .public_key
            .as_deref()
            .map(KeySource::from_rsa_pem)
            .transpose()?;

        tracing::info!(
            hub_url = %config.hub_base(),
            app_slug = %config.app_slug,
            use_discovery = config.use_discovery,
            static_key = static_key.is_some(),
            "AppHub client configured"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                http,
                static_key,
                resolved: OnceCell::new(),
            }),
        })
    }

    pub fn config(&self) -> &SdkConfig {
        &self.inner.config
    }

    pub fn discovery_status(&self) -> DiscoveryStatus {
        self.inner
            .resolved
            .get()
            .map_or(DiscoveryStatus::Pending, |resolved| resolved.status)
    }

    /// Resolve endpoints now rather than on first use. Never fails: a
    /// discovery error leaves the client on default endpoints.
    pub async fn initialize(&self) -> DiscoveryStatus {
        self.resolved().await.status
    }

    pub async fn discover_configuration(&self) -> &HubEndpoints {
        &self.resolved().await.endpoints
    }

    pub async fn verifier(&self) -> &TokenVerifier {
        &self.resolved().await.verifier
    }

    async fn resolved(&self) -> &Resolved {
        self.inner
            .resolved
            .get_or_init(|| self.resolve_endpoints())
            .await
    }

    async fn resolve_endpoints(&self) -> Resolved {
        let config = &self.inner.config;
        let defaults = HubEndpoints::defaults(&config.hub_url);

        let (endpoints, status) = if !config.use_discovery {
            (defaults, DiscoveryStatus::Static)
        } else {
            match fetch_discovery_document(&self.inner.http, &config.hub_url).await {
                Ok(document) => {
                    let endpoints = defaults.merge(document);
                    tracing::info!(
                        issuer = %endpoints.issuer,
                        jwks_uri = %endpoints.jwks_uri,
                        "OIDC discovery succeeded"
                    );
                    (endpoints, DiscoveryStatus::Discovered)
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        "OIDC discovery failed, using default endpoints"
                    );
                    (defaults, DiscoveryStatus::Fallback)
                }
            }
        };

        let keys = match &self.inner.static_key {
            Some(key) => key.clone(),
            None => KeySource::Jwks(Arc::new(JwksCache::new(
                endpoints.jwks_uri.clone(),
                self.inner.http.clone(),
                Duration::from_secs(config.jwks_refresh_cooldown_seconds),
            ))),
        };
        let verifier = TokenVerifier::new(endpoints.issuer.clone(), config.app_slug.clone(), keys)
            .with_leeway(config.clock_skew_seconds)
            .with_relaxations_allowed(config.allow_verification_relaxations);

        Resolved {
            endpoints,
            status,
            verifier,
        }
    }

    pub async fn validate_token(
        &self,
        token: &str,
        options: &VerifyOptions,
    ) -> Result<TokenValidation, SdkError> {
        self.verifier().await.validate(token, options).await
    }

    pub async fn get_tenant_context(
        &self,
        token: &str,
        options: &VerifyOptions,
    ) -> Result<TenantContext, SdkError> {
        self.verifier().await.get_tenant_context(token, options).await
    }

    /// Start an authorization-code flow with PKCE (S256).
    pub async fn create_authorization_url(
        &self,
        options: AuthorizationUrlOptions,
    ) -> Result<AuthorizationRequest, SdkError> {
        let config = &self.inner.config;
        let redirect_uri = options
            .redirect_uri
            .or_else(|| config.redirect_uri.clone())
            .ok_or_else(|| SdkError::Config("No redirect URI configured".to_string()))?;

        let code_verifier = match options.code_verifier {
            Some(verifier) => {
                validate_code_verifier(&verifier)?;
                verifier
            }
            None => secure_random_hex(CODE_VERIFIER_BYTES),
        };
        let code_challenge = pkce_challenge(&code_verifier);
        let state = options
            .state
            .unwrap_or_else(|| secure_random_hex(STATE_BYTES));

        let scopes = options
            .scopes
            .unwrap_or_else(|| DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect());
        let nonce = if scopes.iter().any(|s| s == "openid") {
            Some(options.nonce.unwrap_or_else(|| secure_random_hex(NONCE_BYTES)))
        } else {
            options.nonce
        };
        let scope = scopes.join(" ");

        let mut params: Vec<(&str, &str)> = vec![
            ("client_id", config.client_id.as_str()),
            ("redirect_uri", redirect_uri.as_str()),
            ("response_type", "code"),
            ("scope", scope.as_str()),
            ("state", state.as_str()),
            ("code_challenge", code_challenge.as_str()),
            ("code_challenge_method", "S256"),
        ];
        if let Some(nonce) = nonce.as_deref() {
            params.push(("nonce", nonce));
        }
        if let Some(prompt) = options.prompt.as_deref() {
            params.push(("prompt", prompt));
        }

        let endpoint = &self.discover_configuration().await.authorization_endpoint;
        let authorization_url = append_query(endpoint, &params)?;

        Ok(AuthorizationRequest {
            state,
            code_verifier,
            code_challenge,
            nonce,
            authorization_url,
        })
    }

    #[instrument(skip(self, code, code_verifier))]
    pub async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
        redirect_uri: Option<&str>,
    ) -> Result<TokenSet, SdkError> {
        let redirect_uri = redirect_uri
            .map(str::to_string)
            .or_else(|| self.inner.config.redirect_uri.clone())
            .ok_or_else(|| SdkError::Config("No redirect URI configured".to_string()))?;

        self.post_token_request(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri.as_str()),
            ("code_verifier", code_verifier),
        ])
        .await
    }

    #[instrument(skip(self, refresh_token))]
    pub async fn refresh_token(&self, refresh_token: &str) -> Result<TokenSet, SdkError> {
        self.post_token_request(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ])
        .await
    }

    #[instrument(skip(self, token))]
    pub async fn revoke_token(
        &self,
        token: &str,
        token_type_hint: Option<TokenTypeHint>,
    ) -> Result<(), SdkError> {
        let endpoint = self.discover_configuration().await.revocation_endpoint.clone();
        let form = self.client_form(&[("token", token)], token_type_hint);

        let response = self.inner.http.post(&endpoint).form(&form).send().await?;
        if !response.status().is_success() {
            return Err(SdkError::RevocationFailed {
                status: response.status().as_u16(),
            });
        }

        tracing::debug!("Token revoked");
        Ok(())
    }

    #[instrument(skip(self, token))]
    pub async fn introspect_token(
        &self,
        token: &str,
        token_type_hint: Option<TokenTypeHint>,
    ) -> Result<IntrospectionResponse, SdkError> {
        let endpoint = self
            .discover_configuration()
            .await
            .introspection_endpoint
            .clone();
        let form = self.client_form(&[("token", token)], token_type_hint);

        let response = self.inner.http.post(&endpoint).form(&form).send().await?;
        if !response.status().is_success() {
            return Err(oauth_error(response).await);
        }
        Ok(response.json().await?)
    }

    #[instrument(skip(self, access_token))]
    pub async fn get_user_info(&self, access_token: &str) -> Result<UserInfo, SdkError> {
        let endpoint = self.discover_configuration().await.userinfo_endpoint.clone();

        let response = self
            .inner
            .http
            .get(&endpoint)
            .bearer_auth(access_token)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(oauth_error(response).await);
        }
        Ok(response.json().await?)
    }

    /// RP-initiated logout URL on the hub's end-session endpoint.
    pub async fn logout_url(
        &self,
        post_logout_redirect_uri: Option<&str>,
        id_token_hint: Option<&str>,
    ) -> Result<String, SdkError> {
        let mut params = vec![("client_id", self.inner.config.client_id.as_str())];
        if let Some(uri) = post_logout_redirect_uri {
            params.push(("post_logout_redirect_uri", uri));
        }
        if let Some(hint) = id_token_hint {
            params.push(("id_token_hint", hint));
        }

        let endpoint = &self.discover_configuration().await.end_session_endpoint;
        append_query(endpoint, &params)
    }

    async fn post_token_request(&self, grant: &[(&str, &str)]) -> Result<TokenSet, SdkError> {
        let endpoint = self.discover_configuration().await.token_endpoint.clone();
        let form = self.client_form(grant, None);

        let response = self.inner.http.post(&endpoint).form(&form).send().await?;
        if !response.status().is_success() {
            return Err(oauth_error(response).await);
        }

        let tokens: TokenSet = response.json().await?;
        tracing::debug!(
            has_refresh_token = tokens.refresh_token.is_some(),
            expires_in = ?tokens.expires_in,
            "Token endpoint call succeeded"
        );
        Ok(tokens.stamp_expiry(Utc::now()))
    }

    /// `fields` plus client credentials and the optional type hint.
    fn client_form<'a>(
        &'a self,
        fields: &[(&'a str, &'a str)],
        token_type_hint: Option<TokenTypeHint>,
    ) -> Vec<(&'a str, &'a str)> {
        let config = &self.inner.config;
        let mut form = fields.to_vec();
        if let Some(hint) = token_type_hint {
            form.push(("token_type_hint", hint.as_str()));
        }
        form.push(("client_id", config.client_id.as_str()));
        form.push(("client_secret", config.client_secret.expose_secret().as_str()));
        form
    }
}

/// Turn a non-2xx hub response into `SdkError::OAuth`, keeping the hub's
/// `error` and `error_description` verbatim.
async fn oauth_error(response: reqwest::Response) -> SdkError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();

    match serde_json::from_str::<OAuthErrorBody>(&body) {
        Ok(parsed) => SdkError::OAuth {
            status,
            error: parsed.error,
            error_description: parsed.error_description,
        },
        Err(_) => SdkError::OAuth {
            status,
            error: "invalid_response".to_string(),
            error_description: (!body.is_empty()).then(|| body.chars().take(200).collect()),
        },
    }
}

fn append_query(endpoint: &str, params: &[(&str, &str)]) -> Result<String, SdkError> {
    let query = serde_urlencoded::to_string(params)
        .map_err(|e| SdkError::InvalidFormat(format!("Failed to encode query: {}", e)))?;
    let separator = if endpoint.contains('?') { '&' } else { '?' };
    Ok(format!("{}{}{}", endpoint, separator, query))
}

/// 43 to 128 characters from the unreserved set.
fn validate_code_verifier(verifier: &str) -> Result<(), SdkError> {
    let valid_length = (43..=128).contains(&verifier.len());
    let valid_chars = verifier
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~'));

    if valid_length && valid_chars {
        Ok(())
    } else {
        Err(SdkError::InvalidFormat(
            "code_verifier must be 43-128 unreserved characters".to_string(),
        ))
    }
}
