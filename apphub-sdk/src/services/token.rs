use dashmap::DashMap;
use jsonwebtoken::{
    decode, decode_header, errors::ErrorKind, jwk::JwkSet, Algorithm, DecodingKey, Validation,
};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::services::context::{TenantContext, TokenPayload, VerifiedClaims};
use crate::services::error::{SdkError, TokenRejection};

/// Checks a caller may waive. Only honoured when the client was configured
/// with `allow_verification_relaxations`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relaxation {
    SkipAudienceCheck,
    SkipLicenseCheck,
}

/// Per-call verification options. `VerifyOptions::default()` is the strict
/// policy every request path should use.
#[derive(Debug, Clone, Default)]
pub struct VerifyOptions {
    required_claims: Vec<String>,
    relaxations: Vec<Relaxation>,
}

impl VerifyOptions {
    pub fn strict() -> Self {
        Self::default()
    }

    /// Options for a trusted internal caller (e.g. a back-office job holding
    /// a token minted for another application).
    pub fn trusted_internal(relaxations: &[Relaxation]) -> Self {
        Self {
            required_claims: Vec::new(),
            relaxations: relaxations.to_vec(),
        }
    }

    pub fn require_claim(mut self, claim: impl Into<String>) -> Self {
        self.required_claims.push(claim.into());
        self
    }

    pub fn require_claims<I, S>(mut self, claims: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_claims
            .extend(claims.into_iter().map(Into::into));
        self
    }

    fn relaxes(&self, relaxation: Relaxation) -> bool {
        self.relaxations.contains(&relaxation)
    }
}

/// Outcome of [`TokenVerifier::validate`].
#[derive(Debug, Clone)]
pub enum TokenValidation {
    Valid(Box<VerifiedClaims>),
    Invalid(TokenRejection),
}

impl TokenValidation {
    pub fn is_valid(&self) -> bool {
        matches!(self, TokenValidation::Valid(_))
    }

    pub fn payload(&self) -> Option<&TokenPayload> {
        match self {
            TokenValidation::Valid(claims) => Some(claims.payload()),
            TokenValidation::Invalid(_) => None,
        }
    }

    pub fn error(&self) -> Option<&TokenRejection> {
        match self {
            TokenValidation::Valid(_) => None,
            TokenValidation::Invalid(rejection) => Some(rejection),
        }
    }

    pub fn into_result(self) -> Result<VerifiedClaims, TokenRejection> {
        match self {
            TokenValidation::Valid(claims) => Ok(*claims),
            TokenValidation::Invalid(rejection) => Err(rejection),
        }
    }
}

/// Where verification keys come from.
#[derive(Clone)]
pub enum KeySource {
    /// A PEM public key imported once at construction.
    Static(Arc<DecodingKey>),
    /// The hub's published key set, fetched lazily and cached by key id.
    Jwks(Arc<JwksCache>),
}

impl KeySource {
    pub fn from_rsa_pem(pem: &str) -> Result<Self, SdkError> {
        let key = DecodingKey::from_rsa_pem(pem.as_bytes())
            .map_err(|e| SdkError::Config(format!("Failed to parse public key: {}", e)))?;
        Ok(KeySource::Static(Arc::new(key)))
    }

    async fn resolve(&self, kid: Option<&str>) -> Result<Arc<DecodingKey>, TokenRejection> {
        match self {
            KeySource::Static(key) => Ok(key.clone()),
            KeySource::Jwks(cache) => cache.key_for(kid).await,
        }
    }
}

/// JWKS keys cached by `kid`. An unknown `kid` triggers one re-fetch
/// (rotation); re-fetches are serialized and rate limited by `cooldown`.
pub struct JwksCache {
    jwks_uri: String,
    http: reqwest::Client,
    keys: DashMap<String, Arc<DecodingKey>>,
    last_refresh: Mutex<Option<Instant>>,
    cooldown: Duration,
}

impl JwksCache {
    pub fn new(jwks_uri: impl Into<String>, http: reqwest::Client, cooldown: Duration) -> Self {
        Self {
            jwks_uri: jwks_uri.into(),
            http,
            keys: DashMap::new(),
            last_refresh: Mutex::new(None),
            cooldown,
        }
    }

    pub fn jwks_uri(&self) -> &str {
        &self.jwks_uri
    }

    pub fn cached_key_count(&self) -> usize {
        self.keys.len()
    }

    async fn key_for(&self, kid: Option<&str>) -> Result<Arc<DecodingKey>, TokenRejection> {
        if let Some(key) = self.lookup(kid) {
            return Ok(key);
        }

        self.refresh_if_stale(kid).await?;

        self.lookup(kid).ok_or_else(|| match kid {
            Some(kid) => TokenRejection::KeyUnavailable(format!("unknown key id '{}'", kid)),
            None => TokenRejection::KeyUnavailable(
                "token has no key id and the key set is ambiguous".to_string(),
            ),
        })
    }

    fn lookup(&self, kid: Option<&str>) -> Option<Arc<DecodingKey>> {
        match kid {
            Some(kid) => self.keys.get(kid).map(|entry| entry.value().clone()),
            None if self.keys.len() == 1 => {
                self.keys.iter().next().map(|entry| entry.value().clone())
            }
            None => None,
        }
    }

    async fn refresh_if_stale(&self, kid: Option<&str>) -> Result<(), TokenRejection> {
        let mut last_refresh = self.last_refresh.lock().await;

        // Another task may have refreshed while we waited.
        if self.lookup(kid).is_some() {
            return Ok(());
        }
        if let Some(at) = *last_refresh {
            if at.elapsed() < self.cooldown {
                return Ok(());
            }
        }

        let set = self.fetch().await?;
        *last_refresh = Some(Instant::now());

        let mut fresh = Vec::with_capacity(set.keys.len());
        for (index, jwk) in set.keys.iter().enumerate() {
            let id = jwk
                .common
                .key_id
                .clone()
                .unwrap_or_else(|| format!("#{}", index));
            match DecodingKey::from_jwk(jwk) {
                Ok(key) => {
                    self.keys.insert(id.clone(), Arc::new(key));
                    fresh.push(id);
                }
                Err(e) => {
                    tracing::debug!(kid = %id, error = %e, "Skipping unusable JWK");
                }
            }
        }
        self.keys.retain(|id, _| fresh.contains(id));

        tracing::info!(
            jwks_uri = %self.jwks_uri,
            keys = self.keys.len(),
            "JWKS refreshed"
        );
        Ok(())
    }

    async fn fetch(&self) -> Result<JwkSet, TokenRejection> {
        let response = self
            .http
            .get(&self.jwks_uri)
            .send()
            .await
            .map_err(|e| TokenRejection::KeyUnavailable(format!("JWKS fetch failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(TokenRejection::KeyUnavailable(format!(
                "JWKS endpoint returned HTTP {}",
                response.status().as_u16()
            )));
        }

        response
            .json::<JwkSet>()
            .await
            .map_err(|e| TokenRejection::KeyUnavailable(format!("Invalid JWKS document: {}", e)))
    }
}

/// Verifies RS256 bearer tokens issued by the hub for one application.
#[derive(Clone)]
pub struct TokenVerifier {
    issuer: String,
    app_slug: String,
    keys: KeySource,
    leeway_seconds: u64,
    allow_relaxations: bool,
}

impl TokenVerifier {
    pub fn new(issuer: impl Into<String>, app_slug: impl Into<String>, keys: KeySource) -> Self {
        Self {
            issuer: issuer.into(),
            app_slug: app_slug.into(),
            keys,
            leeway_seconds: 0,
            allow_relaxations: false,
        }
    }

    pub fn with_leeway(mut self, seconds: u64) -> Self {
        self.leeway_seconds = seconds;
        self
    }

    pub fn with_relaxations_allowed(mut self, allowed: bool) -> Self {
        self.allow_relaxations = allowed;
        self
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn app_slug(&self) -> &str {
        &self.app_slug
    }

    /// Verify `token` and classify any failure.
    ///
    /// Ordinary invalid tokens come back as `Ok(TokenValidation::Invalid)`.
    /// `Err` is reserved for misuse, such as requesting relaxations on a
    /// verifier that does not allow them.
    pub async fn validate(
        &self,
        token: &str,
        options: &VerifyOptions,
    ) -> Result<TokenValidation, SdkError> {
        if !options.relaxations.is_empty() && !self.allow_relaxations {
            return Err(SdkError::Config(
                "Verification relaxations requested but not allowed by configuration".to_string(),
            ));
        }

        let header = match decode_header(token) {
            Ok(header) => header,
            Err(e) => return Ok(TokenValidation::Invalid(classify(e.kind()))),
        };

        let key = match self.keys.resolve(header.kid.as_deref()).await {
            Ok(key) => key,
            Err(rejection) => return Ok(TokenValidation::Invalid(rejection)),
        };

        let skip_audience = options.relaxes(Relaxation::SkipAudienceCheck);
        let mut validation = Validation::new(Algorithm::RS256);
        validation.leeway = self.leeway_seconds;
        validation.validate_exp = true;
        validation.set_issuer(&[&self.issuer]);
        if skip_audience {
            validation.validate_aud = false;
            validation.set_required_spec_claims(&["exp", "iss"]);
        } else {
            validation.set_audience(&[&self.app_slug]);
            validation.set_required_spec_claims(&["exp", "iss", "aud"]);
        }

        let raw = match decode::<Map<String, Value>>(token, &key, &validation) {
            Ok(data) => data.claims,
            Err(e) => return Ok(TokenValidation::Invalid(classify(e.kind()))),
        };

        let payload: TokenPayload = match serde_json::from_value(Value::Object(raw.clone())) {
            Ok(payload) => payload,
            Err(e) => {
                return Ok(TokenValidation::Invalid(TokenRejection::ClaimValidation(
                    e.to_string(),
                )))
            }
        };

        let app_scope = match payload.scope_for(&self.app_slug) {
            Ok(scope) => scope,
            Err(detail) => {
                return Ok(TokenValidation::Invalid(TokenRejection::ClaimValidation(
                    detail,
                )))
            }
        };

        if !options.relaxes(Relaxation::SkipLicenseCheck)
            && !payload.licensed_apps.iter().any(|app| app == &self.app_slug)
        {
            return Ok(TokenValidation::Invalid(TokenRejection::NotLicensed));
        }

        if let Some(missing) = options
            .required_claims
            .iter()
            .find(|claim| !raw.contains_key(claim.as_str()))
        {
            return Ok(TokenValidation::Invalid(TokenRejection::MissingClaim(
                missing.clone(),
            )));
        }

        Ok(TokenValidation::Valid(Box::new(VerifiedClaims::new(
            payload, raw, app_scope,
        ))))
    }

    /// Verify `token` and build its [`TenantContext`], failing with the
    /// typed error for the rejection.
    pub async fn get_tenant_context(
        &self,
        token: &str,
        options: &VerifyOptions,
    ) -> Result<TenantContext, SdkError> {
        let verified = self
            .validate(token, options)
            .await?
            .into_result()
            .map_err(SdkError::from_rejection)?;

        Ok(TenantContext::from_verified(verified))
    }
}

fn classify(kind: &ErrorKind) -> TokenRejection {
    match kind {
        ErrorKind::ExpiredSignature => TokenRejection::Expired,
        ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => {
            TokenRejection::InvalidSignature
        }
        ErrorKind::InvalidIssuer => TokenRejection::ClaimValidation("issuer mismatch".to_string()),
        ErrorKind::InvalidAudience => {
            TokenRejection::ClaimValidation("audience mismatch".to_string())
        }
        ErrorKind::ImmatureSignature => {
            TokenRejection::ClaimValidation("token not yet valid".to_string())
        }
        ErrorKind::MissingRequiredClaim(claim) => {
            TokenRejection::ClaimValidation(format!("missing standard claim '{}'", claim))
        }
        ErrorKind::InvalidRsaKey(detail) => TokenRejection::KeyUnavailable(detail.to_string()),
        other => TokenRejection::Malformed(format!("{:?}", other)),
    }
}

/// Claims read WITHOUT verifying the signature. For diagnostics only: this
/// type cannot be turned into a [`TenantContext`].
#[derive(Debug, Clone)]
pub struct UnverifiedClaims(Map<String, Value>);

impl UnverifiedClaims {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn exp(&self) -> Option<i64> {
        self.0.get("exp").and_then(Value::as_i64)
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

pub fn decode_unverified(token: &str) -> Result<UnverifiedClaims, SdkError> {
    let mut validation = Validation::new(Algorithm::RS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    decode::<Map<String, Value>>(token, &DecodingKey::from_secret(&[]), &validation)
        .map(|data| UnverifiedClaims(data.claims))
        .map_err(|e| SdkError::InvalidToken(classify(e.kind())))
}

/// Seconds until `exp` (negative once elapsed). `None` if unreadable.
pub fn token_expires_in(token: &str) -> Option<i64> {
    let exp = decode_unverified(token).ok()?.exp()?;
    Some(exp - chrono::Utc::now().timestamp())
}

/// Unreadable tokens count as expired.
pub fn is_token_expired(token: &str) -> bool {
    token_expires_in(token).map_or(true, |remaining| remaining <= 0)
}

/// Token from an `Authorization: Bearer <token>` header value.
pub fn extract_bearer_token(header_value: &str) -> Option<&str> {
    let (scheme, token) = header_value.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}
