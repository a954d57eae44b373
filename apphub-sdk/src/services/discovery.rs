use serde::{Deserialize, Serialize};

use crate::services::error::SdkError;

pub const DISCOVERY_PATH: &str = "/.well-known/openid-configuration";

/// Hub endpoints the SDK talks to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HubEndpoints {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub userinfo_endpoint: String,
    pub revocation_endpoint: String,
    pub introspection_endpoint: String,
    pub jwks_uri: String,
    pub end_session_endpoint: String,
}

impl HubEndpoints {
    /// Endpoints derived from the hub base URL alone.
    pub fn defaults(hub_url: &str) -> Self {
        let base = hub_url.trim_end_matches('/');
        Self {
            issuer: base.to_string(),
            authorization_endpoint: format!("{}/api/oauth/authorize", base),
            token_endpoint: format!("{}/api/oauth/token", base),
            userinfo_endpoint: format!("{}/api/oauth/userinfo", base),
            revocation_endpoint: format!("{}/api/oauth/revoke", base),
            introspection_endpoint: format!("{}/api/oauth/introspect", base),
            jwks_uri: format!("{}/.well-known/jwks.json", base),
            end_session_endpoint: format!("{}/api/oauth/logout", base),
        }
    }

    /// Overlay the fields a discovery document advertises; anything missing
    /// or blank keeps its default.
    pub fn merge(mut self, document: OidcDiscoveryDocument) -> Self {
        fn take(slot: &mut String, value: Option<String>) {
            if let Some(value) = value.filter(|v| !v.trim().is_empty()) {
                *slot = value;
            }
        }

        take(&mut self.issuer, document.issuer);
        take(
            &mut self.authorization_endpoint,
            document.authorization_endpoint,
        );
        take(&mut self.token_endpoint, document.token_endpoint);
        take(&mut self.userinfo_endpoint, document.userinfo_endpoint);
        take(&mut self.revocation_endpoint, document.revocation_endpoint);
        take(
            &mut self.introspection_endpoint,
            document.introspection_endpoint,
        );
        take(&mut self.jwks_uri, document.jwks_uri);
        take(&mut self.end_session_endpoint, document.end_session_endpoint);
        self
    }
}

/// The subset of `.well-known/openid-configuration` the SDK reads.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OidcDiscoveryDocument {
    pub issuer: Option<String>,
    pub authorization_endpoint: Option<String>,
    pub token_endpoint: Option<String>,
    pub userinfo_endpoint: Option<String>,
    pub revocation_endpoint: Option<String>,
    pub introspection_endpoint: Option<String>,
    pub jwks_uri: Option<String>,
    pub end_session_endpoint: Option<String>,
    #[serde(default)]
    pub code_challenge_methods_supported: Vec<String>,
}

pub fn discovery_url(hub_url: &str) -> String {
    format!("{}{}", hub_url.trim_end_matches('/'), DISCOVERY_PATH)
}

/// One GET of the discovery document. No retries.
pub async fn fetch_discovery_document(
    http: &reqwest::Client,
    hub_url: &str,
) -> Result<OidcDiscoveryDocument, SdkError> {
    let url = discovery_url(hub_url);
    let response = http
        .get(&url)
        .send()
        .await
        .map_err(|e| SdkError::DiscoveryFailed(format!("{}: {}", url, e)))?;

    if !response.status().is_success() {
        return Err(SdkError::DiscoveryFailed(format!(
            "{} returned HTTP {}",
            url,
            response.status().as_u16()
        )));
    }

    response
        .json::<OidcDiscoveryDocument>()
        .await
        .map_err(|e| SdkError::DiscoveryFailed(format!("Invalid discovery document: {}", e)))
}
