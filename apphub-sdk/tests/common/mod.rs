//! Shared helpers for the SDK integration tests: fixture keys, a token
//! minting helper and an in-process fake hub.

#![allow(dead_code)]

use apphub_sdk::config::SdkConfig;
use axum::{
    extract::{Form, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::net::TcpListener;

pub const HUB_PRIVATE_KEY: &str = include_str!("../fixtures/hub_private.pem");
pub const HUB_PUBLIC_KEY: &str = include_str!("../fixtures/hub_public.pem");
pub const ROGUE_PRIVATE_KEY: &str = include_str!("../fixtures/rogue_private.pem");
pub const HUB_JWKS: &str = include_str!("../fixtures/hub_jwks.json");
pub const HUB_KID: &str = "hub-key-1";

pub const CLIENT_ID: &str = "fleet-client";
pub const CLIENT_SECRET: &str = "fleet-secret";
pub const APP_SLUG: &str = "fleet";
pub const REDIRECT_URI: &str = "https://fleet.example.com/callback";

pub const GOOD_CODE: &str = "good-code";
/// Exchanged for tokens whose `expires_in` overflows any timestamp.
pub const LONG_LIVED_CODE: &str = "long-lived-code";
pub const ACCESS_TOKEN: &str = "at_1";
pub const REFRESH_TOKEN: &str = "rt_1";

pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// A complete, valid claim set for `issuer`, scoped to the customer
/// `cust_9` inside entity `ent_1`.
pub fn valid_claims(issuer: &str) -> Value {
    json!({
        "sub": "usr_1",
        "email": "ada@example.com",
        "name": "Ada",
        "role": "admin",
        "entity_id": "ent_1",
        "entity_name": "Acme",
        "entity_slug": "acme",
        "permissions": ["vehicles:read", "vehicles:write"],
        "licensed_apps": [APP_SLUG],
        "scopes": {
            "fleet": {"type": "customer", "value": {"customer_id": "cust_9"}}
        },
        "iat": now(),
        "exp": now() + 3600,
        "iss": issuer,
        "aud": APP_SLUG
    })
}

pub fn mint_with_key(claims: &Value, kid: Option<&str>, private_pem: &str) -> String {
    let mut header = Header::new(jsonwebtoken::Algorithm::RS256);
    header.kid = kid.map(str::to_string);
    let key = EncodingKey::from_rsa_pem(private_pem.as_bytes()).expect("fixture key");
    encode(&header, claims, &key).expect("token encodes")
}

/// Sign with the hub key under its published key id.
pub fn mint(claims: &Value) -> String {
    mint_with_key(claims, Some(HUB_KID), HUB_PRIVATE_KEY)
}

/// The fixture key set with every key's `kid` replaced.
pub fn jwks_with_kid(kid: &str) -> Value {
    let mut jwks: Value = serde_json::from_str(HUB_JWKS).expect("fixture jwks");
    if let Some(keys) = jwks["keys"].as_array_mut() {
        for key in keys {
            key["kid"] = json!(kid);
        }
    }
    jwks
}

#[derive(Default)]
pub struct Hits {
    pub discovery: AtomicUsize,
    pub jwks: AtomicUsize,
    pub token: AtomicUsize,
    pub revoke: AtomicUsize,
    pub introspect: AtomicUsize,
    pub userinfo: AtomicUsize,
}

impl Hits {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Default)]
pub struct HubOptions {
    pub fail_discovery: bool,
    pub discovery_delay: Option<Duration>,
}

struct HubState {
    base_url: String,
    options: HubOptions,
    jwks: RwLock<Value>,
    hits: Arc<Hits>,
}

/// Fake hub serving discovery, JWKS and the OAuth endpoints on an ephemeral
/// port. The discovery document advertises `/oauth2/*` paths and issuer
/// `<base>/oidc`; the default `/api/oauth/*` paths are served as well.
pub struct FakeHub {
    pub base_url: String,
    pub hits: Arc<Hits>,
    state: Arc<HubState>,
}

impl FakeHub {
    pub async fn start() -> Self {
        Self::start_with(HubOptions::default()).await
    }

    pub async fn start_with(options: HubOptions) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind ephemeral port");
        let base_url = format!("http://{}", listener.local_addr().expect("local addr"));
        let hits = Arc::new(Hits::default());

        let state = Arc::new(HubState {
            base_url: base_url.clone(),
            options,
            jwks: RwLock::new(serde_json::from_str(HUB_JWKS).expect("fixture jwks")),
            hits: hits.clone(),
        });

        let router = Router::new()
            .route("/.well-known/openid-configuration", get(discovery))
            .route("/.well-known/jwks.json", get(jwks))
            .route("/oauth2/jwks", get(jwks))
            .route("/api/oauth/token", post(token))
            .route("/oauth2/token", post(token))
            .route("/api/oauth/revoke", post(revoke))
            .route("/oauth2/revoke", post(revoke))
            .route("/api/oauth/introspect", post(introspect))
            .route("/oauth2/introspect", post(introspect))
            .route("/api/oauth/userinfo", get(userinfo))
            .route("/oauth2/userinfo", get(userinfo))
            .with_state(state.clone());

        tokio::spawn(async move {
            axum::serve(listener, router).await.expect("fake hub serves");
        });

        Self {
            base_url,
            hits,
            state,
        }
    }

    /// Issuer advertised by the discovery document.
    pub fn discovered_issuer(&self) -> String {
        format!("{}/oidc", self.base_url)
    }

    pub fn set_jwks(&self, jwks: Value) {
        *self.state.jwks.write().expect("jwks lock") = jwks;
    }

    pub fn sdk_config(&self) -> SdkConfig {
        SdkConfig::new(&self.base_url, CLIENT_ID, CLIENT_SECRET, APP_SLUG)
            .with_redirect_uri(REDIRECT_URI)
    }
}

async fn discovery(State(state): State<Arc<HubState>>) -> Response {
    state.hits.discovery.fetch_add(1, Ordering::SeqCst);
    if let Some(delay) = state.options.discovery_delay {
        tokio::time::sleep(delay).await;
    }
    if state.options.fail_discovery {
        return (StatusCode::INTERNAL_SERVER_ERROR, "discovery unavailable").into_response();
    }

    let base = &state.base_url;
    Json(json!({
        "issuer": format!("{}/oidc", base),
        "authorization_endpoint": format!("{}/oauth2/authorize", base),
        "token_endpoint": format!("{}/oauth2/token", base),
        "userinfo_endpoint": format!("{}/oauth2/userinfo", base),
        "revocation_endpoint": format!("{}/oauth2/revoke", base),
        "introspection_endpoint": format!("{}/oauth2/introspect", base),
        "jwks_uri": format!("{}/oauth2/jwks", base),
        "code_challenge_methods_supported": ["S256"]
    }))
    .into_response()
}

async fn jwks(State(state): State<Arc<HubState>>) -> Json<Value> {
    state.hits.jwks.fetch_add(1, Ordering::SeqCst);
    Json(state.jwks.read().expect("jwks lock").clone())
}

fn oauth_error(status: StatusCode, error: &str, description: Option<&str>) -> Response {
    let mut body = json!({ "error": error });
    if let Some(description) = description {
        body["error_description"] = json!(description);
    }
    (status, Json(body)).into_response()
}

fn client_authenticated(form: &HashMap<String, String>) -> bool {
    form.get("client_id").map(String::as_str) == Some(CLIENT_ID)
        && form.get("client_secret").map(String::as_str) == Some(CLIENT_SECRET)
}

async fn token(
    State(state): State<Arc<HubState>>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    state.hits.token.fetch_add(1, Ordering::SeqCst);
    if !client_authenticated(&form) {
        return oauth_error(StatusCode::UNAUTHORIZED, "invalid_client", None);
    }

    let issued = json!({
        "access_token": ACCESS_TOKEN,
        "token_type": "Bearer",
        "expires_in": 3600,
        "refresh_token": REFRESH_TOKEN,
        "id_token": "id_1",
        "scope": "openid profile email"
    });

    match form.get("grant_type").map(String::as_str) {
        Some("authorization_code") => match form.get("code").map(String::as_str) {
            Some("html-error") => {
                (StatusCode::BAD_GATEWAY, "<html>upstream exploded</html>").into_response()
            }
            Some(LONG_LIVED_CODE) => {
                let mut long_lived = issued.clone();
                long_lived["expires_in"] = json!(10_000_000_000_000_i64);
                Json(long_lived).into_response()
            }
            Some(GOOD_CODE)
                if form.get("code_verifier").map_or(false, |v| !v.is_empty())
                    && form.get("redirect_uri").map(String::as_str) == Some(REDIRECT_URI) =>
            {
                Json(issued).into_response()
            }
            _ => oauth_error(
                StatusCode::BAD_REQUEST,
                "invalid_grant",
                Some("Authorization code is invalid or expired"),
            ),
        },
        Some("refresh_token") => match form.get("refresh_token").map(String::as_str) {
            Some(REFRESH_TOKEN) => Json(issued).into_response(),
            _ => oauth_error(StatusCode::BAD_REQUEST, "invalid_grant", None),
        },
        _ => oauth_error(StatusCode::BAD_REQUEST, "unsupported_grant_type", None),
    }
}

async fn revoke(
    State(state): State<Arc<HubState>>,
    Form(form): Form<HashMap<String, String>>,
) -> StatusCode {
    state.hits.revoke.fetch_add(1, Ordering::SeqCst);
    match form.get("token").map(String::as_str) {
        _ if !client_authenticated(&form) => StatusCode::UNAUTHORIZED,
        Some("revoke-fails") => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::OK,
    }
}

async fn introspect(
    State(state): State<Arc<HubState>>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    state.hits.introspect.fetch_add(1, Ordering::SeqCst);
    if !client_authenticated(&form) {
        return oauth_error(StatusCode::UNAUTHORIZED, "invalid_client", None);
    }

    match form.get("token").map(String::as_str) {
        Some(ACCESS_TOKEN) => Json(json!({
            "active": true,
            "sub": "usr_1",
            "client_id": CLIENT_ID,
            "scope": "openid profile email",
            "token_type": form.get("token_type_hint").cloned().unwrap_or_default(),
            "exp": now() + 3600,
            "entity_id": "ent_1"
        }))
        .into_response(),
        _ => Json(json!({ "active": false })).into_response(),
    }
}

async fn userinfo(State(state): State<Arc<HubState>>, headers: HeaderMap) -> Response {
    state.hits.userinfo.fetch_add(1, Ordering::SeqCst);
    let expected = format!("Bearer {}", ACCESS_TOKEN);
    let authorized = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        == Some(expected.as_str());

    if !authorized {
        return oauth_error(
            StatusCode::UNAUTHORIZED,
            "invalid_token",
            Some("Access token is invalid"),
        );
    }

    Json(json!({
        "sub": "usr_1",
        "email": "ada@example.com",
        "email_verified": true,
        "name": "Ada",
        "entity_id": "ent_1"
    }))
    .into_response()
}
