use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};

use crate::services::rbac::Role;

/// Scope type meaning "no restriction inside the entity".
pub const FULL_ACCESS_SCOPE: &str = "full_access";

/// Claims the hub puts in every bearer token, checked for type right after
/// the signature. Required fields have no default: a token missing one is
/// rejected rather than coerced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPayload {
    pub sub: String,
    pub email: String,
    pub name: String,
    pub role: Role,
    pub entity_id: String,
    pub entity_name: String,
    pub entity_slug: String,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub licensed_apps: Vec<String>,
    /// Per-application scope entries, kept raw; only this application's
    /// entry is parsed strictly.
    #[serde(default)]
    pub scopes: HashMap<String, Value>,
    #[serde(default)]
    pub impersonated_by: Option<Impersonator>,
    #[serde(default)]
    pub image: Option<String>,
    pub exp: i64,
    #[serde(default)]
    pub iat: Option<i64>,
    pub iss: String,
    #[serde(default)]
    pub aud: Option<Audience>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    Single(String),
    Many(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Impersonator {
    pub id: String,
    pub email: String,
    pub role: Role,
}

/// Tagged scope value: `{ "type": "...", "value": ... }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopeClaim {
    #[serde(rename = "type")]
    pub scope_type: String,
    #[serde(default)]
    pub value: Value,
}

impl ScopeClaim {
    pub fn new(scope_type: impl Into<String>, value: Value) -> Self {
        Self {
            scope_type: scope_type.into(),
            value,
        }
    }

    pub fn is_full_access(&self) -> bool {
        self.scope_type == FULL_ACCESS_SCOPE
    }
}

impl TokenPayload {
    /// Strictly parse the scope entry for `app`. `Ok(None)` when absent or null.
    pub fn scope_for(&self, app: &str) -> Result<Option<ScopeClaim>, String> {
        match self.scopes.get(app) {
            None | Some(Value::Null) => Ok(None),
            Some(raw) => serde_json::from_value(raw.clone())
                .map(Some)
                .map_err(|e| format!("scopes.{}: {}", app, e)),
        }
    }
}

/// Claims that passed signature, issuer, audience, expiry and (unless
/// relaxed) license verification. Only the token verifier can build one.
#[derive(Debug, Clone)]
pub struct VerifiedClaims {
    payload: TokenPayload,
    raw: Map<String, Value>,
    app_scope: Option<ScopeClaim>,
}

impl VerifiedClaims {
    pub(crate) fn new(
        payload: TokenPayload,
        raw: Map<String, Value>,
        app_scope: Option<ScopeClaim>,
    ) -> Self {
        Self {
            payload,
            raw,
            app_scope,
        }
    }

    pub fn payload(&self) -> &TokenPayload {
        &self.payload
    }

    pub fn raw(&self) -> &Map<String, Value> {
        &self.raw
    }

    pub fn claim(&self, name: &str) -> Option<&Value> {
        self.raw.get(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TenantUser {
    pub id: String,
    pub email: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TenantEntity {
    pub id: String,
    pub name: String,
    pub slug: String,
}

/// Authorization context for one verified request. Immutable once built.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantContext {
    user: TenantUser,
    entity: TenantEntity,
    role: Role,
    permissions: HashSet<String>,
    scope: Option<ScopeClaim>,
    is_impersonated: bool,
    impersonated_by: Option<Impersonator>,
    licensed_apps: HashSet<String>,
    #[serde(skip)]
    claims: Map<String, Value>,
}

impl TenantContext {
    pub fn from_verified(verified: VerifiedClaims) -> Self {
        let VerifiedClaims {
            payload,
            raw,
            app_scope,
        } = verified;

        Self {
            user: TenantUser {
                id: payload.sub,
                email: payload.email,
                name: payload.name,
                image: payload.image,
            },
            entity: TenantEntity {
                id: payload.entity_id,
                name: payload.entity_name,
                slug: payload.entity_slug,
            },
            role: payload.role,
            permissions: payload.permissions.into_iter().collect(),
            scope: app_scope,
            is_impersonated: payload.impersonated_by.is_some(),
            impersonated_by: payload.impersonated_by,
            licensed_apps: payload.licensed_apps.into_iter().collect(),
            claims: raw,
        }
    }

    pub fn user(&self) -> &TenantUser {
        &self.user
    }

    pub fn entity(&self) -> &TenantEntity {
        &self.entity
    }

    pub fn role(&self) -> &Role {
        &self.role
    }

    pub fn permissions(&self) -> &HashSet<String> {
        &self.permissions
    }

    /// Scope for this application; `None` means unrestricted.
    pub fn scope(&self) -> Option<&ScopeClaim> {
        self.scope.as_ref()
    }

    pub fn is_impersonated(&self) -> bool {
        self.is_impersonated
    }

    pub fn impersonated_by(&self) -> Option<&Impersonator> {
        self.impersonated_by.as_ref()
    }

    pub fn licensed_apps(&self) -> &HashSet<String> {
        &self.licensed_apps
    }

    pub fn is_licensed_for(&self, app: &str) -> bool {
        self.licensed_apps.contains(app)
    }

    /// Full claim set, for custom claims this type does not model.
    pub fn claims(&self) -> &Map<String, Value> {
        &self.claims
    }

    pub fn claim(&self, name: &str) -> Option<&Value> {
        self.claims.get(name)
    }

    /// Scope entry another application holds in the same token. Malformed
    /// entries read as `None`.
    pub fn scope_for(&self, app: &str) -> Option<ScopeClaim> {
        self.claims
            .get("scopes")
            .and_then(|scopes| scopes.get(app))
            .filter(|raw| !raw.is_null())
            .and_then(|raw| serde_json::from_value(raw.clone()).ok())
    }
}
