//! Role and permission checks over a verified [`TenantContext`].
//!
//! Every function here is a pure function of the context: no session lookup,
//! no shared state, safe to call from any task. The `has_*`/`can_*` family
//! answers a question; the `require_*` family fails with
//! [`SdkError::AuthorizationDenied`] so a handler can bail out with `?`.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::services::context::TenantContext;
use crate::services::error::{Denial, SdkError};

pub const ACTION_READ: &str = "read";
pub const ACTION_WRITE: &str = "write";
pub const ACTION_DELETE: &str = "delete";
pub const ACTION_MANAGE: &str = "manage";

/// A principal's role within its entity, ordered
/// `Member < Manager < Admin < Owner`.
///
/// Role strings the SDK does not know become [`Role::Unknown`] with level 0,
/// which fails every hierarchy check instead of erroring.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Role {
    Member,
    Manager,
    Admin,
    Owner,
    Unknown(String),
}

impl Role {
    pub fn level(&self) -> u8 {
        match self {
            Role::Member => 1,
            Role::Manager => 2,
            Role::Admin => 3,
            Role::Owner => 4,
            Role::Unknown(_) => 0,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Role::Member => "member",
            Role::Manager => "manager",
            Role::Admin => "admin",
            Role::Owner => "owner",
            Role::Unknown(raw) => raw,
        }
    }
}

impl From<&str> for Role {
    fn from(value: &str) -> Self {
        match value {
            "member" => Role::Member,
            "manager" => Role::Manager,
            "admin" => Role::Admin,
            "owner" => Role::Owner,
            other => Role::Unknown(other.to_string()),
        }
    }
}

impl From<String> for Role {
    fn from(value: String) -> Self {
        Role::from(value.as_str())
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        role.as_str().to_string()
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed `resource:action` permission.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Permission {
    pub resource: String,
    pub action: String,
}

impl Permission {
    /// Exactly two non-empty, colon-separated segments.
    pub fn parse(value: &str) -> Result<Self, SdkError> {
        let mut parts = value.split(':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(resource), Some(action), None) if !resource.is_empty() && !action.is_empty() => {
                Ok(Self {
                    resource: resource.to_string(),
                    action: action.to_string(),
                })
            }
            _ => Err(SdkError::InvalidFormat(format!(
                "Invalid permission '{}': expected 'resource:action'",
                value
            ))),
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.resource, self.action)
    }
}

pub fn parse_permission(value: &str) -> Result<Permission, SdkError> {
    Permission::parse(value)
}

pub fn build_permission(resource: &str, action: &str) -> String {
    format!("{}:{}", resource, action)
}

pub fn has_permission(ctx: &TenantContext, permission: &str) -> bool {
    ctx.permissions().contains(permission)
}

/// True when every listed permission is held (vacuously true for none).
pub fn has_all_permissions<I, P>(ctx: &TenantContext, permissions: I) -> bool
where
    I: IntoIterator<Item = P>,
    P: AsRef<str>,
{
    permissions
        .into_iter()
        .all(|p| has_permission(ctx, p.as_ref()))
}

/// True when at least one listed permission is held (false for none).
pub fn has_any_permission<I, P>(ctx: &TenantContext, permissions: I) -> bool
where
    I: IntoIterator<Item = P>,
    P: AsRef<str>,
{
    permissions
        .into_iter()
        .any(|p| has_permission(ctx, p.as_ref()))
}

/// Hierarchy check. An unknown role on either side never passes.
pub fn has_role(ctx: &TenantContext, min_role: &Role) -> bool {
    let required = min_role.level();
    required > 0 && ctx.role().level() >= required
}

pub fn has_exact_role(ctx: &TenantContext, role: &Role) -> bool {
    ctx.role() == role
}

pub fn is_owner(ctx: &TenantContext) -> bool {
    has_exact_role(ctx, &Role::Owner)
}

pub fn is_admin(ctx: &TenantContext) -> bool {
    has_role(ctx, &Role::Admin)
}

pub fn is_impersonated(ctx: &TenantContext) -> bool {
    ctx.is_impersonated()
}

/// Actions held on `resource`, sorted.
pub fn get_permissions_for_resource(ctx: &TenantContext, resource: &str) -> Vec<String> {
    let mut actions: Vec<String> = ctx
        .permissions()
        .iter()
        .filter_map(|p| Permission::parse(p).ok())
        .filter(|p| p.resource == resource)
        .map(|p| p.action)
        .collect();
    actions.sort();
    actions
}

pub fn can_perform(ctx: &TenantContext, resource: &str, action: &str) -> bool {
    has_permission(ctx, &build_permission(resource, action))
}

pub fn can_read(ctx: &TenantContext, resource: &str) -> bool {
    can_perform(ctx, resource, ACTION_READ)
}

pub fn can_write(ctx: &TenantContext, resource: &str) -> bool {
    can_perform(ctx, resource, ACTION_WRITE)
}

pub fn can_delete(ctx: &TenantContext, resource: &str) -> bool {
    can_perform(ctx, resource, ACTION_DELETE)
}

pub fn can_manage(ctx: &TenantContext, resource: &str) -> bool {
    can_perform(ctx, resource, ACTION_MANAGE)
}

pub fn require_permission(ctx: &TenantContext, permission: &str) -> Result<(), SdkError> {
    if has_permission(ctx, permission) {
        return Ok(());
    }
    Err(SdkError::AuthorizationDenied(Denial::MissingPermission(
        permission.to_string(),
    )))
}

/// Fails on the first permission (in order) that is not held.
pub fn require_all_permissions<I, P>(ctx: &TenantContext, permissions: I) -> Result<(), SdkError>
where
    I: IntoIterator<Item = P>,
    P: AsRef<str>,
{
    for permission in permissions {
        require_permission(ctx, permission.as_ref())?;
    }
    Ok(())
}

pub fn require_any_permission<I, P>(ctx: &TenantContext, permissions: I) -> Result<(), SdkError>
where
    I: IntoIterator<Item = P>,
    P: AsRef<str>,
{
    let permissions: Vec<String> = permissions
        .into_iter()
        .map(|p| p.as_ref().to_string())
        .collect();

    if has_any_permission(ctx, &permissions) {
        return Ok(());
    }
    Err(SdkError::AuthorizationDenied(Denial::MissingAnyPermission(
        permissions,
    )))
}

pub fn require_role(ctx: &TenantContext, min_role: &Role) -> Result<(), SdkError> {
    if has_role(ctx, min_role) {
        return Ok(());
    }
    Err(SdkError::AuthorizationDenied(Denial::RequiredRole(
        min_role.clone(),
    )))
}

pub fn require_admin(ctx: &TenantContext) -> Result<(), SdkError> {
    require_role(ctx, &Role::Admin)
}

pub fn require_owner(ctx: &TenantContext) -> Result<(), SdkError> {
    if is_owner(ctx) {
        return Ok(());
    }
    Err(SdkError::AuthorizationDenied(Denial::RequiredRole(
        Role::Owner,
    )))
}
