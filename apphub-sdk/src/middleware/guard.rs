//! Route guards over the authenticated `TenantContext`.
//!
//! Each constructor validates its arguments up front and returns a function
//! for `axum::middleware::from_fn`. Layer them inside
//! [`tenant_auth_middleware`](super::tenant_auth_middleware).

use apphub_core::error::AppError;
use axum::{extract::Request, middleware::Next, response::Response};
use futures::future::BoxFuture;
use std::sync::Arc;

use crate::services::{
    error::SdkError,
    rbac::{self, Permission, Role},
    TenantContext,
};

pub type GuardFuture = BoxFuture<'static, Result<Response, AppError>>;

/// Every permission must be held.
pub fn require_permissions(
    permissions: &[&str],
) -> Result<impl Fn(Request, Next) -> GuardFuture + Clone + Send + Sync + 'static, SdkError> {
    let permissions = parse_all(permissions)?;

    Ok(move |req: Request, next: Next| -> GuardFuture {
        let permissions = permissions.clone();
        Box::pin(async move {
            check(&req, |ctx| {
                rbac::require_all_permissions(ctx, permissions.iter())
            })?;
            Ok(next.run(req).await)
        })
    })
}

/// At least one permission must be held.
pub fn require_any_permission(
    permissions: &[&str],
) -> Result<impl Fn(Request, Next) -> GuardFuture + Clone + Send + Sync + 'static, SdkError> {
    let permissions = parse_all(permissions)?;
    if permissions.is_empty() {
        return Err(SdkError::InvalidFormat(
            "require_any_permission needs at least one permission".to_string(),
        ));
    }

    Ok(move |req: Request, next: Next| -> GuardFuture {
        let permissions = permissions.clone();
        Box::pin(async move {
            check(&req, |ctx| {
                rbac::require_any_permission(ctx, permissions.iter())
            })?;
            Ok(next.run(req).await)
        })
    })
}

/// `min_role` or any role above it.
pub fn require_role(
    min_role: Role,
) -> Result<impl Fn(Request, Next) -> GuardFuture + Clone + Send + Sync + 'static, SdkError> {
    if min_role.level() == 0 {
        return Err(SdkError::InvalidFormat(format!(
            "'{}' is not a known role",
            min_role
        )));
    }
    let min_role = Arc::new(min_role);

    Ok(move |req: Request, next: Next| -> GuardFuture {
        let min_role = min_role.clone();
        Box::pin(async move {
            check(&req, |ctx| rbac::require_role(ctx, &min_role))?;
            Ok(next.run(req).await)
        })
    })
}

fn parse_all(permissions: &[&str]) -> Result<Arc<Vec<String>>, SdkError> {
    let parsed = permissions
        .iter()
        .map(|p| Permission::parse(p).map(|permission| permission.to_string()))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Arc::new(parsed))
}

fn check<F>(req: &Request, guard: F) -> Result<(), AppError>
where
    F: FnOnce(&TenantContext) -> Result<(), SdkError>,
{
    let ctx = req.extensions().get::<TenantContext>().ok_or_else(|| {
        AppError::InternalError(anyhow::anyhow!(
            "Tenant context missing from request extensions"
        ))
    })?;

    guard(ctx).map_err(|e| {
        tracing::warn!(
            user_id = %ctx.user().id,
            entity_id = %ctx.entity().id,
            path = %req.uri().path(),
            denial = %e,
            "Authorization denied"
        );
        AppError::from(e)
    })
}
