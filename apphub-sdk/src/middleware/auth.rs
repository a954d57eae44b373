use apphub_core::error::AppError;
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts},
    middleware::Next,
    response::Response,
};

use crate::services::{
    error::SdkError, extract_bearer_token, AuthClient, TenantContext, VerifyOptions,
};

/// Verify the bearer token and attach its `TenantContext` to the request.
pub async fn tenant_auth_middleware(
    State(client): State<AuthClient>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(extract_bearer_token)
        .map(str::to_string)
        .ok_or_else(|| {
            AppError::Unauthorized(anyhow::anyhow!(
                "Missing or invalid Authorization header"
            ))
        })?;

    let ctx = client
        .get_tenant_context(&token, &VerifyOptions::strict())
        .await
        .map_err(|e| {
            match &e {
                SdkError::Config(_) | SdkError::Http(_) => {
                    tracing::error!(error = %e, "Token verification could not run")
                }
                _ => tracing::warn!(
                    error = %e,
                    path = %req.uri().path(),
                    "Rejected bearer token"
                ),
            }
            AppError::from(e)
        })?;

    tracing::debug!(
        user_id = %ctx.user().id,
        entity_id = %ctx.entity().id,
        role = %ctx.role(),
        impersonated = ctx.is_impersonated(),
        "Tenant authenticated"
    );

    req.extensions_mut().insert(ctx);

    Ok(next.run(req).await)
}

/// Extractor for the context placed by [`tenant_auth_middleware`].
pub struct AuthTenant(pub TenantContext);

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthTenant
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let ctx = parts.extensions.get::<TenantContext>().ok_or_else(|| {
            AppError::InternalError(anyhow::anyhow!(
                "Tenant context missing from request extensions"
            ))
        })?;

        Ok(AuthTenant(ctx.clone()))
    }
}
