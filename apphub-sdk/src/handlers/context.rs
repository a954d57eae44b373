use axum::Json;

use crate::middleware::AuthTenant;
use crate::services::TenantContext;

/// The caller's tenant context as seen by this application.
pub async fn get_me(AuthTenant(ctx): AuthTenant) -> Json<TenantContext> {
    Json(ctx)
}
