pub mod auth;
pub mod guard;

pub use auth::{tenant_auth_middleware, AuthTenant};
pub use guard::{require_any_permission, require_permissions, require_role};
