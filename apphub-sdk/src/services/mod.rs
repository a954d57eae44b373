//! Token verification, tenant context, authorization, scoping, the hub
//! OAuth client and webhook handling.

pub mod context;
pub mod definitions;
pub mod discovery;
pub mod error;
pub mod oauth;
pub mod rbac;
pub mod scope;
pub mod token;
pub mod webhook;

pub use context::{
    Impersonator, ScopeClaim, TenantContext, TenantEntity, TenantUser, TokenPayload,
    VerifiedClaims, FULL_ACCESS_SCOPE,
};
pub use definitions::{
    crud_permissions, define_custom_scope, define_customer_scope, define_full_access_scope,
    define_region_scope, PermissionDefinition, ScopeTypeDefinition,
};
pub use discovery::{HubEndpoints, OidcDiscoveryDocument};
pub use error::{Denial, SdkError, TokenRejection};
pub use oauth::{
    AuthClient, AuthorizationRequest, AuthorizationUrlOptions, DiscoveryStatus,
    IntrospectionResponse, TokenSet, TokenTypeHint, UserInfo,
};
pub use rbac::{Permission, Role};
pub use scope::{
    apply_scope_filter, filter_records_by_scope, has_access_to_record, require_access_to_record,
    ScopeFilterConfig, ScopedRecord,
};
pub use token::{
    decode_unverified, extract_bearer_token, is_token_expired, token_expires_in, JwksCache,
    KeySource, Relaxation, TokenValidation, TokenVerifier, VerifyOptions,
};
pub use webhook::{
    parse_webhook_request, sign_webhook_payload, verify_webhook_signature, WebhookDispatcher,
    WebhookEvent, WebhookEventType, WebhookHandler,
};
