pub mod config;
pub mod handlers;
pub mod middleware;
pub mod services;

use axum::{
    extract::{Request, State},
    middleware::from_fn_with_state,
    routing::get,
    Json, Router,
};
use tower_http::trace::TraceLayer;

use crate::services::{AuthClient, WebhookDispatcher};

#[derive(Clone)]
pub struct AppState {
    pub client: AuthClient,
    /// Absent when no webhook secret is configured; the webhook route is
    /// then not mounted.
    pub webhooks: Option<WebhookDispatcher>,
}

pub fn build_router(state: AppState) -> Router {
    let authenticated = Router::new()
        .route("/me", get(handlers::get_me))
        .route_layer(from_fn_with_state(
            state.client.clone(),
            middleware::tenant_auth_middleware,
        ));

    let mut app = Router::new()
        .route("/health", get(health_check))
        .merge(authenticated)
        .with_state(state.clone());

    if let Some(dispatcher) = state.webhooks {
        app = app.merge(handlers::webhook_router(dispatcher));
    }

    app.layer(TraceLayer::new_for_http().make_span_with(
        |request: &Request| {
            let request_id = request
                .headers()
                .get("x-request-id")
                .and_then(|value| value.to_str().ok())
                .unwrap_or("-");

            tracing::info_span!(
                "http_request",
                request_id = %request_id,
                method = %request.method(),
                uri = %request.uri(),
            )
        },
    ))
}

pub async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    let client = &state.client;

    Json(serde_json::json!({
        "status": "healthy",
        "app": client.config().app_slug,
        "discovery": client.discovery_status(),
        "webhooks": state.webhooks.is_some(),
    }))
}
