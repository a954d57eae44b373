use apphub_core::error::AppError;
use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    routing::post,
    Json, Router,
};
use serde::Serialize;

use crate::services::{webhook::SIGNATURE_HEADER, WebhookDispatcher};

pub const WEBHOOK_PATH: &str = "/webhooks/apphub";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookReceipt {
    pub received: bool,
    pub event_id: String,
}

/// 401 on a missing or bad signature, 400 on a malformed body, 200 with a
/// receipt otherwise.
pub async fn receive_webhook(
    State(dispatcher): State<WebhookDispatcher>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookReceipt>, AppError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    let event = dispatcher.process(&body, signature).await.map_err(|e| {
        tracing::warn!(error = %e, "Webhook delivery rejected");
        AppError::from(e)
    })?;

    Ok(Json(WebhookReceipt {
        received: true,
        event_id: event.id,
    }))
}

pub fn webhook_router(dispatcher: WebhookDispatcher) -> Router {
    Router::new()
        .route(WEBHOOK_PATH, post(receive_webhook))
        .with_state(dispatcher)
}
