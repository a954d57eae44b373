//! Inbound webhook deliveries from the hub.
//!
//! The signature is checked against the raw body before any JSON parsing.

use apphub_core::utils::{constant_time_eq, hmac_sha256_hex};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::config::SdkConfig;
use crate::services::error::SdkError;

pub const SIGNATURE_HEADER: &str = "X-AppHub-Signature";
const SIGNATURE_PREFIX: &str = "sha256=";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WebhookEventType {
    #[serde(rename = "user.created")]
    UserCreated,
    #[serde(rename = "user.updated")]
    UserUpdated,
    #[serde(rename = "user.deleted")]
    UserDeleted,
    #[serde(rename = "entity.created")]
    EntityCreated,
    #[serde(rename = "entity.updated")]
    EntityUpdated,
    #[serde(rename = "entity.deleted")]
    EntityDeleted,
    #[serde(rename = "membership.created")]
    MembershipCreated,
    #[serde(rename = "membership.updated")]
    MembershipUpdated,
    #[serde(rename = "membership.deleted")]
    MembershipDeleted,
    #[serde(rename = "license.granted")]
    LicenseGranted,
    #[serde(rename = "license.revoked")]
    LicenseRevoked,
    #[serde(rename = "webhook.test")]
    Test,
}

impl WebhookEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookEventType::UserCreated => "user.created",
            WebhookEventType::UserUpdated => "user.updated",
            WebhookEventType::UserDeleted => "user.deleted",
            WebhookEventType::EntityCreated => "entity.created",
            WebhookEventType::EntityUpdated => "entity.updated",
            WebhookEventType::EntityDeleted => "entity.deleted",
            WebhookEventType::MembershipCreated => "membership.created",
            WebhookEventType::MembershipUpdated => "membership.updated",
            WebhookEventType::MembershipDeleted => "membership.deleted",
            WebhookEventType::LicenseGranted => "license.granted",
            WebhookEventType::LicenseRevoked => "license.revoked",
            WebhookEventType::Test => "webhook.test",
        }
    }
}

impl fmt::Display for WebhookEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: WebhookEventType,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub data: Value,
}

/// Check `signature` (`sha256=<hex>` or bare hex) against the HMAC of the
/// raw `payload`.
pub fn verify_webhook_signature(payload: &[u8], signature: &str, secret: &str) -> bool {
    let provided = signature
        .trim()
        .strip_prefix(SIGNATURE_PREFIX)
        .unwrap_or_else(|| signature.trim());

    match hmac_sha256_hex(payload, secret.as_bytes()) {
        Ok(expected) => constant_time_eq(expected.as_bytes(), provided.as_bytes()),
        Err(_) => false,
    }
}

/// Header value the hub would send for `payload`.
pub fn sign_webhook_payload(payload: &[u8], secret: &str) -> Result<String, SdkError> {
    let digest = hmac_sha256_hex(payload, secret.as_bytes())
        .map_err(|e| SdkError::Config(e.to_string()))?;
    Ok(format!("{}{}", SIGNATURE_PREFIX, digest))
}

pub fn parse_webhook_request(
    payload: &[u8],
    signature: Option<&str>,
    secret: &str,
) -> Result<WebhookEvent, SdkError> {
    let signature = signature
        .filter(|s| !s.trim().is_empty())
        .ok_or(SdkError::WebhookInvalidSignature)?;

    if !verify_webhook_signature(payload, signature, secret) {
        return Err(SdkError::WebhookInvalidSignature);
    }

    let body: Value =
        serde_json::from_slice(payload).map_err(|e| SdkError::WebhookParse(e.to_string()))?;

    let object = body
        .as_object()
        .ok_or_else(|| SdkError::WebhookInvalidPayload("expected a JSON object".to_string()))?;
    if let Some(missing) = ["id", "type", "timestamp"]
        .into_iter()
        .find(|field| object.get(*field).map_or(true, Value::is_null))
    {
        return Err(SdkError::WebhookInvalidPayload(format!(
            "missing field '{}'",
            missing
        )));
    }

    serde_json::from_value(body).map_err(|e| SdkError::WebhookInvalidPayload(e.to_string()))
}

/// Something that reacts to a delivered event. Any `async` closure taking a
/// `WebhookEvent` works.
#[async_trait]
pub trait WebhookHandler: Send + Sync {
    async fn handle(&self, event: &WebhookEvent) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> WebhookHandler for F
where
    F: Fn(WebhookEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, event: &WebhookEvent) -> anyhow::Result<()> {
        (self)(event.clone()).await
    }
}

/// Verifies deliveries and routes them to per-type handlers.
#[derive(Clone)]
pub struct WebhookDispatcher {
    secret: SecretString,
    handlers: HashMap<WebhookEventType, Arc<dyn WebhookHandler>>,
    default_handler: Option<Arc<dyn WebhookHandler>>,
    tolerance: Option<Duration>,
}

impl WebhookDispatcher {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: SecretString::new(secret.into()),
            handlers: HashMap::new(),
            default_handler: None,
            tolerance: None,
        }
    }

    pub fn from_config(config: &SdkConfig) -> Result<Self, SdkError> {
        let secret = config
            .webhook_secret
            .as_ref()
            .ok_or_else(|| SdkError::Config("No webhook secret configured".to_string()))?;

        let mut dispatcher = Self::new(secret.expose_secret().clone());
        if let Some(seconds) = config.webhook_tolerance_seconds {
            dispatcher = dispatcher.with_tolerance(Duration::from_secs(seconds));
        }
        Ok(dispatcher)
    }

    pub fn on(mut self, event_type: WebhookEventType, handler: impl WebhookHandler + 'static) -> Self {
        self.handlers.insert(event_type, Arc::new(handler));
        self
    }

    /// Runs for event types without a dedicated handler.
    pub fn default_handler(mut self, handler: impl WebhookHandler + 'static) -> Self {
        self.default_handler = Some(Arc::new(handler));
        self
    }

    /// Reject events whose `timestamp` is further than `tolerance` from now.
    pub fn with_tolerance(mut self, tolerance: Duration) -> Self {
        self.tolerance = Some(tolerance);
        self
    }

    pub fn has_handler(&self, event_type: WebhookEventType) -> bool {
        self.handlers.contains_key(&event_type) || self.default_handler.is_some()
    }

    /// Verify, parse and dispatch one delivery. Handler errors are returned
    /// as `WebhookHandler`; otherwise the parsed event comes back whether or
    /// not a handler ran.
    pub async fn process(
        &self,
        payload: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookEvent, SdkError> {
        let event = parse_webhook_request(payload, signature, self.secret.expose_secret())?;
        self.check_freshness(&event)?;

        let handler = self
            .handlers
            .get(&event.event_type)
            .or(self.default_handler.as_ref());

        match handler {
            Some(handler) => {
                handler
                    .handle(&event)
                    .await
                    .map_err(SdkError::WebhookHandler)?;
                tracing::info!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    "Webhook event handled"
                );
            }
            None => {
                tracing::debug!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    "No handler registered for webhook event"
                );
            }
        }

        Ok(event)
    }

    fn check_freshness(&self, event: &WebhookEvent) -> Result<(), SdkError> {
        let Some(tolerance) = self.tolerance else {
            return Ok(());
        };

        let age = (Utc::now() - event.timestamp).num_seconds().unsigned_abs();
        if age > tolerance.as_secs() {
            return Err(SdkError::WebhookInvalidPayload(format!(
                "event timestamp is {}s away from now, tolerance is {}s",
                age,
                tolerance.as_secs()
            )));
        }
        Ok(())
    }
}
