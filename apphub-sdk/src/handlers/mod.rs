pub mod context;
pub mod webhook;

pub use context::get_me;
pub use webhook::{receive_webhook, webhook_router, WebhookReceipt, WEBHOOK_PATH};
