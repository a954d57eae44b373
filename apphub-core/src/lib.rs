//! apphub-core: Shared infrastructure for the AppHub SDK and the hosts embedding it.
pub mod config;
pub mod error;
pub mod observability;
pub mod utils;

pub use axum;
pub use serde;
pub use tracing;
pub use validator;
