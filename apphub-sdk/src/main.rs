use apphub_core::error::AppError;
use apphub_core::observability::init_tracing;
use apphub_sdk::{
    build_router,
    config::HostConfig,
    services::{AuthClient, WebhookDispatcher, WebhookEvent},
    AppState,
};
use std::net::SocketAddr;
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Fail fast on bad configuration
    let config = HostConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    )?;

    tracing::info!(
        service = %config.service_name,
        environment = ?config.environment,
        app_slug = %config.sdk.app_slug,
        "Starting AppHub reference host"
    );

    let client = AuthClient::new(config.sdk.clone())?;
    let status = client.initialize().await;
    tracing::info!(discovery = ?status, "AppHub client ready");

    let webhooks = match config.sdk.webhook_secret {
        Some(_) => Some(
            WebhookDispatcher::from_config(&config.sdk)?.default_handler(
                |event: WebhookEvent| async move {
                    tracing::info!(
                        event_id = %event.id,
                        event_type = %event.event_type,
                        "Webhook event received"
                    );
                    Ok::<_, anyhow::Error>(())
                },
            ),
        ),
        None => {
            tracing::info!("No webhook secret configured, webhook route disabled");
            None
        }
    };

    let app = build_router(AppState { client, webhooks });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
    tracing::info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Service shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
