use anyhow::Result;
use relay_server::{create_app, AppState};
use shared::settings::RelaySettings;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,relay_server=debug,providers=debug".into()),
        )
        .with_target(false)
        .init();

    let settings = RelaySettings::from_env()?;
    if settings.openai_api_key.is_none() {
        tracing::warn!("OPENAI_API_KEY not set; chat requests will be rejected");
    }
    tokio::fs::create_dir_all(&settings.upload_dir).await?;

    let listener = tokio::net::TcpListener::bind((settings.host.as_str(), settings.port)).await?;
    let app = create_app(AppState::new(settings)?);

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
