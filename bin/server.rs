// Letting Desk - Web Server

use anyhow::{Context, Result};
use letting_desk::{
    config::AppConfig,
    db,
    server::{router, AppState},
    telemetry, BlobStore,
};

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;
    telemetry::init_logging(&config.logging)?;

    let conn = db::open(&config.database.path)?;
    tracing::info!(path = ?config.database.path, "database opened");

    std::fs::create_dir_all(&config.blobs.dir)
        .with_context(|| format!("Failed to create blob dir: {:?}", config.blobs.dir))?;
    let blobs = BlobStore::new(&config.blobs.dir, config.blobs.max_bytes);

    if config.auth.dev_login {
        tracing::warn!("email-only login is enabled; do not expose this server");
    }
    let app = router(AppState::new(conn, blobs).with_dev_login(config.auth.dev_login));

    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("Failed to bind to {}", config.server.bind))?;

    tracing::info!(addr = %config.server.bind, "letting desk listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
    }
}
