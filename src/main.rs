use axum::routing::{get, post};
use axum::Router;
use tracing_subscriber::EnvFilter;

use repo_retrieval::api;
use repo_retrieval::config::Config;
use repo_retrieval::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();
    config.validate()?;
    tracing::info!("Data directory: {}", config.data_dir.display());
    tracing::info!(
        "Embedding provider: {} ({}, model {})",
        config.embedding.provider,
        config.embedding.base_url,
        config.embedding.model
    );
    tracing::info!("Vector store: {:?}", config.vector.backend);

    let state = AppState::new(config.clone())?;

    let app = Router::new()
        .route("/api/health", get(api::repos::health))
        .route("/api/search", post(api::search::search))
        .route("/api/skills", post(api::search::skills))
        .route("/api/repos/{id}/ingest", post(api::repos::ingest_repo))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await?;
    Ok(())
}
