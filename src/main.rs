use anyhow::Result;
use axum::Router;
use std::net::SocketAddr;
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use bangla_nlp_backend::config::Config;
use bangla_nlp_backend::routes;
use bangla_nlp_backend::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("bangla_nlp_backend=info,tower_http=info")),
        )
        .init();

    let config = Config::load_default()?;
    info!(port = config.server.port, "configuration loaded");

    // Model loading is fatal on failure: both pipelines must be up before
    // the server accepts requests.
    let app_state = AppState::new(config.clone()).await.map_err(|e| {
        anyhow::anyhow!("failed to initialize pipelines: {e}")
    })?;
    info!("summarization and translation pipelines ready");

    let app = Router::new()
        .merge(routes::create_routes())
        .layer(CorsLayer::permissive())
        .with_state(app_state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
