mod api;
mod config;
mod state;

#[cfg(test)]
mod testing;

use anyhow::Context;
use axum::Router;
use kgrag_core::{Pipeline, PipelineConfig};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::ServerConfig;
use crate::state::AppState;

pub fn app(state: AppState) -> Router {
    Router::new()
        .nest("/api", api::router())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kgrag_web=debug,kgrag_core=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let server = ServerConfig::from_env()?;
    let config = PipelineConfig::load(server.config_path.as_deref())?;
    let pipeline = Pipeline::from_config(&config).context("Failed to build pipeline")?;
    tracing::info!("Using model {}", pipeline.model_name());

    let app = app(AppState::new(pipeline));

    tracing::info!("Starting kgrag-web on http://{}", server.bind);
    let listener = tokio::net::TcpListener::bind(server.bind).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
