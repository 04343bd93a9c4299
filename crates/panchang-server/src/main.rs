mod configuration;
mod error;
mod routes;
mod state;

use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging, RUST_LOG overrides the default level
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration
    let settings = configuration::Settings::new()?;
    let addr = settings.server.socket_addr()?;

    // Create app state
    let state = state::AppState {
        provider_config: settings.provider.into_config(),
        panchang_config: settings.calendar.into_config(),
        http_client: reqwest::Client::new(),
        max_steps: settings.server.max_steps,
        max_duration: settings.server.max_duration(),
    };
    tracing::info!(
        "answering for {} ({})",
        state.panchang_config.observer.location(),
        state.panchang_config.observer.timezone
    );

    // Create router with CORS support
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = routes::configure(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    // Run server
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
