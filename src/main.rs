//! MedComm - medical communication training service
//!
//! Trainees hold a streamed conversation with a model playing a patient or
//! relative, are guided through a scenario's communication steps, and get
//! a keyword-based evaluation of their turns.

mod api;
mod error;
mod evaluation;
mod llm;
mod runtime;
mod scenario;
mod state_machine;
mod stream;
mod system_prompt;

use api::{create_router, AppState};
use llm::{build_provider, LlmConfig};
use runtime::{RuntimeSettings, SessionStore};
use scenario::ScenarioCatalog;
use state_machine::AdvancementPolicy;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "medcomm=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    // Configuration
    let port: u16 = std::env::var("MEDCOMM_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8000);

    let catalog = match std::env::var("MEDCOMM_SCENARIOS_PATH") {
        Ok(path) => {
            tracing::info!(path = %path, "Loading scenarios");
            ScenarioCatalog::from_path(&PathBuf::from(path))?
        }
        Err(_) => ScenarioCatalog::builtin()?,
    };
    tracing::info!(scenarios = catalog.len(), "Scenario catalog loaded");

    let llm_config = LlmConfig::from_env();
    let provider = build_provider(&llm_config);
    tracing::info!(model = %provider.model_id(), "Model provider initialized");

    let settings = RuntimeSettings::from_env();
    tracing::info!(
        policy = settings.policy.name(),
        exchange_timeout_secs = settings.exchange_timeout.as_secs(),
        idle_secs = settings.idle_timeout.as_secs(),
        feedback = ?settings.feedback,
        "Session runtime configured"
    );
    if settings.policy == AdvancementPolicy::KeywordTriggered {
        tracing::warn!("Steps advance on keyword evidence instead of every second exchange");
    }

    let store = Arc::new(SessionStore::new(Arc::new(catalog), provider, settings));
    let _sweeper = store.spawn_sweeper();

    // Create router
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let compression = CompressionLayer::new()
        .gzip(true)
        .br(true)
        .deflate(true)
        .zstd(true);

    let app = create_router(AppState::new(store))
        .layer(cors)
        .layer(compression)
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("MedComm server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
