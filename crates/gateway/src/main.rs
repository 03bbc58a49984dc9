//! ResuMatch API Gateway
//!
//! The entry point for all external requests. Accepts analysis
//! submissions, serves job status polling and cancellation, and hosts
//! the in-process worker pool that runs the analysis pipeline.

mod handlers;

use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
    Router,
};
use resumatch_common::{
    config::AppConfig,
    embeddings::{create_embedder, CachingEmbedder, EmbeddingCache, FallbackEmbedder},
    metrics,
    scorer::{HttpScorer, Scorer},
    store::{JobStore, MemoryJobStore},
};
use resumatch_rag::IndexPool;
use resumatch_worker::{AnalysisPipeline, WorkerPool};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn JobStore>,
    /// Embedding model version baked into job fingerprints
    pub model_version: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .json()
        .init();

    info!("Starting ResuMatch API Gateway v{}", resumatch_common::VERSION);

    // Load configuration
    let config = AppConfig::load().map_err(|e| {
        tracing::error!(error = %e, "Failed to load configuration");
        e
    })?;
    let config = Arc::new(config);

    // Initialize metrics
    metrics::register_metrics();

    // Embedding stack: provider, cache, lexical fallback
    let provider = create_embedder(&config.embedding)?;
    let cache = Arc::new(EmbeddingCache::new(config.embedding.cache_capacity));
    let cached = Arc::new(CachingEmbedder::new(provider, cache));
    let embedder = Arc::new(FallbackEmbedder::new(cached));
    let model_version = embedder.model_version().to_string();

    let scorer: Arc<dyn Scorer> = Arc::new(HttpScorer::new(&config.scorer)?);
    let index_pool = Arc::new(IndexPool::new(config.rag.index_capacity));
    let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new(config.worker.max_attempts));

    let pipeline = Arc::new(AnalysisPipeline::new(
        store.clone(),
        embedder,
        scorer,
        index_pool,
        config.rag.clone(),
    ));
    let pool = WorkerPool::spawn(store.clone(), pipeline, config.worker.clone());

    // Create app state
    let state = AppState {
        config: config.clone(),
        store,
        model_version,
    };

    // Build the router
    let app = create_router(state);

    // Start the server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Let in-flight jobs finish before exit
    info!("Draining worker pool...");
    if tokio::time::timeout(config.shutdown_timeout(), pool.shutdown())
        .await
        .is_err()
    {
        tracing::warn!("Worker pool did not drain within the shutdown timeout");
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Create the main application router
fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let max_file_bytes = state.config.limits.max_file_bytes;

    let api_routes = Router::new()
        // Health endpoints
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        // Analysis endpoints
        .route("/analysis", post(handlers::analysis::create_analysis))
        .route(
            "/analysis/file",
            post(handlers::analysis::create_analysis_from_file)
                .layer(DefaultBodyLimit::max(max_file_bytes)),
        )
        .route("/analysis", get(handlers::analysis::list_analyses))
        .route("/analysis/{id}", get(handlers::analysis::get_analysis))
        .route("/analysis/{id}", delete(handlers::analysis::cancel_analysis))
        // Job posting scraping
        .route("/scrape-job", post(handlers::scrape::scrape_job));

    Router::new()
        .nest("/v1", api_routes)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(cors)
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
        .with_state(state)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}
