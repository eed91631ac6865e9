//! CategoryRank service
//!
//! Serves link-graph rankings of wiki categories.
//! Handles:
//! - Single-flight background builds per category
//! - Startup recovery of interrupted builds
//! - Pagination of finished rankings
//! - Observability (logging, metrics, tracing)

mod handlers;
mod paginate;
mod ranking;
mod service;

use axum::{routing::get, Router};
use futures::future::join_all;
use catrank_common::{
    cache::{Cache, CacheConfig},
    config::AppConfig,
    db::{DbPool, PgStore},
    metrics,
    source::MediaWikiClient,
};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use ranking::RankSolver;
use service::{RankService, ServiceConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub service: RankService,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = AppConfig::load()?;
    init_tracing(&config);

    info!("Starting CategoryRank v{}", catrank_common::VERSION);

    let config = Arc::new(config);

    // Initialize metrics
    if config.observability.metrics_port != 0 {
        let addr = SocketAddr::from(([0, 0, 0, 0], config.observability.metrics_port));
        PrometheusBuilder::new()
            .set_buckets(metrics::LATENCY_BUCKETS)?
            .set_buckets_for_metric(
                Matcher::Suffix("build_duration_seconds".to_string()),
                metrics::BUILD_BUCKETS,
            )?
            .with_http_listener(addr)
            .install()?;
        info!("Metrics exporter listening on {}", addr);
    }
    metrics::register_metrics();

    // Initialize database connection
    let db = DbPool::new(&config.database).await?;
    db.apply_schema().await?;
    let store = Arc::new(PgStore::new(db.clone()));

    let source = Arc::new(MediaWikiClient::new(config.source.clone())?);
    let solver = RankSolver::new(config.ranking.damping)?;
    let mut service = RankService::new(store, source, solver, ServiceConfig::from(config.as_ref()));

    if let Some(cache_config) = CacheConfig::from_app(&config.redis) {
        match Cache::new(cache_config).await {
            Ok(cache) => {
                info!("Ranking cache enabled");
                service = service.with_cache(Arc::new(cache));
            }
            Err(e) => warn!(error = %e, "Ranking cache unavailable, continuing without it"),
        }
    }

    // Builds from a previous process are not running anymore
    service.recover_on_startup().await?;

    // Create app state
    let state = AppState {
        config: config.clone(),
        service: service.clone(),
    };

    // Build the router
    let app = create_router(state);

    // Start the server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    drain_builds(&service, config.shutdown_timeout()).await;
    db.close().await?;
    info!("Server shutdown complete");
    Ok(())
}

/// Give in-flight builds a chance to finish before the store closes
async fn drain_builds(service: &RankService, timeout: Duration) {
    let running = service.running_builds();
    if running.is_empty() {
        return;
    }

    info!(count = running.len(), "Waiting for in-flight builds");
    let drain = join_all(running.iter().map(|category| service.wait_for(category)));
    if tokio::time::timeout(timeout, drain).await.is_err() {
        warn!("Builds still running at shutdown; startup recovery will reset them");
    }
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.observability.log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    if config.observability.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID: set on the way in, copied onto the response
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    Router::new()
        // Health endpoints
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))

        // Ranking endpoints
        .route("/categoryrank", get(handlers::rank::category_rank))
        .route("/categoryrank/", get(handlers::rank::category_rank))
        .route("/categories", get(handlers::rank::list_categories))
        .route("/categories/", get(handlers::rank::list_categories))

        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(propagate_id)
        .layer(request_id)
        .with_state(state)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
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
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}
