//! PetroRAG API Gateway
//!
//! The entry point for question answering over the well-report corpus.
//! Handles:
//! - Service wiring for the retrieval control loop
//! - Service-wide rate limiting and concurrency limits
//! - Request routing
//! - Observability (logging, metrics)

mod handlers;
mod middleware;
mod state;

pub use state::AppState;

use axum::{
    extract::Request,
    middleware::Next,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use petrorag_common::{config::AppConfig, metrics};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::Semaphore;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = AppConfig::load()?;

    // Initialize tracing
    init_tracing(&config);

    info!("Starting PetroRAG API Gateway v{}", petrorag_common::VERSION);

    // Initialize metrics
    if config.observability.metrics_port != 0 {
        install_metrics_exporter(config.observability.metrics_port)?;
    }
    metrics::register_metrics();

    let global_limiter = middleware::rate_limit::create_rate_limiter(
        config.rate_limit.global_requests_per_second,
        config.rate_limit.global_burst,
    )?;

    // Wire the control loop
    let state = state::build_state(config)?;
    let config = state.config.clone();

    spawn_cache_sweeper(
        state.clone(),
        Duration::from_secs(config.cache.cleanup_interval_secs.max(1)),
    );

    // Build the router
    let app = create_router(state, global_limiter, config.server.max_concurrent_requests);

    // Start the server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
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

fn install_metrics_exporter(port: u16) -> anyhow::Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(SocketAddr::from(([0, 0, 0, 0], port)))
        .set_buckets(metrics::ORCHESTRATION_BUCKETS)?
        .install()?;

    info!(port, "Prometheus exporter listening");
    Ok(())
}

/// Periodically drop expired cache entries and idle rate limit buckets
fn spawn_cache_sweeper(state: AppState, every: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.tick().await;
        loop {
            interval.tick().await;
            sweep(&state);
        }
    });
}

fn sweep(state: &AppState) {
    let removed = state.cache.cleanup_expired();
    if removed > 0 {
        info!(removed, "Expired cache entries removed");
    }

    let idle = state.limiter.cleanup_idle();
    if idle > 0 {
        info!(removed = idle, "Idle rate limit buckets removed");
    }
}

/// Create the main application router
fn create_router(
    state: AppState,
    limiter: Arc<middleware::rate_limit::GlobalRateLimiter>,
    max_concurrent: usize,
) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    let permits = Arc::new(Semaphore::new(max_concurrent.clamp(1, Semaphore::MAX_PERMITS)));

    // Question answering routes, guarded by the service-wide limiters
    let api_routes = Router::new()
        .route("/ask", post(handlers::ask::ask))
        .route("/cache/stats", get(handlers::cache::stats))
        .layer(axum::middleware::from_fn(move |request: Request, next: Next| {
            middleware::rate_limit::rate_limit_middleware(request, next, limiter.clone())
        }))
        .layer(axum::middleware::from_fn(move |request: Request, next: Next| {
            middleware::rate_limit::concurrency_middleware(request, next, permits.clone())
        }));

    // Compose the app
    Router::new()
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        .nest("/v1", api_routes)
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
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
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
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, draining requests");
}
