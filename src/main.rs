mod app_state;
mod config;
mod models;
mod routes;
mod services;

use axum::{routing::get, routing::post, routing::put, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use app_state::AppState;
use config::AppConfig;
use services::classifier::{self, ClassifierProvider};
use services::scheduler::Scheduler;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing illustration-scan server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    // Register application metrics
    metrics::describe_histogram!(
        "classification_seconds",
        "Time to classify a single canvas image"
    );
    metrics::describe_counter!(
        "classification_jobs_completed",
        "Total canvases classified successfully"
    );
    metrics::describe_counter!(
        "classification_jobs_failed",
        "Total canvases whose classification failed"
    );
    metrics::describe_gauge!(
        "classification_queue_depth",
        "Canvases remaining in the active run's queue"
    );
    metrics::describe_counter!("manifests_loaded_total", "Total manifests loaded");

    // Build the lazily-initialized classifier provider
    tracing::info!(model_id = %config.model_id, "Configuring inference API classifier");
    let provider: Arc<dyn ClassifierProvider> = Arc::new(classifier::inference_provider(
        config.inference_endpoint.clone(),
        config.model_id.clone(),
        config.inference_api_token.clone(),
    ));

    // Create the scheduler and shared application state
    let scheduler = Scheduler::new(provider, config.max_concurrency);
    let state = AppState::new(scheduler, config.confidence_threshold);

    // Build API routes
    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/api/v1/manifest", post(routes::classify::load_manifest))
        .route("/api/v1/classify", post(routes::classify::trigger_classification))
        .route("/api/v1/summary", get(routes::classify::get_summary))
        .route("/api/v1/canvases", get(routes::classify::list_canvases))
        .route("/api/v1/threshold", put(routes::classify::set_threshold))
        .with_state(state)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(10 * 1024 * 1024)); // 10 MB limit

    tracing::info!("Starting illustration-scan on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .await
        .expect("Server error");
}
