use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use vidmatch::app_state::AppState;
use vidmatch::config::AppConfig;
use vidmatch::store::{
    ArtifactCatalog, JobStore, MemoryArtifactCatalog, MemoryJobStore, PgArtifactCatalog,
    PgJobStore,
};
use vidmatch::{db, routes};

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

    tracing::info!(worker_mode = %config.worker_mode, "Initializing vidmatch server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    routes::metrics::describe();

    let (store, catalog): (Arc<dyn JobStore>, Arc<dyn ArtifactCatalog>) =
        match &config.database_url {
            Some(url) => {
                tracing::info!("Connecting to PostgreSQL database");
                let pool = db::init_pool(url)
                    .await
                    .expect("Failed to connect to database");

                tracing::info!("Running database migrations");
                db::run_migrations(&pool)
                    .await
                    .expect("Failed to run database migrations");

                (
                    Arc::new(PgJobStore::new(pool.clone())),
                    Arc::new(PgArtifactCatalog::new(pool)),
                )
            }
            None => {
                tracing::warn!("DATABASE_URL not set, jobs are kept in memory only");
                (
                    Arc::new(MemoryJobStore::new()),
                    Arc::new(MemoryArtifactCatalog::new()),
                )
            }
        };

    let state = AppState::new(&config, store, catalog).expect("Failed to build worker client");
    let app = routes::router(state, Arc::new(prometheus_handle));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await.expect("Server error");
}
