// ./api/src/main.rs
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, level_filters::LevelFilter, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use api::config::{Config, StoreBackend};
use api::{AppState, build_router};
use application::{SchemaCodec, SchemaRepository, SchemaService};
use infrastructure::{FileSchemaRepository, InMemorySchemaRepository, JsonSchemaCodec};

// Application entry point
#[tokio::main]
async fn main() {
    // --- Logger Initialization ---
    let filter: EnvFilter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
    info!("Logger initialized successfully.");

    let config = Config::from_env();

    // --- Dependency Injection ---
    // 1. Create infrastructure components
    let codec: Arc<dyn SchemaCodec> = Arc::new(JsonSchemaCodec);
    let schema_repository: Arc<dyn SchemaRepository> = match &config.backend {
        StoreBackend::File(path) => {
            info!(path = %path.display(), "Using file-backed schema store.");
            Arc::new(FileSchemaRepository::new(path.clone(), codec.clone()))
        }
        StoreBackend::Memory => {
            warn!("Using in-memory schema store. Schemas are lost when the server stops.");
            Arc::new(InMemorySchemaRepository::new())
        }
    };

    // 2. Create application services, injecting dependencies
    let schema_service = Arc::new(SchemaService::new(schema_repository, codec));
    info!("Application services initialized.");

    // --- API Router Definition ---
    let app = build_router(AppState { schema_service });
    info!("API routes configured.");

    // --- Server Startup ---
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Server starting on {}", addr);
    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => {
            info!("Server listening on {}", addr);
            listener
        }
        Err(e) => {
            error!("Failed to bind to address {}: {}", addr, e);
            std::process::exit(1);
        }
    };
    if let Err(e) = axum::serve(listener, app.into_make_service()).await {
        error!("Server error: {}", e);
        std::process::exit(1);
    }
}
