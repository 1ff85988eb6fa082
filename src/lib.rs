pub mod api;
pub mod config;
pub mod error;
pub mod logic;
pub mod model;
pub mod store;

// Export API types
pub use api::handlers;
pub use api::routes;

// Export the error taxonomy
pub use error::ProtocolError;

// Export logic types
pub use logic::{
    BucketOperations, ConflictChecker, DeploymentExecutor, DeploymentHistory, PayloadValidator,
};

// Export all model types
pub use model::*;

// Export store types
pub use store::{MemoryStore, PostgresStore, Store};

use crate::api::handlers::AppState;
use crate::config::{AppConfig, StoreBackend};
use std::sync::Arc;

/// Start the console with the configured store backend.
pub async fn run_server() -> anyhow::Result<()> {
    // Load environment variables from .env file if it exists
    dotenvy::dotenv().ok();

    let config = AppConfig::load()?;
    log::info!(
        "configuration loaded: server={}:{}",
        config.server.host,
        config.server.port
    );

    match config.store.backend {
        StoreBackend::Postgres => {
            let database_url = config.database_url()?;
            log::info!("connecting to PostgreSQL");
            let postgres_store = crate::store::PostgresStore::new(&database_url).await?;
            postgres_store.migrate().await?;
            serve_with_store(Arc::new(postgres_store), &config).await
        }
        StoreBackend::Memory => {
            log::warn!("using the in-memory store, data will not survive a restart");
            serve_with_store(Arc::new(crate::store::MemoryStore::new()), &config).await
        }
    }
}

/// Bind the router to the configured address and serve until shutdown.
pub async fn serve_with_store<S: Store + 'static>(
    store: Arc<S>,
    config: &AppConfig,
) -> anyhow::Result<()> {
    use axum::serve;
    use tokio::net::TcpListener;

    let executor = DeploymentExecutor::new(config.item_timeout());
    let state = AppState::new(store, executor);
    let app = crate::api::routes::create_router().with_state(state);

    let bind_address = config.server_address();
    let listener = TcpListener::bind(&bind_address).await?;
    log::info!("nudge-console listening on http://{}", bind_address);

    serve(listener, app).await?;

    Ok(())
}
