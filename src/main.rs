use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use paygate_core::config::Config;
use paygate_core::services::Orchestrator;
use paygate_core::store::postgres::PostgresStore;
use paygate_core::store::{KeyValueStore, MemoryStore};
use paygate_core::{create_app, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    // Setup logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let store: Arc<dyn KeyValueStore> = match &config.database_url {
        Some(url) => {
            let store = PostgresStore::connect(url).await?;
            tracing::info!("postgres store ready");
            Arc::new(store)
        }
        None => {
            tracing::warn!("DATABASE_URL not set; falling back to the in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    let orchestrator = Orchestrator::from_config(&config, store);
    let app = create_app(AppState { orchestrator });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    tracing::info!("listening on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
