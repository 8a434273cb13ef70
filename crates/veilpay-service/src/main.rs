//! Veilpay service entry point.

use std::sync::Arc;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use veilpay_service::{create_router, AppState, ServiceConfig};
use veilpay_store::MemoryStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServiceConfig::from_env()?;
    let listen_addr = config.listen_addr.clone();

    let store = Arc::new(MemoryStore::new());
    let state = AppState::new(store, config);
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    tracing::info!(addr = %listen_addr, "veilpay service listening");

    axum::serve(listener, router).await?;
    Ok(())
}
