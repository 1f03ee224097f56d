use std::sync::Arc;

use tracing::info;

use warden_core::{Hub, MemoryStore, Store};
use warden_server::{app, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "warden_server=info,tower_http=debug".to_string()),
        )
        .init();

    dotenvy::dotenv().ok();

    let store = build_store().await?;
    let hub = Hub::spawn();
    let state = AppState::new(store, hub);
    let app = app(state);

    let port = std::env::var("PORT")
        .unwrap_or_else(|_| "8080".to_string())
        .parse::<u16>()
        .unwrap_or(8080);
    let addr = format!("0.0.0.0:{}", port);
    info!("Starting supervision server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(feature = "postgres")]
async fn build_store() -> anyhow::Result<Arc<dyn Store>> {
    match std::env::var("DATABASE_URL") {
        Ok(url) => {
            info!("Connecting to database");
            let store = warden_server::store_postgres::PgStore::connect(&url).await?;
            Ok(Arc::new(store))
        }
        Err(_) => {
            info!("DATABASE_URL not set; using in-memory store");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

#[cfg(not(feature = "postgres"))]
async fn build_store() -> anyhow::Result<Arc<dyn Store>> {
    info!("Using in-memory store");
    Ok(Arc::new(MemoryStore::new()))
}
