use std::sync::Arc;

use learnhub_api::billing::{BillingProvider, RecordingBilling, StripeBilling};
use learnhub_api::storage::NullFileStore;
use learnhub_api::store::{DocStore, MemoryStore, PgStore};
use learnhub_api::{app, config, AppState};

#[tokio::main]
async fn main() {
    // Load .env if present so cargo run picks up DATABASE_URL, JWT_SECRET, etc.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt::init();

    let config = config::config();
    tracing::info!("Starting learnhub-api in {:?} mode", config.environment);

    let store: Arc<dyn DocStore> = match &config.database.url {
        Some(url) => {
            let pg = PgStore::connect(url, config.database.max_connections)
                .await
                .unwrap_or_else(|e| panic!("failed to connect to database: {}", e));
            tracing::info!("Using postgres document store");
            Arc::new(pg)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory document store");
            Arc::new(MemoryStore::new())
        }
    };

    let billing: Arc<dyn BillingProvider> = match &config.billing.api_key {
        Some(key) => {
            Arc::new(StripeBilling::new(key.clone(), config.billing.api_base_url.clone()))
        }
        None => {
            tracing::warn!("BILLING_API_KEY not set, usage reports are recorded locally only");
            Arc::new(RecordingBilling::new())
        }
    };

    let state = AppState { store, billing, files: Arc::new(NullFileStore::new()) };
    let app = app(state);

    let port = std::env::var("PORT").ok().and_then(|s| s.parse::<u16>().ok()).unwrap_or(3000);
    let bind_addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .unwrap_or_else(|e| panic!("failed to bind {}: {}", bind_addr, e));

    tracing::info!("learnhub-api listening on http://{}", bind_addr);

    axum::serve(listener, app).await.expect("server");
}
