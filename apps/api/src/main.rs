mod config;
mod db;
mod errors;
mod interview;
mod models;
mod routes;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::db::create_pool;
use crate::interview::clock::SystemClock;
use crate::interview::conversation::HttpConversationClient;
use crate::interview::ledger::SessionLedger;
use crate::interview::store::PgLedgerStore;
use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_CRATE_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Interview API v{}", env!("CARGO_PKG_VERSION"));

    // Initialize PostgreSQL
    let db = create_pool(&config.database_url, config.database_max_connections).await?;

    // Initialize ledger
    info!(
        "Ledger thresholds: start >= {} min, warnings at {}s / {}s",
        config.ledger.min_start_balance_minutes,
        config.ledger.critical_warning_seconds,
        config.ledger.low_warning_seconds
    );
    let ledger = SessionLedger::new(
        Arc::new(PgLedgerStore::new(db)),
        Arc::new(SystemClock),
        config.ledger.clone(),
    );

    // Initialize conversation client
    let conversations = HttpConversationClient::new(
        config.conversation_api_url.clone(),
        config.conversation_api_key.clone(),
    );
    info!("Conversation client initialized ({})", config.conversation_api_url);

    // Build app state
    let state = AppState {
        ledger: Arc::new(ledger),
        conversations: Arc::new(conversations),
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // TODO: restrict CORS to the web app origin

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
