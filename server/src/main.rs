//! Tidepool Server - remote row store for local-first clients.
//!
//! Clients upload rows through table-scoped PUT/PATCH/DELETE endpoints and
//! download the rows their bucket rules grant them. Rejections carry
//! SQLSTATE-style codes so clients can tell what to retry.

mod auth;
mod config;
mod db;
mod error;
mod handlers;
mod routes;
mod rules;

use crate::auth::TokenRegistry;
use crate::config::Config;
use crate::db::{MemoryRowStore, PgRowStore, RowStore};
use crate::rules::SyncRules;
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How often expired tokens are swept.
const TOKEN_PURGE_INTERVAL: Duration = Duration::from_secs(60);

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub rows: Arc<dyn RowStore>,
    pub rules: Arc<SyncRules>,
    pub tokens: Arc<TokenRegistry>,
    pub config: Arc<Config>,
}

/// Router with middleware, ready to serve.
pub fn build_app(state: AppState) -> Router {
    Router::new()
        .merge(routes::create_routes())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tidepool_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!("Starting Tidepool Server on {}:{}", config.host, config.port);

    let rules = SyncRules::load(&config.sync_rules_path)?;
    tracing::info!(
        path = %config.sync_rules_path.display(),
        tables = rules.schema.tables().count(),
        "Loaded sync rules"
    );

    let rows: Arc<dyn RowStore> = match &config.database_url {
        Some(url) => {
            let pool = db::create_pool(url, config.database_max_connections).await?;
            tracing::info!("Running database migrations...");
            db::run_migrations(&pool).await?;
            Arc::new(PgRowStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL is not set; rows are kept in memory only");
            Arc::new(MemoryRowStore::new())
        }
    };

    if config.auth_secret.is_none() {
        tracing::warn!("AUTH_SECRET is not set; any sign-in is accepted");
    }

    let tokens = Arc::new(TokenRegistry::new(config.token_ttl));
    tokio::spawn({
        let tokens = tokens.clone();
        async move {
            let mut interval = tokio::time::interval(TOKEN_PURGE_INTERVAL);
            loop {
                interval.tick().await;
                let purged = tokens.purge_expired();
                if purged > 0 {
                    tracing::debug!(purged, "Purged expired tokens");
                }
            }
        }
    });

    let addr = format!("{}:{}", config.host, config.port);
    let app = build_app(AppState {
        rows,
        rules: Arc::new(rules),
        tokens,
        config: Arc::new(config),
    });

    // Start server
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
