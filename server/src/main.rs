//! Stash Server - reference remote store for stash-engine clients.
//!
//! Each collection is a set of rows in the `items` table keyed by
//! `(collection, id)`, with the item's extra fields kept as JSONB. A
//! collection may declare its permitted columns in `collection_columns`;
//! writes naming any other field are rejected with `unknown_field`, which is
//! how clients see schema drift.
//!
//! Every successful insert, update or delete is announced on the
//! collection's change socket (`GET /collections/{name}/changes`). Clients
//! refetch on any message, so notices carry no rows.
//!
//! Configuration comes from the environment (`.env` is read if present):
//! `DATABASE_URL` is required, `HOST`, `PORT` and `API_KEY` are optional.

mod auth;
mod changes;
mod config;
mod db;
mod error;
mod routes;

use crate::changes::ChangeHub;
use crate::config::Config;
use crate::db::Pool;
use axum::Router;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub pool: Pool,
    pub config: Arc<Config>,
    pub hub: Arc<ChangeHub>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stash_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    match config.api_key {
        Some(_) => tracing::info!("bearer key required on item and change routes"),
        None => tracing::warn!("API_KEY not set, item and change routes are open"),
    }

    let pool = db::create_pool(&config.database_url).await?;
    db::run_migrations(&pool).await?;
    tracing::info!("item store ready (migrations applied)");

    let state = AppState {
        pool,
        config: Arc::new(config.clone()),
        hub: ChangeHub::new_shared(),
    };

    // Browser clients call from any origin with a bearer header.
    let app = Router::new()
        .merge(routes::create_routes())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(
        addr = %addr,
        items = "/collections/{name}/items",
        changes = "/collections/{name}/changes",
        "stash server listening"
    );

    axum::serve(listener, app).await?;

    Ok(())
}
