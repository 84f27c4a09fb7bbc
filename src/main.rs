mod config;
mod db;
mod error;
mod models;
mod routes;
mod services;

use axum::{
    routing::{delete, get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::db::{create_pool, run_migrations};
use crate::services::{
    cache::ResponseCache, fetch::FetchClient, selector::ActiveUpstreamCache,
    sync::start_sync_task,
};
use sqlx::PgPool;

/// Application state shared across handlers
pub struct AppState {
    pub config: Config,
    pub pool: PgPool,
    pub cache: ResponseCache,
    pub fetch: FetchClient,
    pub active: ActiveUpstreamCache,
    pub start_time: Instant,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing/logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "panelgate=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    // Load configuration
    let config = Config::from_env();
    let port = config.port;

    tracing::info!("Starting Panelgate v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Environment: {}", config.app_env);

    // Initialize PostgreSQL connection pool
    let pool = create_pool(&config).await?;
    tracing::info!("PostgreSQL connected");

    // Run database migrations
    run_migrations(&pool).await?;
    tracing::info!("Database migrations completed");

    // Initialize services
    let cache = ResponseCache::new(&config.redis_url).await?;
    tracing::info!("Redis connected: {}", config.redis_url);

    let fetch = FetchClient::new(&config)?;
    tracing::info!("Upstream fetch clients initialized");

    let active = ActiveUpstreamCache::new(config.active_cache_ttl_secs);

    // Background catalog sync (0 = manual trigger only)
    if config.sync_interval_secs > 0 {
        tokio::spawn(start_sync_task(pool.clone(), fetch.clone(), config.clone()));
        tracing::info!("Catalog sync task started ({}s)", config.sync_interval_secs);
    }

    // Build application state
    let state = Arc::new(AppState {
        config,
        pool,
        cache,
        fetch,
        active,
        start_time: Instant::now(),
    });

    // Build router
    let app = Router::new()
        // Health endpoints
        .route("/", get(routes::health::root))
        .route("/health", get(routes::health::health_check))
        .route("/metrics", get(routes::health::metrics))
        .route("/ready", get(routes::health::ready))
        .route("/live", get(routes::health::live))
        // Xtream surface
        .route(
            "/player_api.php",
            get(routes::player_api::handle).post(routes::player_api::handle),
        )
        // Stalker action surface (panels hit any of these spellings)
        .route(
            "/portal.php",
            get(routes::portal::handle).post(routes::portal::handle),
        )
        .route(
            "/c/server.php",
            get(routes::portal::handle).post(routes::portal::handle),
        )
        .route(
            "/c/portal.php",
            get(routes::portal::handle).post(routes::portal::handle),
        )
        // Stalker static assets
        .route("/c", get(routes::assets::root).post(routes::assets::root))
        .route("/c/", get(routes::assets::root).post(routes::assets::root))
        .route(
            "/c/*path",
            get(routes::assets::asset).post(routes::assets::asset),
        )
        // Direct stream redirects
        .route("/live/:username/:password/:id", get(routes::stream::live))
        .route("/movie/:username/:password/:id", get(routes::stream::movie))
        .route(
            "/series/:username/:password/:id",
            get(routes::stream::series),
        )
        .route("/timeshift/*rest", get(routes::stream::timeshift))
        // Playlist/EPG documents
        .route("/get.php", get(routes::playlist::get_php))
        .route("/xmltv.php", get(routes::playlist::xmltv))
        .route("/enigma2.php", get(routes::playlist::enigma2))
        // Admin endpoints (protected by ADMIN_KEY)
        .route(
            "/api/upstream",
            get(routes::admin::list_upstreams).post(routes::admin::create_upstream),
        )
        .route(
            "/api/upstream/:id/activate",
            post(routes::admin::activate_upstream),
        )
        .route("/api/upstream/:id", delete(routes::admin::delete_upstream))
        .route("/api/channels/override", post(routes::admin::override_channel))
        .route("/api/channels/toggle", post(routes::admin::toggle_channel))
        .route(
            "/api/categories/override",
            post(routes::admin::override_category),
        )
        .route(
            "/api/categories/toggle",
            post(routes::admin::toggle_category),
        )
        .route("/api/overrides", get(routes::admin::list_overrides))
        .route(
            "/api/content/local",
            get(routes::admin::list_local_content).post(routes::admin::create_local_content),
        )
        .route(
            "/api/content/local/:id",
            delete(routes::admin::delete_local_content),
        )
        .route("/api/content/episodes", post(routes::admin::add_episode))
        .route("/api/sync/now", post(routes::admin::trigger_sync))
        .route("/api/sync/status", get(routes::admin::sync_status))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
