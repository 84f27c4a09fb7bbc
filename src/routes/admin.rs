//! Admin/management endpoints for the dashboard
//!
//! Thin JSON glue over the repositories plus the sync trigger. Protected by
//! a shared key (`?key=` query parameter against `ADMIN_KEY`); this surface
//! is expected to sit behind the dashboard's own network boundary.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::db::models::{NewLocalContent, NewLocalEpisode, NewUpstream};
use crate::db::repository::{local_content, overrides, synced, upstreams};
use crate::error::GatewayError;
use crate::services::sync;
use crate::AppState;

/// Query params for admin operations
#[derive(Debug, Deserialize)]
pub struct AdminQuery {
    /// Admin key for authorization (simple protection)
    pub key: Option<String>,
    /// Restrict a sync trigger to one provider
    pub server_id: Option<i32>,
}

/// Checks the admin key; `Some(response)` is the refusal to send back
fn require_admin(provided_key: Option<&str>) -> Option<Response> {
    let admin_key = std::env::var("ADMIN_KEY").unwrap_or_else(|_| "admin123".to_string());
    match provided_key {
        Some(key) if key == admin_key => None,
        _ => Some(
            (
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({ "error": "Invalid or missing admin key" })),
            )
                .into_response(),
        ),
    }
}

// ============================================================================
// Upstream providers
// ============================================================================

/// GET /api/upstream - List configured providers
pub async fn list_upstreams(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AdminQuery>,
) -> Result<Response, GatewayError> {
    if let Some(denied) = require_admin(query.key.as_deref()) {
        return Ok(denied);
    }
    let rows = upstreams::list(&state.pool).await?;
    Ok(Json(rows).into_response())
}

/// POST /api/upstream - Register a provider
pub async fn create_upstream(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AdminQuery>,
    Json(payload): Json<NewUpstream>,
) -> Result<Response, GatewayError> {
    if let Some(denied) = require_admin(query.key.as_deref()) {
        return Ok(denied);
    }
    if payload.server_url.trim().is_empty() || !payload.server_url.starts_with("http") {
        return Err(GatewayError::Validation(
            "server_url must be an absolute http(s) URL".to_string(),
        ));
    }

    let row = upstreams::create(&state.pool, &payload).await?;
    state.active.invalidate().await;
    tracing::info!("Admin: registered upstream {} ({})", row.id, row.name);
    Ok((StatusCode::CREATED, Json(row)).into_response())
}

/// POST /api/upstream/:id/activate - Make one provider the active one
pub async fn activate_upstream(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
    Query(query): Query<AdminQuery>,
) -> Result<Response, GatewayError> {
    if let Some(denied) = require_admin(query.key.as_deref()) {
        return Ok(denied);
    }

    let switched = upstreams::set_active(&state.pool, id).await?;
    if !switched {
        return Ok((
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "Upstream not found" })),
        )
            .into_response());
    }

    state.active.invalidate().await;
    tracing::info!("Admin: upstream {} is now active", id);
    Ok(Json(serde_json::json!({ "success": true, "active_id": id })).into_response())
}

/// DELETE /api/upstream/:id - Remove a provider and its mirror rows
pub async fn delete_upstream(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
    Query(query): Query<AdminQuery>,
) -> Result<Response, GatewayError> {
    if let Some(denied) = require_admin(query.key.as_deref()) {
        return Ok(denied);
    }

    let deleted = upstreams::delete(&state.pool, id).await?;
    if deleted == 0 {
        return Ok((
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "Upstream not found" })),
        )
            .into_response());
    }

    state.active.invalidate().await;
    tracing::info!("Admin: deleted upstream {}", id);
    Ok(Json(serde_json::json!({ "success": true, "deleted": deleted })).into_response())
}

// ============================================================================
// Channel / category overrides
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ChannelOverrideRequest {
    pub stream_id: i64,
    pub custom_name: Option<String>,
    pub logo_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChannelToggleRequest {
    pub stream_id: i64,
    pub is_hidden: bool,
}

#[derive(Debug, Deserialize)]
pub struct CategoryOverrideRequest {
    pub category_id: String,
    pub category_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CategoryToggleRequest {
    pub category_id: String,
    pub category_name: Option<String>,
    pub is_hidden: bool,
}

/// POST /api/channels/override - Rename/re-logo a channel
pub async fn override_channel(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AdminQuery>,
    Json(payload): Json<ChannelOverrideRequest>,
) -> Result<Response, GatewayError> {
    if let Some(denied) = require_admin(query.key.as_deref()) {
        return Ok(denied);
    }
    let row = overrides::upsert_channel_override(
        &state.pool,
        payload.stream_id,
        payload.custom_name.as_deref(),
        payload.logo_url.as_deref(),
    )
    .await?;
    Ok(Json(row).into_response())
}

/// POST /api/channels/toggle - Hide or unhide a channel
pub async fn toggle_channel(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AdminQuery>,
    Json(payload): Json<ChannelToggleRequest>,
) -> Result<Response, GatewayError> {
    if let Some(denied) = require_admin(query.key.as_deref()) {
        return Ok(denied);
    }
    let row = overrides::set_channel_hidden(&state.pool, payload.stream_id, payload.is_hidden).await?;
    tracing::info!(
        "Admin: channel {} {}",
        payload.stream_id,
        if payload.is_hidden { "hidden" } else { "visible" }
    );
    Ok(Json(row).into_response())
}

/// POST /api/categories/override - Rename a category
pub async fn override_category(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AdminQuery>,
    Json(payload): Json<CategoryOverrideRequest>,
) -> Result<Response, GatewayError> {
    if let Some(denied) = require_admin(query.key.as_deref()) {
        return Ok(denied);
    }
    let row = overrides::upsert_category_override(
        &state.pool,
        &payload.category_id,
        payload.category_name.as_deref(),
    )
    .await?;
    Ok(Json(row).into_response())
}

/// POST /api/categories/toggle - Hide or unhide a category
pub async fn toggle_category(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AdminQuery>,
    Json(payload): Json<CategoryToggleRequest>,
) -> Result<Response, GatewayError> {
    if let Some(denied) = require_admin(query.key.as_deref()) {
        return Ok(denied);
    }
    let row = overrides::set_category_hidden(
        &state.pool,
        &payload.category_id,
        payload.category_name.as_deref(),
        payload.is_hidden,
    )
    .await?;
    tracing::info!(
        "Admin: category {} {}",
        payload.category_id,
        if payload.is_hidden { "hidden" } else { "visible" }
    );
    Ok(Json(row).into_response())
}

/// GET /api/overrides - Everything the overlay currently applies
pub async fn list_overrides(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AdminQuery>,
) -> Result<Response, GatewayError> {
    if let Some(denied) = require_admin(query.key.as_deref()) {
        return Ok(denied);
    }
    let (channels, categories) = tokio::try_join!(
        overrides::list_channel_overrides(&state.pool),
        overrides::list_category_overrides(&state.pool),
    )?;
    Ok(Json(serde_json::json!({ "channels": channels, "categories": categories })).into_response())
}

// ============================================================================
// Local content
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct EpisodeRequest {
    /// Target series by primary key...
    pub series_id: Option<Uuid>,
    /// ...or by title; an unknown title creates the series container
    pub series_title: Option<String>,
    #[serde(flatten)]
    pub episode: NewLocalEpisode,
}

/// GET /api/content/local - Local movies and series
pub async fn list_local_content(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AdminQuery>,
) -> Result<Response, GatewayError> {
    if let Some(denied) = require_admin(query.key.as_deref()) {
        return Ok(denied);
    }
    let (movies, series) = tokio::try_join!(
        local_content::list_by_type(&state.pool, "movie"),
        local_content::list_by_type(&state.pool, "series"),
    )?;
    Ok(Json(serde_json::json!({ "movies": movies, "series": series })).into_response())
}

/// POST /api/content/local - Add a movie or series container
pub async fn create_local_content(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AdminQuery>,
    Json(payload): Json<NewLocalContent>,
) -> Result<Response, GatewayError> {
    if let Some(denied) = require_admin(query.key.as_deref()) {
        return Ok(denied);
    }

    let row = local_content::insert_content(&state.pool, &payload).await?;
    tracing::info!("Admin: added local {} '{}'", row.content_type, row.title);
    Ok((StatusCode::CREATED, Json(row)).into_response())
}

/// DELETE /api/content/local/:id - Remove local content (episodes cascade)
pub async fn delete_local_content(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(query): Query<AdminQuery>,
) -> Result<Response, GatewayError> {
    if let Some(denied) = require_admin(query.key.as_deref()) {
        return Ok(denied);
    }

    let deleted = local_content::delete_content(&state.pool, id).await?;
    if deleted == 0 {
        return Ok((
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "Local content not found" })),
        )
            .into_response());
    }

    tracing::info!("Admin: deleted local content {}", id);
    Ok(Json(serde_json::json!({ "success": true })).into_response())
}

/// POST /api/content/episodes - Add an episode to a series
///
/// The series is addressed by id or by title; an unknown title creates an
/// empty series container first so episode imports can run in one pass.
pub async fn add_episode(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AdminQuery>,
    Json(payload): Json<EpisodeRequest>,
) -> Result<Response, GatewayError> {
    if let Some(denied) = require_admin(query.key.as_deref()) {
        return Ok(denied);
    }

    let series = match (payload.series_id, payload.series_title.as_deref()) {
        (Some(id), _) => match local_content::find_by_stream_key(&state.pool, &id.to_string()).await? {
            Some(row) => row,
            None => {
                return Ok((
                    StatusCode::NOT_FOUND,
                    Json(serde_json::json!({ "error": "Series not found" })),
                )
                    .into_response());
            }
        },
        (None, Some(title)) if !title.trim().is_empty() => {
            match local_content::find_series_by_title(&state.pool, title).await? {
                Some(row) => row,
                None => {
                    let container = NewLocalContent {
                        title: title.to_string(),
                        description: None,
                        content_type: "series".to_string(),
                        poster_url: None,
                        stream_url: None,
                        subtitle_url: None,
                        category_id: None,
                        category_name: None,
                        stream_id: None,
                        metadata: None,
                    };
                    let row = local_content::insert_content(&state.pool, &container).await?;
                    tracing::info!("Admin: created series container '{}'", row.title);
                    row
                }
            }
        }
        _ => {
            return Err(GatewayError::Validation(
                "series_id or series_title is required".to_string(),
            ));
        }
    };

    if series.content_type != "series" {
        return Err(GatewayError::Validation(
            "episodes can only be attached to series content".to_string(),
        ));
    }

    let episode = local_content::insert_episode(&state.pool, series.id, &payload.episode).await?;
    Ok((StatusCode::CREATED, Json(episode)).into_response())
}

// ============================================================================
// Sync
// ============================================================================

/// POST /api/sync/now - Run the catalog sync, optionally for one provider
pub async fn trigger_sync(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AdminQuery>,
) -> Result<Response, GatewayError> {
    if let Some(denied) = require_admin(query.key.as_deref()) {
        return Ok(denied);
    }

    let report = sync::run_sync(&state.pool, &state.fetch, &state.config, query.server_id).await?;
    tracing::info!(
        "Admin: sync run finished, {} providers, {} rows",
        report.providers_synced,
        report.rows_touched
    );
    Ok(Json(report).into_response())
}

/// GET /api/sync/status - Per-provider mirror counts and timestamps
pub async fn sync_status(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AdminQuery>,
) -> Result<Response, GatewayError> {
    if let Some(denied) = require_admin(query.key.as_deref()) {
        return Ok(denied);
    }
    let rows = synced::status(&state.pool).await?;
    Ok(Json(rows).into_response())
}
