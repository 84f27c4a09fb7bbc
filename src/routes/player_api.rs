//! Xtream protocol surface: /player_api.php
//!
//! Every request authenticates against the selected upstream first (through
//! the auth cache), then dispatches on `action`. Catalog listings come back
//! through the response cache and the overlay engine, with locally hosted
//! items appended in upstream shape. Unknown actions forward verbatim so new
//! panel features keep working without code changes here.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::{Form, Json};
use chrono::Utc;
use serde_json::{json, Map, Value};

use crate::db::models::{LocalContentRow, LocalEpisodeRow, UpstreamRow};
use crate::db::repository::{local_content, overrides};
use crate::error::GatewayError;
use crate::models::catalog::{
    categories_from_value, categories_to_value, entries_from_value, entries_to_value,
    CatalogEntry, CategoryEntry, FieldMap, XTREAM_CATEGORY_FIELDS, XTREAM_FIELDS,
    XTREAM_SERIES_FIELDS,
};
use crate::routes::{active_upstream, request_origin};
use crate::services::cache::{auth_cache_key, cache_key};
use crate::services::fetch::FetchError;
use crate::services::overlay::{self, OverlayContext};
use crate::AppState;

/// GET/POST /player_api.php
pub async fn handle(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    form: Option<Form<HashMap<String, String>>>,
) -> Result<Response, GatewayError> {
    let mut params = query;
    if let Some(Form(form)) = form {
        params.extend(form);
    }

    let username = params.get("username").cloned().unwrap_or_default();
    let password = params.get("password").cloned().unwrap_or_default();
    let action = params.get("action").cloned().unwrap_or_default();

    let upstream = active_upstream(&state).await?;
    let auth_payload = authenticate(&state, &upstream, &username, &password).await?;

    if action.is_empty() {
        // handshake: keep the upstream account info but swap in OUR
        // connection coordinates so the client keeps talking to us
        let origin = request_origin(&state.config.public_base_url, &headers);
        let mut payload = auth_payload;
        if let Value::Object(map) = &mut payload {
            map.insert("server_info".to_string(), server_info_for(&origin));
        }
        return Ok(Json(payload).into_response());
    }

    match action.as_str() {
        "get_live_categories" => {
            categories(&state, &upstream, &headers, &params, &action, None).await
        }
        "get_vod_categories" => {
            categories(&state, &upstream, &headers, &params, &action, Some("movie")).await
        }
        "get_series_categories" => {
            categories(&state, &upstream, &headers, &params, &action, Some("series")).await
        }
        "get_live_streams" => {
            streams(&state, &upstream, &headers, &params, &action, XTREAM_FIELDS, None).await
        }
        "get_vod_streams" => {
            streams(
                &state,
                &upstream,
                &headers,
                &params,
                &action,
                XTREAM_FIELDS,
                Some("movie"),
            )
            .await
        }
        "get_series" => {
            streams(
                &state,
                &upstream,
                &headers,
                &params,
                &action,
                XTREAM_SERIES_FIELDS,
                Some("series"),
            )
            .await
        }
        "get_vod_info" => vod_info(&state, &upstream, &headers, &params).await,
        "get_series_info" => series_info(&state, &upstream, &headers, &params).await,
        "get_short_epg" | "get_simple_data_table" => {
            cached_passthrough(&state, &upstream, &params, &action).await
        }
        _ => passthrough(&state, &upstream, &params, &action).await,
    }
}

/// Resolve the subscriber against the upstream, through the auth cache.
/// Denials cache too; a dead login hammering us must not hammer the panel.
async fn authenticate(
    state: &AppState,
    upstream: &UpstreamRow,
    username: &str,
    password: &str,
) -> Result<Value, GatewayError> {
    let key = auth_cache_key(upstream.id, username, password);
    let auth_params: HashMap<String, String> = HashMap::from([
        ("username".to_string(), username.to_string()),
        ("password".to_string(), password.to_string()),
    ]);

    let payload: Value = state
        .cache
        .get_or_fetch(&key, state.config.auth_cache_ttl_secs, || {
            fetch_action(state, upstream, &auth_params, "")
        })
        .await
        .map_err(|e: FetchError| match e {
            FetchError::Http(401) => GatewayError::UpstreamAuthFailed,
            other => other.into(),
        })?;

    if payload.get("user_info").is_none() {
        return Err(GatewayError::MalformedUpstreamResponse(
            "auth response missing user_info".to_string(),
        ));
    }
    if !is_authorized(&payload) {
        return Err(GatewayError::UpstreamAuthFailed);
    }
    Ok(payload)
}

/// Forward an action to the upstream panel with the client's own credentials
async fn fetch_action(
    state: &AppState,
    upstream: &UpstreamRow,
    params: &HashMap<String, String>,
    action: &str,
) -> Result<Value, FetchError> {
    let url = format!("{}/player_api.php", upstream.base_url());
    let mut pairs: Vec<(&str, &str)> = params
        .iter()
        .filter(|(k, _)| k.as_str() != "action")
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    if !action.is_empty() {
        pairs.push(("action", action));
    }

    let timeout = Duration::from_secs(upstream.timeout_seconds.max(1) as u64);
    state.fetch.get_json(&url, &pairs, Some(timeout)).await
}

/// Cache key scoped to one provider; switching the active server must never
/// serve the previous server's pages
fn scoped_key(upstream: &UpstreamRow, params: &HashMap<String, String>, action: &str) -> String {
    let pairs: Vec<(&str, &str)> = params
        .iter()
        .filter(|(k, _)| k.as_str() != "action")
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    cache_key(&format!("{}|{}", upstream.id, action), &pairs)
}

/// Catalog page via the response cache. Upstream failure degrades to an
/// empty page so locally hosted items still surface.
async fn catalog_page(
    state: &AppState,
    upstream: &UpstreamRow,
    params: &HashMap<String, String>,
    action: &str,
) -> Value {
    let key = scoped_key(upstream, params, action);
    match state
        .cache
        .get_or_fetch(&key, state.config.catalog_cache_ttl_secs, || {
            fetch_action(state, upstream, params, action)
        })
        .await
    {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!("Upstream {} failed for '{}': {}", action, upstream.name, e);
            Value::Array(Vec::new())
        }
    }
}

/// Override rows for the listing merge. A store failure here downgrades to
/// an empty overlay; the upstream catalog still goes out unmodified.
async fn overlay_context(
    state: &AppState,
    upstream: &UpstreamRow,
    headers: &HeaderMap,
) -> OverlayContext {
    let (channels, categories) = tokio::join!(
        overrides::list_channel_overrides(&state.pool),
        overrides::list_category_overrides(&state.pool),
    );
    let channels = channels.unwrap_or_else(|e| {
        tracing::warn!("Channel override lookup failed: {}", e);
        Vec::new()
    });
    let categories = categories.unwrap_or_else(|e| {
        tracing::warn!("Category override lookup failed: {}", e);
        Vec::new()
    });
    OverlayContext::new(
        channels,
        categories,
        Some(upstream.base_url().to_string()),
        request_origin(&state.config.public_base_url, headers),
    )
}

async fn categories(
    state: &AppState,
    upstream: &UpstreamRow,
    headers: &HeaderMap,
    params: &HashMap<String, String>,
    action: &str,
    local_kind: Option<&str>,
) -> Result<Response, GatewayError> {
    let (ctx, raw, local_cats) = tokio::join!(
        overlay_context(state, upstream, headers),
        catalog_page(state, upstream, params, action),
        async {
            match local_kind {
                Some(kind) => local_content::distinct_categories(&state.pool, kind).await,
                None => Ok(Vec::new()),
            }
        },
    );
    let mut cats = categories_from_value(raw, XTREAM_CATEGORY_FIELDS);

    let local_cats = local_cats.unwrap_or_else(|e| {
        tracing::warn!("Local category lookup failed: {}", e);
        Vec::new()
    });
    for (id, name) in local_cats {
        if cats.iter().any(|c| c.id.as_deref() == Some(id.as_str())) {
            continue;
        }
        let value = json!({"category_id": id, "category_name": name, "parent_id": 0});
        if let Some(cat) = CategoryEntry::from_value(value, XTREAM_CATEGORY_FIELDS) {
            cats.push(cat);
        }
    }

    let merged = overlay::merge_categories(cats, &ctx);
    Ok(Json(categories_to_value(merged)).into_response())
}

async fn streams(
    state: &AppState,
    upstream: &UpstreamRow,
    headers: &HeaderMap,
    params: &HashMap<String, String>,
    action: &str,
    fields: FieldMap,
    local_kind: Option<&str>,
) -> Result<Response, GatewayError> {
    let (ctx, raw, local_rows) = tokio::join!(
        overlay_context(state, upstream, headers),
        catalog_page(state, upstream, params, action),
        async {
            match local_kind {
                Some(kind) => local_content::list_by_type(&state.pool, kind).await,
                None => Ok(Vec::new()),
            }
        },
    );
    let upstream_items = entries_from_value(raw, fields);

    let mut local_items = Vec::new();
    if let Some(kind) = local_kind {
        let rows = local_rows.unwrap_or_else(|e| {
            tracing::warn!("Local content lookup failed: {}", e);
            Vec::new()
        });
        let origin = request_origin(&state.config.public_base_url, headers);
        let category_filter = params
            .get("category_id")
            .map(String::as_str)
            .filter(|c| !c.is_empty());

        for row in rows {
            if let Some(filter) = category_filter {
                if row.category_id.as_deref() != Some(filter) {
                    continue;
                }
            }
            let value = match kind {
                "movie" => local_movie_item(&row, &origin),
                _ => local_series_item(&row, &origin),
            };
            if let Some(entry) = CatalogEntry::from_value(value, fields) {
                local_items.push(entry);
            }
        }
    }

    let merged = overlay::merge_entries(upstream_items, local_items, &ctx);
    Ok(Json(entries_to_value(merged)).into_response())
}

async fn vod_info(
    state: &AppState,
    upstream: &UpstreamRow,
    headers: &HeaderMap,
    params: &HashMap<String, String>,
) -> Result<Response, GatewayError> {
    let vod_id = params.get("vod_id").map(String::as_str).unwrap_or("");
    if !vod_id.is_empty() {
        if let Some(row) = local_content::find_by_stream_key(&state.pool, vod_id).await? {
            if row.content_type == "movie" {
                let origin = request_origin(&state.config.public_base_url, headers);
                return Ok(Json(local_vod_info(&row, &origin)).into_response());
            }
        }
    }
    cached_passthrough(state, upstream, params, "get_vod_info").await
}

async fn series_info(
    state: &AppState,
    upstream: &UpstreamRow,
    headers: &HeaderMap,
    params: &HashMap<String, String>,
) -> Result<Response, GatewayError> {
    let series_id = params.get("series_id").map(String::as_str).unwrap_or("");
    if !series_id.is_empty() {
        if let Some(row) = local_content::find_by_stream_key(&state.pool, series_id).await? {
            if row.content_type == "series" {
                let episodes = local_content::episodes_for_series(&state.pool, row.id).await?;
                let origin = request_origin(&state.config.public_base_url, headers);
                return Ok(Json(local_series_info(&row, &episodes, &origin)).into_response());
            }
        }
    }
    cached_passthrough(state, upstream, params, "get_series_info").await
}

/// Upstream JSON through the response cache (EPG and detail shapes)
async fn cached_passthrough(
    state: &AppState,
    upstream: &UpstreamRow,
    params: &HashMap<String, String>,
    action: &str,
) -> Result<Response, GatewayError> {
    let key = scoped_key(upstream, params, action);
    let value: Value = state
        .cache
        .get_or_fetch(&key, state.config.catalog_cache_ttl_secs, || {
            fetch_action(state, upstream, params, action)
        })
        .await
        .map_err(GatewayError::from)?;
    Ok(Json(value).into_response())
}

/// Unknown actions forward verbatim; whatever the panel says goes back
async fn passthrough(
    state: &AppState,
    upstream: &UpstreamRow,
    params: &HashMap<String, String>,
    action: &str,
) -> Result<Response, GatewayError> {
    let value = fetch_action(state, upstream, params, action)
        .await
        .map_err(GatewayError::from)?;
    Ok(Json(value).into_response())
}

/// Panels disagree on the auth flag type: 1, "1", and true all mean yes
fn is_authorized(payload: &Value) -> bool {
    match payload.pointer("/user_info/auth") {
        Some(Value::Number(n)) => n.as_i64() == Some(1),
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s == "1",
        _ => false,
    }
}

/// server_info pointing the client at the host it reached us on
fn server_info_for(origin: &str) -> Value {
    let (proto, rest) = origin.split_once("://").unwrap_or(("http", origin));
    let (host, port) = match rest.rsplit_once(':') {
        Some((h, p)) if !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()) => (h, Some(p)),
        _ => (rest, None),
    };
    let default_port = if proto == "https" { "443" } else { "80" };
    let now = Utc::now();

    json!({
        "url": host,
        "port": port.unwrap_or(default_port),
        "https_port": if proto == "https" { port.unwrap_or("443") } else { "443" },
        "server_protocol": proto,
        "rtmp_port": "",
        "timezone": "UTC",
        "timestamp_now": now.timestamp(),
        "time_now": now.format("%Y-%m-%d %H:%M:%S").to_string(),
    })
}

fn poster_url(row: &LocalContentRow, origin: &str) -> String {
    row.poster_url
        .as_deref()
        .map(|p| overlay::absolutize(p, origin))
        .unwrap_or_default()
}

/// File extension for the player, from the stored stream URL
fn container_extension(url: Option<&str>) -> String {
    url.and_then(|u| u.split(|c| c == '?' || c == '#').next())
        .and_then(|u| u.rsplit('/').next())
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| (1..=4).contains(&ext.len()) && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or_else(|| "mp4".to_string())
}

/// Local movie in Xtream VOD listing shape
fn local_movie_item(row: &LocalContentRow, origin: &str) -> Value {
    json!({
        "num": 0,
        "name": row.title,
        "stream_type": "movie",
        "stream_id": row.client_stream_id(),
        "stream_icon": poster_url(row, origin),
        "rating": "",
        "rating_5based": 0,
        "added": row.created_at.timestamp().to_string(),
        "category_id": row.category_id.clone().unwrap_or_else(|| "local_movies".to_string()),
        "container_extension": container_extension(row.stream_url.as_deref()),
        "custom_sid": "",
        "direct_source": ""
    })
}

/// Local series container in Xtream series listing shape
fn local_series_item(row: &LocalContentRow, origin: &str) -> Value {
    json!({
        "num": 0,
        "name": row.title,
        "series_id": row.client_stream_id(),
        "cover": poster_url(row, origin),
        "plot": row.description.clone().unwrap_or_default(),
        "cast": "",
        "director": "",
        "genre": row.category_name.clone().unwrap_or_default(),
        "releaseDate": "",
        "last_modified": row.updated_at.timestamp().to_string(),
        "rating": "0",
        "rating_5based": 0,
        "backdrop_path": [],
        "youtube_trailer": "",
        "episode_run_time": "",
        "category_id": row.category_id.clone().unwrap_or_else(|| "local_series".to_string())
    })
}

fn local_vod_info(row: &LocalContentRow, origin: &str) -> Value {
    json!({
        "info": {
            "movie_image": poster_url(row, origin),
            "plot": row.description.clone().unwrap_or_default(),
            "cast": "",
            "director": "",
            "genre": row.category_name.clone().unwrap_or_default(),
            "releasedate": "",
            "duration_secs": 0,
            "duration": "",
            "backdrop_path": []
        },
        "movie_data": {
            "stream_id": row.client_stream_id(),
            "name": row.title,
            "added": row.created_at.timestamp().to_string(),
            "category_id": row.category_id.clone().unwrap_or_else(|| "local_movies".to_string()),
            "container_extension": container_extension(row.stream_url.as_deref()),
            "custom_sid": "",
            "direct_source": ""
        }
    })
}

fn local_series_info(
    row: &LocalContentRow,
    episodes: &[LocalEpisodeRow],
    origin: &str,
) -> Value {
    let mut by_season: BTreeMap<i32, Vec<Value>> = BTreeMap::new();
    for ep in episodes {
        by_season.entry(ep.season_num).or_default().push(json!({
            "id": ep.client_stream_id().to_string(),
            "episode_num": ep.episode_num,
            "title": ep.title.clone().unwrap_or_else(|| format!("Episode {}", ep.episode_num)),
            "container_extension": ep.container_extension,
            "season": ep.season_num,
            "info": { "duration": ep.duration },
            "custom_sid": "",
            "added": ep.created_at.timestamp().to_string(),
            "direct_source": ""
        }));
    }

    let seasons: Vec<Value> = by_season
        .iter()
        .map(|(season, eps)| {
            json!({
                "season_number": season,
                "name": format!("Season {}", season),
                "episode_count": eps.len(),
                "overview": "",
                "air_date": "",
                "cover": poster_url(row, origin),
                "cover_big": poster_url(row, origin)
            })
        })
        .collect();

    let episodes_map: Map<String, Value> = by_season
        .into_iter()
        .map(|(season, eps)| (season.to_string(), Value::Array(eps)))
        .collect();

    json!({
        "seasons": seasons,
        "info": {
            "name": row.title,
            "cover": poster_url(row, origin),
            "plot": row.description.clone().unwrap_or_default(),
            "cast": "",
            "director": "",
            "genre": row.category_name.clone().unwrap_or_default(),
            "releaseDate": "",
            "last_modified": row.updated_at.timestamp().to_string(),
            "rating": "0",
            "rating_5based": 0,
            "backdrop_path": [],
            "youtube_trailer": "",
            "episode_run_time": "",
            "category_id": row.category_id.clone().unwrap_or_else(|| "local_series".to_string())
        },
        "episodes": episodes_map
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn movie_row() -> LocalContentRow {
        LocalContentRow {
            id: Uuid::new_v4(),
            title: "Test Movie".into(),
            description: Some("plot".into()),
            content_type: "movie".into(),
            poster_url: Some("/posters/m.jpg".into()),
            stream_url: Some("http://files.example/m.mkv?token=1".into()),
            subtitle_url: None,
            category_id: None,
            category_name: None,
            stream_id: Some("123456".into()),
            metadata: json!({}),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn episode_row(season: i32, number: i32) -> LocalEpisodeRow {
        LocalEpisodeRow {
            id: Uuid::new_v4(),
            series_id: Uuid::new_v4(),
            season_num: season,
            episode_num: number,
            title: None,
            stream_url: "http://files.example/e.mp4".into(),
            stream_id: Some(format!("9{}{}", season, number)),
            container_extension: "mp4".into(),
            duration: "00:42:00".into(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn auth_flag_accepts_every_upstream_spelling() {
        assert!(is_authorized(&json!({"user_info": {"auth": 1}})));
        assert!(is_authorized(&json!({"user_info": {"auth": "1"}})));
        assert!(is_authorized(&json!({"user_info": {"auth": true}})));
        assert!(!is_authorized(&json!({"user_info": {"auth": 0}})));
        assert!(!is_authorized(&json!({"user_info": {}})));
        assert!(!is_authorized(&json!({})));
    }

    #[test]
    fn server_info_reflects_the_inbound_origin() {
        let info = server_info_for("http://panel.example:8080");
        assert_eq!(info["url"], "panel.example");
        assert_eq!(info["port"], "8080");
        assert_eq!(info["server_protocol"], "http");

        let info = server_info_for("https://panel.example");
        assert_eq!(info["url"], "panel.example");
        assert_eq!(info["port"], "443");
        assert_eq!(info["https_port"], "443");
        assert_eq!(info["server_protocol"], "https");
    }

    #[test]
    fn container_extension_reads_the_file_suffix() {
        assert_eq!(container_extension(Some("http://x/film.MKV?t=1")), "mkv");
        assert_eq!(container_extension(Some("http://x/stream/film.mp4")), "mp4");
        assert_eq!(container_extension(Some("http://x/no-extension")), "mp4");
        assert_eq!(container_extension(None), "mp4");
    }

    #[test]
    fn local_movie_item_defaults_its_category() {
        let item = local_movie_item(&movie_row(), "https://panel.example");
        assert_eq!(item["stream_id"], 123456);
        assert_eq!(item["category_id"], "local_movies");
        assert_eq!(item["container_extension"], "mkv");
        assert_eq!(item["stream_icon"], "https://panel.example/posters/m.jpg");
    }

    #[test]
    fn series_info_groups_episodes_by_season() {
        let mut row = movie_row();
        row.content_type = "series".into();
        let episodes = vec![episode_row(1, 1), episode_row(1, 2), episode_row(2, 1)];

        let info = local_series_info(&row, &episodes, "http://panel.example");
        let seasons = info["seasons"].as_array().unwrap();
        assert_eq!(seasons.len(), 2);
        assert_eq!(seasons[0]["season_number"], 1);
        assert_eq!(seasons[0]["episode_count"], 2);

        assert_eq!(info["episodes"]["1"].as_array().unwrap().len(), 2);
        assert_eq!(info["episodes"]["2"].as_array().unwrap().len(), 1);
        assert_eq!(info["episodes"]["1"][0]["id"], "911");
    }
}
