//! Stalker portal surface: /portal.php, /c/server.php, /c/portal.php
//!
//! Requests forward to the sticky upstream with a MAG box header profile.
//! Panels expose this endpoint at different paths, so candidates are tried
//! in order until one stops answering 404/403/520. Catalog actions get the
//! overlay treatment on the way back; everything else passes through with
//! cookies and redirects rewritten to keep the session on this host.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{Query, RawQuery, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use serde_json::{json, Value};

use crate::db::models::LocalContentRow;
use crate::db::repository::local_content;
use crate::error::GatewayError;
use crate::models::catalog::{
    coerce_i64, entries_to_value, CatalogEntry, CategoryEntry, STALKER_FIELDS,
    STALKER_GENRE_FIELDS,
};
use crate::routes::{request_origin, sticky_base_url};
use crate::services::fetch::{first_success, header_pairs, FetchError};
use crate::services::overlay::{self, OverlayContext};
use crate::services::{rewrite, stalker};
use crate::AppState;

/// Portal endpoint statuses that mean "wrong path", not "bad request"
fn wrong_path(status: u16) -> bool {
    matches!(status, 404 | 403 | 520)
}

/// GET/POST portal handler
pub async fn handle(
    State(state): State<Arc<AppState>>,
    method: Method,
    headers: HeaderMap,
    RawQuery(raw_query): RawQuery,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> Result<Response, GatewayError> {
    let authorization = headers.get("authorization").and_then(|v| v.to_str().ok());
    let cookie = headers.get("cookie").and_then(|v| v.to_str().ok());
    let mac = stalker::extract_mac(query.get("mac").map(String::as_str), authorization, cookie);

    let Some(mac) = mac else {
        let accept = headers.get("accept").and_then(|v| v.to_str().ok());
        if stalker::wants_html(accept) {
            return Ok(Html(stalker::MAC_PROMPT_HTML).into_response());
        }
        return Err(GatewayError::Validation(
            "mac address required (query, bearer token or cookie)".to_string(),
        ));
    };

    let origin = request_origin(&state.config.public_base_url, &headers);
    let action = query.get("action").map(String::as_str).unwrap_or("");
    let list_type = query.get("type").map(String::as_str).unwrap_or("");
    let genre = query
        .get("genre")
        .or_else(|| query.get("category"))
        .map(String::as_str)
        .unwrap_or("");

    // locally hosted items resolve without touching the upstream
    if action == "create_link" {
        let cmd = query.get("cmd").map(String::as_str).unwrap_or("");
        if let Some(key) = stalker::parse_local_cmd(cmd) {
            return local_create_link(&state, key, &origin).await;
        }
    }
    if action == "get_ordered_list" {
        if let Some(category_id) = stalker::decode_local_genre(genre) {
            return local_ordered_list(&state, &category_id, genre, &origin).await;
        }
    }

    let base = sticky_base_url(&state, Some(&mac)).await?;

    let mut stb = stalker::stb_headers(
        &base,
        Some(&mac),
        authorization,
        &state.config.stb_user_agent,
    );
    if let Some(ct) = headers.get("content-type").and_then(|v| v.to_str().ok()) {
        stb.push(("Content-Type".to_string(), ct.to_string()));
    }

    let candidates = stalker::candidate_urls(
        &base,
        &state.config.stalker_candidates,
        raw_query.as_deref().unwrap_or(""),
    );
    let fetch = &state.fetch;
    let stb = &stb;
    let method = &method;
    let body_bytes = &body;

    let upstream_resp = first_success(&candidates, candidates.len(), wrong_path, |url| {
        async move {
            let out_method = reqwest::Method::from_bytes(method.as_str().as_bytes())
                .unwrap_or(reqwest::Method::GET);
            let out_body = (!body_bytes.is_empty()).then(|| body_bytes.to_vec());
            let resp = fetch.send_raw(out_method, &url, stb, out_body, None).await?;
            Ok((resp.status().as_u16(), resp))
        }
    })
    .await
    .map_err(GatewayError::from)?;

    let status = upstream_resp.status().as_u16();
    let upstream_headers = header_pairs(upstream_resp.headers());
    let upstream_host = rewrite::host_of(&base);
    let bytes = upstream_resp
        .bytes()
        .await
        .map_err(FetchError::from)
        .map_err(GatewayError::from)?;

    let rebuilt = if status == 200 {
        let page = query.get("p").and_then(|p| p.parse::<u32>().ok()).unwrap_or(1);
        match rework_catalog(&state, &base, &origin, action, list_type, genre, page, &bytes).await {
            Ok(rebuilt) => rebuilt,
            Err(e) => {
                tracing::warn!("Catalog rework failed for '{}', passing body through: {}", action, e);
                None
            }
        }
    } else {
        None
    };

    let (body, rebuilt_json) = match rebuilt {
        Some(b) => (Body::from(b), true),
        None => (Body::from(bytes), false),
    };
    Ok(passthrough_response(
        status,
        &upstream_headers,
        body,
        rebuilt_json,
        upstream_host.as_deref(),
        &origin,
    ))
}

/// Catalog actions rebuilt on the way back. `Ok(None)` means "body untouched".
async fn rework_catalog(
    state: &AppState,
    base: &str,
    origin: &str,
    action: &str,
    list_type: &str,
    genre: &str,
    page: u32,
    bytes: &[u8],
) -> Result<Option<Vec<u8>>, GatewayError> {
    match action {
        "get_genres" | "get_categories" => {
            let ctx = overlay_context(state, Some(base), origin).await?;
            let append_local = list_type == "vod" || action == "get_categories";
            rework_genres(state, bytes, &ctx, append_local).await
        }
        "get_ordered_list" | "get_all_channels" => {
            let ctx = overlay_context(state, Some(base), origin).await?;
            let append_local = action == "get_ordered_list"
                && list_type == "vod"
                && page <= 1
                && (genre.is_empty() || genre == stalker::LOCAL_ALL_KEY);
            rework_ordered_list(state, bytes, &ctx, append_local, origin).await
        }
        _ => Ok(None),
    }
}

async fn overlay_context(
    state: &AppState,
    upstream_base: Option<&str>,
    origin: &str,
) -> Result<OverlayContext, GatewayError> {
    use crate::db::repository::overrides;
    let (channels, categories) = tokio::try_join!(
        overrides::list_channel_overrides(&state.pool),
        overrides::list_category_overrides(&state.pool),
    )?;
    Ok(OverlayContext::new(
        channels,
        categories,
        upstream_base.map(str::to_string),
        origin.to_string(),
    ))
}

/// Rework a `{"js": [...]}` genre list: overrides applied, then for VOD a
/// catch-all "Local" genre plus one genre per local category. `None` means
/// "body untouched".
async fn rework_genres(
    state: &AppState,
    bytes: &[u8],
    ctx: &OverlayContext,
    append_local: bool,
) -> Result<Option<Vec<u8>>, GatewayError> {
    let mut payload: Value = match serde_json::from_slice(bytes) {
        Ok(v) => v,
        Err(_) => return Ok(None),
    };
    let Some(js) = payload.get_mut("js") else {
        return Ok(None);
    };
    let rows = match js.take() {
        Value::Array(rows) => rows,
        _ => return Ok(None),
    };

    let cats: Vec<CategoryEntry> = rows
        .into_iter()
        .filter_map(|v| CategoryEntry::from_value(v, STALKER_GENRE_FIELDS))
        .collect();
    let mut merged = overlay::merge_categories(cats, ctx);

    // a rename must hit the alias too, boxes display either
    for cat in &mut merged {
        if let Some(id) = cat.id.clone() {
            if let Some(name) = ctx.renamed_category_name(&id) {
                cat.set_field("alias", json!(name));
            }
        }
    }

    if append_local {
        let locals = local_content::distinct_categories(&state.pool, "movie").await?;
        let mut synthetic = Vec::with_capacity(locals.len() + 1);
        if !locals.is_empty() {
            synthetic.push((stalker::LOCAL_ALL_KEY.to_string(), "Local".to_string()));
        }
        synthetic.extend(locals);

        for (id, name) in synthetic {
            if id != stalker::LOCAL_ALL_KEY && ctx.is_category_hidden(&id) {
                continue;
            }
            let display = ctx.renamed_category_name(&id).unwrap_or(name.as_str());
            let encoded = stalker::encode_local_genre(&id);
            if merged.iter().any(|c| c.id.as_deref() == Some(encoded.as_str())) {
                continue;
            }
            let value = json!({"id": encoded, "title": display, "alias": display, "censored": 0});
            if let Some(cat) = CategoryEntry::from_value(value, STALKER_GENRE_FIELDS) {
                merged.push(cat);
            }
        }
    }

    *js = Value::Array(merged.into_iter().map(CategoryEntry::into_value).collect());
    serde_json::to_vec(&payload)
        .map(Some)
        .map_err(|e| GatewayError::MalformedUpstreamResponse(e.to_string()))
}

/// Apply hide/rename/logo overrides to a `{"js":{"data":[...]}}` page and
/// correct `total_items` for whatever was dropped or appended.
async fn rework_ordered_list(
    state: &AppState,
    bytes: &[u8],
    ctx: &OverlayContext,
    append_local: bool,
    origin: &str,
) -> Result<Option<Vec<u8>>, GatewayError> {
    let locals = if append_local {
        local_vod_entries(state, ctx, origin).await?
    } else {
        Vec::new()
    };
    apply_ordered_overrides(bytes, ctx, locals)
}

fn apply_ordered_overrides(
    bytes: &[u8],
    ctx: &OverlayContext,
    locals: Vec<CatalogEntry>,
) -> Result<Option<Vec<u8>>, GatewayError> {
    let mut payload: Value = match serde_json::from_slice(bytes) {
        Ok(v) => v,
        Err(_) => return Ok(None),
    };
    let Some(js) = payload.get_mut("js") else {
        return Ok(None);
    };
    let Some(data) = js.get_mut("data") else {
        return Ok(None);
    };
    let rows = match data.take() {
        Value::Array(rows) => rows,
        _ => return Ok(None),
    };
    let before = rows.len();

    let entries: Vec<CatalogEntry> = rows
        .into_iter()
        .filter_map(|v| CatalogEntry::from_value(v, STALKER_FIELDS))
        .collect();
    let merged = overlay::merge_entries(entries, locals, ctx);
    let after = merged.len();

    *data = entries_to_value(merged);
    if let Some(total) = js.get("total_items").and_then(coerce_i64) {
        js["total_items"] = json!((total - before as i64 + after as i64).max(0));
    }
    serde_json::to_vec(&payload)
        .map(Some)
        .map_err(|e| GatewayError::MalformedUpstreamResponse(e.to_string()))
}

/// Local movies in the Stalker row shape, visible categories only
async fn local_vod_entries(
    state: &AppState,
    ctx: &OverlayContext,
    origin: &str,
) -> Result<Vec<CatalogEntry>, GatewayError> {
    let rows = local_content::list_by_type(&state.pool, "movie").await?;
    Ok(rows
        .iter()
        .filter(|row| match row.category_id.as_deref() {
            Some(cat) => !ctx.is_category_hidden(cat),
            None => true,
        })
        .map(|row| {
            let genre = row
                .category_id
                .as_deref()
                .map(stalker::encode_local_genre)
                .unwrap_or_else(|| stalker::encode_local_genre(stalker::LOCAL_ALL_KEY));
            local_stalker_item(row, &genre, origin)
        })
        .filter_map(|v| CatalogEntry::from_value(v, STALKER_FIELDS))
        .collect())
}

/// One local movie as a Stalker VOD row
fn local_stalker_item(row: &LocalContentRow, genre_id: &str, origin: &str) -> Value {
    let key = row.lookup_key();
    let poster = row
        .poster_url
        .as_deref()
        .map(|p| overlay::absolutize(p, origin))
        .unwrap_or_default();
    json!({
        "id": key,
        "name": row.title,
        "o_name": row.title,
        "description": row.description.clone().unwrap_or_default(),
        "screenshot_uri": poster,
        "logo": poster,
        "genre_id": genre_id,
        "category_id": genre_id,
        "cmd": stalker::local_cmd(&key),
        "added": row.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        "censored": 0,
        "hd": 1,
        "series": []
    })
}

/// Serve a synthetic local genre as an ordered list page
async fn local_ordered_list(
    state: &AppState,
    category_id: &str,
    genre_param: &str,
    origin: &str,
) -> Result<Response, GatewayError> {
    let ctx = overlay_context(state, None, origin).await?;
    let items: Vec<Value> = if category_id != stalker::LOCAL_ALL_KEY
        && ctx.is_category_hidden(category_id)
    {
        Vec::new()
    } else {
        local_content::list_by_type(&state.pool, "movie")
            .await?
            .iter()
            .filter(|row| {
                if category_id == stalker::LOCAL_ALL_KEY {
                    match row.category_id.as_deref() {
                        Some(cat) => !ctx.is_category_hidden(cat),
                        None => true,
                    }
                } else {
                    row.category_id.as_deref() == Some(category_id)
                }
            })
            .map(|row| local_stalker_item(row, genre_param, origin))
            .collect()
    };

    let payload = stalker::js_envelope(json!({
        "total_items": items.len(),
        "max_page_items": items.len().max(1),
        "selected_item": 0,
        "cur_page": 1,
        "data": items
    }));
    Ok(axum::Json(payload).into_response())
}

/// Resolve a `local:` cmd to a playable URL
async fn local_create_link(
    state: &AppState,
    key: &str,
    origin: &str,
) -> Result<Response, GatewayError> {
    let target = match local_content::find_by_stream_key(&state.pool, key).await? {
        Some(row) if row.content_type == "movie" => row.stream_url,
        _ => local_content::find_episode_by_stream_key(&state.pool, key)
            .await?
            .map(|ep| ep.stream_url),
    };

    let Some(url) = target.filter(|u| !u.is_empty()) else {
        return Ok((
            StatusCode::NOT_FOUND,
            axum::Json(json!({"error": "unknown local stream"})),
        )
            .into_response());
    };

    let absolute = overlay::absolutize(&url, origin);
    let payload = stalker::js_envelope(json!({
        "id": key,
        "cmd": format!("ffmpeg {}", absolute)
    }));
    Ok(axum::Json(payload).into_response())
}

/// Rebuild the upstream response for the client: hop-by-hop headers dropped,
/// cookie domains stripped, redirects pointed back at us, caching disabled.
pub(crate) fn passthrough_response(
    status: u16,
    upstream_headers: &[(String, String)],
    body: Body,
    rebuilt_json: bool,
    upstream_host: Option<&str>,
    public_origin: &str,
) -> Response {
    let mut builder =
        Response::builder().status(StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY));

    for (name, value) in upstream_headers {
        match name.to_ascii_lowercase().as_str() {
            "connection" | "keep-alive" | "transfer-encoding" | "content-length"
            | "content-encoding" | "cache-control" | "access-control-allow-origin" => continue,
            "set-cookie" => {
                builder = builder.header("set-cookie", rewrite::strip_cookie_domain(value));
            }
            "location" => {
                let location = match upstream_host {
                    Some(host) => rewrite::rewrite_location(value, host, public_origin),
                    None => value.clone(),
                };
                builder = builder.header("location", location);
            }
            "content-type" if rebuilt_json => continue,
            _ => {
                builder = builder.header(name, value);
            }
        }
    }

    if rebuilt_json {
        builder = builder.header("content-type", "application/json");
    }
    builder = builder
        .header("cache-control", "no-store")
        .header("access-control-allow-origin", "*");

    builder
        .body(body)
        .unwrap_or_else(|_| StatusCode::BAD_GATEWAY.into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{CategoryOverrideRow, ChannelOverrideRow};
    use chrono::Utc;

    fn ctx(
        channels: Vec<ChannelOverrideRow>,
        categories: Vec<CategoryOverrideRow>,
    ) -> OverlayContext {
        OverlayContext::new(
            channels,
            categories,
            Some("http://up.example".to_string()),
            "https://panel.example".to_string(),
        )
    }

    fn ordered_list_body(ids: &[i64], total: i64) -> Vec<u8> {
        let data: Vec<Value> = ids
            .iter()
            .map(|id| json!({"id": id.to_string(), "name": format!("ch{}", id), "tv_genre_id": "1"}))
            .collect();
        serde_json::to_vec(&json!({"js": {"total_items": total, "data": data}})).unwrap()
    }

    #[test]
    fn ordered_list_pages_get_hide_and_total_fix_applied() {
        let hidden = ChannelOverrideRow {
            stream_id: 11,
            custom_name: None,
            logo_url: None,
            is_hidden: true,
            updated_at: Utc::now(),
        };
        let out = apply_ordered_overrides(
            &ordered_list_body(&[10, 11], 42),
            &ctx(vec![hidden], Vec::new()),
            Vec::new(),
        )
        .unwrap()
        .unwrap();
        let v: Value = serde_json::from_slice(&out).unwrap();
        let data = v["js"]["data"].as_array().unwrap();
        assert_eq!(data.len(), 1);
        assert_eq!(data[0]["id"], "10");
        assert_eq!(v["js"]["total_items"], json!(41));
    }

    #[test]
    fn non_json_bodies_pass_through_untouched() {
        let out = apply_ordered_overrides(b"<html>auth</html>", &ctx(Vec::new(), Vec::new()), Vec::new())
            .unwrap();
        assert!(out.is_none());

        let no_data = serde_json::to_vec(&json!({"js": {"token": "abc"}})).unwrap();
        let out = apply_ordered_overrides(&no_data, &ctx(Vec::new(), Vec::new()), Vec::new()).unwrap();
        assert!(out.is_none());
    }

    #[test]
    fn local_items_keep_the_stalker_row_shape() {
        let row = LocalContentRow {
            id: uuid::Uuid::nil(),
            title: "Home Movie".to_string(),
            description: None,
            content_type: "movie".to_string(),
            poster_url: Some("/posters/home.jpg".to_string()),
            stream_url: Some("/media/home.mp4".to_string()),
            subtitle_url: None,
            category_id: Some("family".to_string()),
            category_name: Some("Family".to_string()),
            stream_id: Some("7001".to_string()),
            metadata: json!({}),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let item = local_stalker_item(&row, "ff2a", "https://panel.example");
        assert_eq!(item["id"], "7001");
        assert_eq!(item["cmd"], "local:7001");
        assert_eq!(item["genre_id"], "ff2a");
        assert_eq!(item["screenshot_uri"], "https://panel.example/posters/home.jpg");
    }

    #[test]
    fn passthrough_keeps_cookies_but_not_their_domain() {
        let headers = vec![
            (
                "set-cookie".to_string(),
                "PHPSESSID=abc; Domain=up.example; Path=/".to_string(),
            ),
            ("transfer-encoding".to_string(), "chunked".to_string()),
            ("content-type".to_string(), "text/html".to_string()),
        ];
        let resp = passthrough_response(
            200,
            &headers,
            Body::from("ok"),
            false,
            Some("up.example"),
            "https://panel.example",
        );

        let cookie = resp.headers().get("set-cookie").unwrap().to_str().unwrap();
        assert!(!cookie.to_lowercase().contains("domain="));
        assert!(resp.headers().get("transfer-encoding").is_none());
        assert_eq!(
            resp.headers().get("cache-control").unwrap().to_str().unwrap(),
            "no-store"
        );
    }

    #[test]
    fn upstream_redirects_point_back_at_us() {
        let headers = vec![(
            "location".to_string(),
            "http://up.example/stalker_portal/c/".to_string(),
        )];
        let resp = passthrough_response(
            302,
            &headers,
            Body::empty(),
            false,
            Some("up.example"),
            "https://panel.example",
        );

        let location = resp.headers().get("location").unwrap().to_str().unwrap();
        assert!(location.starts_with("https://panel.example"));
        assert!(!location.contains("up.example"));
    }
}
