//! Playlist and EPG documents: /get.php, /xmltv.php, /enigma2.php
//!
//! Full-document proxies. The upstream generates the file with its own base
//! URL baked into every line; we swap those for the public origin so players
//! keep coming back through the gateway. Documents are big and slow to
//! generate upstream, hence the long timeout.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{header, HeaderMap};
use axum::response::{IntoResponse, Response};

use crate::error::GatewayError;
use crate::routes::{active_upstream, client_ip, request_origin, sticky_base_url};
use crate::services::rewrite;
use crate::AppState;

/// M3U playlist, Xtream `get.php` shape
pub async fn get_php(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Response, GatewayError> {
    let upstream = active_upstream(&state).await?;
    let base = upstream.base_url().to_string();
    let body = fetch_document(&state, &base, "get.php", &query).await?;
    let origin = request_origin(&state.config.public_base_url, &headers);
    let rewritten = rewrite::rewrite_base_urls(&body, &base, &origin);

    Ok(document_response(rewritten, "audio/x-mpegurl", "playlist.m3u"))
}

/// XMLTV EPG; sticky by client IP so guide ids line up with the portal
pub async fn xmltv(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Response, GatewayError> {
    let ip = client_ip(&headers);
    let base = sticky_base_url(&state, ip.as_deref()).await?;
    let body = fetch_document(&state, &base, "xmltv.php", &query).await?;
    let origin = request_origin(&state.config.public_base_url, &headers);
    let rewritten = rewrite::rewrite_base_urls(&body, &base, &origin);

    Ok(document_response(rewritten, "application/xml", "epg.xml"))
}

/// Enigma2 bouquet file
pub async fn enigma2(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Response, GatewayError> {
    let upstream = active_upstream(&state).await?;
    let base = upstream.base_url().to_string();
    let body = fetch_document(&state, &base, "enigma2.php", &query).await?;
    let origin = request_origin(&state.config.public_base_url, &headers);
    let rewritten = rewrite::rewrite_base_urls(&body, &base, &origin);

    Ok(document_response(rewritten, "text/plain", "bouquet.tv"))
}

async fn fetch_document(
    state: &AppState,
    base: &str,
    script: &str,
    query: &HashMap<String, String>,
) -> Result<String, GatewayError> {
    let url = format!("{}/{}", base.trim_end_matches('/'), script);
    let params: Vec<(&str, &str)> = query.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
    let timeout = Duration::from_secs(state.config.document_timeout_secs);
    let (body, _content_type) = state
        .fetch
        .get_text(&url, &params, Some(timeout))
        .await
        .map_err(GatewayError::from)?;
    Ok(body)
}

fn document_response(body: String, content_type: &str, filename: &str) -> Response {
    (
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
            (header::CACHE_CONTROL, "no-store".to_string()),
        ],
        body,
    )
        .into_response()
}
