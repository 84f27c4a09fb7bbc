//! Static asset pass-through for the Stalker `/c/` tree
//!
//! MAG boxes bootstrap from `/c/` (loader HTML, xpcom JS, images, fonts).
//! Text bodies are buffered and rewritten so every reference to the upstream
//! host points back here; binaries stream straight through.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, RawQuery, State};
use axum::http::{HeaderMap, Method};
use axum::response::Response;

use crate::error::GatewayError;
use crate::routes::portal::passthrough_response;
use crate::routes::{client_ip, request_origin, sticky_base_url};
use crate::services::fetch::{header_pairs, FetchError};
use crate::services::{rewrite, stalker};
use crate::AppState;

/// `/c` and `/c/`
pub async fn root(
    State(state): State<Arc<AppState>>,
    method: Method,
    headers: HeaderMap,
    RawQuery(raw_query): RawQuery,
) -> Result<Response, GatewayError> {
    serve(&state, method, &headers, "", raw_query.as_deref()).await
}

/// `/c/*path`
pub async fn asset(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
    method: Method,
    headers: HeaderMap,
    RawQuery(raw_query): RawQuery,
) -> Result<Response, GatewayError> {
    serve(&state, method, &headers, &path, raw_query.as_deref()).await
}

async fn serve(
    state: &AppState,
    method: Method,
    headers: &HeaderMap,
    path: &str,
    raw_query: Option<&str>,
) -> Result<Response, GatewayError> {
    let authorization = headers.get("authorization").and_then(|v| v.to_str().ok());
    let cookie = headers.get("cookie").and_then(|v| v.to_str().ok());
    let mac = stalker::extract_mac(None, authorization, cookie);
    let identifier = mac.clone().or_else(|| client_ip(headers));

    let base = sticky_base_url(state, identifier.as_deref()).await?;
    let origin = request_origin(&state.config.public_base_url, headers);
    let upstream_host = rewrite::host_of(&base);

    let mut url = format!("{}/c/{}", base.trim_end_matches('/'), path.trim_start_matches('/'));
    if let Some(q) = raw_query.filter(|q| !q.is_empty()) {
        url.push('?');
        url.push_str(q);
    }

    let stb = stalker::stb_headers(&base, mac.as_deref(), authorization, &state.config.stb_user_agent);
    let out_method =
        reqwest::Method::from_bytes(method.as_str().as_bytes()).unwrap_or(reqwest::Method::GET);
    let resp = state
        .fetch
        .send_raw(out_method, &url, &stb, None, None)
        .await
        .map_err(GatewayError::from)?;

    let status = resp.status().as_u16();
    let upstream_headers = header_pairs(resp.headers());
    let content_type = upstream_headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("content-type"))
        .map(|(_, value)| value.clone());

    let body = if rewrite::is_text_body(content_type.as_deref()) {
        let bytes = resp
            .bytes()
            .await
            .map_err(FetchError::from)
            .map_err(GatewayError::from)?;
        let text = String::from_utf8_lossy(&bytes);
        let mut rewritten = match upstream_host.as_deref() {
            Some(host) => rewrite::rewrite_portal_references(&text, host, &origin),
            None => text.into_owned(),
        };
        let is_html = content_type
            .as_deref()
            .map(|ct| ct.contains("text/html"))
            .unwrap_or(false);
        if is_html {
            rewritten = rewrite::inject_base_href(&rewritten, &origin);
        }
        Body::from(rewritten)
    } else {
        Body::from_stream(resp.bytes_stream())
    };

    Ok(passthrough_response(
        status,
        &upstream_headers,
        body,
        false,
        upstream_host.as_deref(),
        &origin,
    ))
}
