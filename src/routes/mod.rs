//! HTTP surface
//!
//! Protocol endpoints (player_api, portal, stream redirects, playlist
//! documents) plus the admin and ops APIs. The request-context helpers every
//! adapter needs live here.

pub mod admin;
pub mod assets;
pub mod health;
pub mod player_api;
pub mod playlist;
pub mod portal;
pub mod stream;

use axum::http::HeaderMap;

use crate::db::UpstreamRow;
use crate::error::GatewayError;
use crate::services::selector;
use crate::AppState;

/// The admin-designated active upstream, or the no-provider error
pub(crate) async fn active_upstream(state: &AppState) -> Result<UpstreamRow, GatewayError> {
    state
        .active
        .resolve(&state.pool)
        .await?
        .ok_or(GatewayError::NoProviderConfigured)
}

/// Base URL for session-affine surfaces: hash the identifier over the sticky
/// pool when one is configured, else fall back to the active server.
pub(crate) async fn sticky_base_url(
    state: &AppState,
    identifier: Option<&str>,
) -> Result<String, GatewayError> {
    if let Some(id) = identifier {
        if let Some(base) = selector::pick(&state.config.sticky_upstreams, id) {
            return Ok(base.to_string());
        }
    }
    Ok(active_upstream(state).await?.base_url().to_string())
}

/// Best-effort client address for sticky hashing, proxy headers first
pub(crate) fn client_ip(headers: &HeaderMap) -> Option<String> {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        let first = forwarded
            .split(',')
            .next()
            .map(str::trim)
            .filter(|s| !s.is_empty());
        if let Some(ip) = first {
            return Some(ip.to_string());
        }
    }
    headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

/// Origin the client reached us on. Every URL we mint uses this, so follow-up
/// requests land back here instead of on the upstream.
pub(crate) fn request_origin(fallback: &str, headers: &HeaderMap) -> String {
    let proto = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .unwrap_or("http");

    match headers
        .get("host")
        .and_then(|v| v.to_str().ok())
        .filter(|h| !h.is_empty())
    {
        Some(host) => format!("{}://{}", proto, host),
        None => fallback.trim_end_matches('/').to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn client_ip_prefers_the_first_forwarded_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.1"));
        assert_eq!(client_ip(&headers), Some("203.0.113.7".to_string()));

        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.2"));
        assert_eq!(client_ip(&headers), Some("198.51.100.2".to_string()));

        assert_eq!(client_ip(&HeaderMap::new()), None);
    }

    #[test]
    fn request_origin_reflects_the_inbound_host() {
        let mut headers = HeaderMap::new();
        headers.insert("host", HeaderValue::from_static("panel.example:8080"));
        assert_eq!(
            request_origin("http://fallback", &headers),
            "http://panel.example:8080"
        );

        headers.insert("x-forwarded-proto", HeaderValue::from_static("https"));
        assert_eq!(
            request_origin("http://fallback", &headers),
            "https://panel.example:8080"
        );

        assert_eq!(
            request_origin("http://fallback/", &HeaderMap::new()),
            "http://fallback"
        );
    }
}
