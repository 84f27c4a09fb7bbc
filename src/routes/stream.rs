//! Direct stream entry points: /live, /movie, /series, /timeshift
//!
//! These never proxy media. The player gets a 307 to the active upstream's
//! equivalent URL with its own credentials, except for movie/series ids that
//! match a local row, which redirect straight to the stored stream URL.

use std::sync::Arc;

use axum::extract::{Path, RawQuery, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use serde_json::json;

use crate::db::repository::local_content;
use crate::error::GatewayError;
use crate::routes::{active_upstream, request_origin};
use crate::services::overlay;
use crate::AppState;

pub async fn live(
    State(state): State<Arc<AppState>>,
    Path((username, password, id)): Path<(String, String, String)>,
) -> Result<Response, GatewayError> {
    let upstream = active_upstream(&state).await?;
    let target = format!("{}/live/{}/{}/{}", upstream.base_url(), username, password, id);
    Ok(Redirect::temporary(&target).into_response())
}

pub async fn movie(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((username, password, id)): Path<(String, String, String)>,
) -> Result<Response, GatewayError> {
    let key = strip_extension(&id);
    if let Some(row) = local_content::find_by_stream_key(&state.pool, key).await? {
        if row.content_type == "movie" {
            return local_redirect(&state, &headers, row.stream_url.as_deref());
        }
    }

    let upstream = active_upstream(&state).await?;
    let target = format!("{}/movie/{}/{}/{}", upstream.base_url(), username, password, id);
    Ok(Redirect::temporary(&target).into_response())
}

pub async fn series(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((username, password, id)): Path<(String, String, String)>,
) -> Result<Response, GatewayError> {
    let key = strip_extension(&id);
    if let Some(episode) = local_content::find_episode_by_stream_key(&state.pool, key).await? {
        return local_redirect(&state, &headers, Some(&episode.stream_url));
    }

    let upstream = active_upstream(&state).await?;
    let target = format!("{}/series/{}/{}/{}", upstream.base_url(), username, password, id);
    Ok(Redirect::temporary(&target).into_response())
}

pub async fn timeshift(
    State(state): State<Arc<AppState>>,
    Path(rest): Path<String>,
    RawQuery(raw_query): RawQuery,
) -> Result<Response, GatewayError> {
    let upstream = active_upstream(&state).await?;
    let mut target = format!(
        "{}/timeshift/{}",
        upstream.base_url(),
        rest.trim_start_matches('/')
    );
    if let Some(q) = raw_query.filter(|q| !q.is_empty()) {
        target.push('?');
        target.push_str(&q);
    }
    Ok(Redirect::temporary(&target).into_response())
}

fn local_redirect(
    state: &AppState,
    headers: &HeaderMap,
    stream_url: Option<&str>,
) -> Result<Response, GatewayError> {
    let Some(url) = stream_url.filter(|u| !u.is_empty()) else {
        return Ok((
            StatusCode::NOT_FOUND,
            axum::Json(json!({"error": "local item has no stream url"})),
        )
            .into_response());
    };
    let origin = request_origin(&state.config.public_base_url, headers);
    Ok(Redirect::temporary(&overlay::absolutize(url, &origin)).into_response())
}

/// `123.mp4` -> `123`; ids without a short media extension stay whole
fn strip_extension(id: &str) -> &str {
    match id.rsplit_once('.') {
        Some((stem, ext))
            if !stem.is_empty()
                && (1..=4).contains(&ext.len())
                && ext.chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            stem
        }
        _ => id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extensions_are_stripped_for_lookup_only() {
        assert_eq!(strip_extension("123.mp4"), "123");
        assert_eq!(strip_extension("123.ts"), "123");
        assert_eq!(strip_extension("123"), "123");
        assert_eq!(strip_extension("movie.backup.mkv"), "movie.backup");
        assert_eq!(strip_extension(".hidden"), ".hidden");
        assert_eq!(strip_extension("a.verylongext"), "a.verylongext");
    }
}
