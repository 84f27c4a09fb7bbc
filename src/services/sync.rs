//! Upstream catalog sync job
//!
//! Mirrors the VOD and series listings of each active provider into
//! `synced_content` with batched upserts. One provider failing never blocks
//! the others, and re-running against an unchanged upstream rewrites the same
//! rows instead of growing the table.

use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use sqlx::PgPool;
use tokio::time;

use crate::config::Config;
use crate::db::models::{SyncRecord, UpstreamRow};
use crate::db::repository::{synced, upstreams};
use crate::error::GatewayError;
use crate::services::fetch::FetchClient;

/// The catalog actions we mirror, with the stream_type each maps to
const CATALOG_ACTIONS: [(&str, &str); 2] = [
    ("get_vod_streams", "vod"),
    ("get_series", "series"),
];

/// Result of one sync run, returned to the admin trigger as JSON
#[derive(Debug, Default, Serialize)]
pub struct SyncReport {
    pub providers_synced: usize,
    pub providers_skipped: usize,
    pub rows_touched: u64,
    pub errors: Vec<String>,
}

impl SyncReport {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Run one sync cycle.
///
/// `server_id` narrows the run to a single provider; `None` syncs every
/// active one. Providers without API credentials are counted as skipped.
pub async fn run_sync(
    pool: &PgPool,
    fetch: &FetchClient,
    config: &Config,
    server_id: Option<i32>,
) -> Result<SyncReport, GatewayError> {
    let targets = upstreams::sync_targets(pool, server_id).await?;
    if targets.is_empty() {
        if server_id.is_some() {
            return Err(GatewayError::Validation(
                "no active upstream server with that id".to_string(),
            ));
        }
        tracing::info!("Sync: no active upstream servers, nothing to do");
        return Ok(SyncReport::default());
    }

    let mut report = SyncReport::default();

    for server in targets {
        if !server.has_credentials() {
            tracing::warn!("Sync: skipping '{}', it has no API credentials", server.name);
            report.providers_skipped += 1;
            continue;
        }

        match sync_provider(pool, fetch, config, &server).await {
            Ok(rows) => {
                report.providers_synced += 1;
                report.rows_touched += rows;
                if let Err(e) = upstreams::touch_last_sync(pool, server.id).await {
                    tracing::warn!(
                        "Sync: could not record sync time for '{}': {}",
                        server.name,
                        e
                    );
                }
                tracing::info!("Sync: '{}' complete, {} rows touched", server.name, rows);
            }
            Err(e) => {
                tracing::error!("Sync: '{}' failed: {}", server.name, e);
                report.errors.push(format!("{}: {}", server.name, e));
            }
        }
    }

    Ok(report)
}

/// Mirror one provider's catalogs. Fails only when every catalog action
/// fails; a single unsupported action (some panels have no series API)
/// degrades to a warning.
async fn sync_provider(
    pool: &PgPool,
    fetch: &FetchClient,
    config: &Config,
    server: &UpstreamRow,
) -> Result<u64, GatewayError> {
    let url = format!("{}/player_api.php", server.base_url());
    let username = server.username.as_deref().unwrap_or("");
    let password = server.password.as_deref().unwrap_or("");
    let timeout = Duration::from_secs(config.document_timeout_secs);

    let mut total_rows = 0u64;
    let mut succeeded = 0usize;
    let mut last_error = String::new();

    for (action, stream_type) in CATALOG_ACTIONS {
        let params = [
            ("username", username),
            ("password", password),
            ("action", action),
        ];

        let payload = match fetch.get_json(&url, &params, Some(timeout)).await {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("Sync: '{}' {} failed: {}", server.name, action, e);
                last_error = format!("{}: {}", action, e);
                continue;
            }
        };

        let records = extract_records(&payload, stream_type);
        tracing::debug!(
            "Sync: '{}' {} returned {} usable items",
            server.name,
            action,
            records.len()
        );

        for chunk in records.chunks(config.sync_batch_size) {
            total_rows += synced::upsert_batch(pool, server.id, stream_type, chunk)
                .await
                .map_err(GatewayError::LocalStore)?;
        }
        succeeded += 1;
    }

    if succeeded == 0 {
        return Err(GatewayError::UpstreamUnreachable(last_error));
    }
    Ok(total_rows)
}

/// Pull the mirror rows out of a catalog payload, dropping items without a
/// usable numeric id
fn extract_records(payload: &Value, stream_type: &str) -> Vec<SyncRecord> {
    match payload {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| SyncRecord::from_catalog_item(item, stream_type))
            .collect(),
        _ => Vec::new(),
    }
}

/// Background sync loop, spawned from startup when an interval is configured.
/// Runs once immediately, then on the interval.
pub async fn start_sync_task(pool: PgPool, fetch: FetchClient, config: Config) {
    tracing::info!(
        "Starting catalog sync task (interval: {}s)",
        config.sync_interval_secs
    );

    let mut interval = time::interval(Duration::from_secs(config.sync_interval_secs));

    loop {
        interval.tick().await;

        match run_sync(&pool, &fetch, &config, None).await {
            Ok(report) => {
                if !report.is_success() {
                    for error in &report.errors {
                        tracing::warn!("Sync error: {}", error);
                    }
                }
            }
            Err(e) => tracing::error!("Sync cycle failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extract_records_reads_arrays_and_skips_junk() {
        let payload = json!([
            {"stream_id": 1, "name": "A", "stream_icon": "http://x/a.png"},
            {"stream_id": "2", "name": "B"},
            {"name": "no id"},
            "not an object"
        ]);

        let records = extract_records(&payload, "vod");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].stream_id, 1);
        assert_eq!(records[1].stream_id, 2);
    }

    #[test]
    fn extract_records_tolerates_non_array_payloads() {
        assert!(extract_records(&json!({"user_info": {"auth": 0}}), "vod").is_empty());
        assert!(extract_records(&json!(null), "vod").is_empty());
    }

    #[test]
    fn series_records_key_on_series_id() {
        let payload = json!([{"series_id": 77, "name": "Show", "cover": "c.jpg"}]);
        let records = extract_records(&payload, "series");
        assert_eq!(records[0].stream_id, 77);
        assert_eq!(records[0].stream_icon.as_deref(), Some("c.jpg"));
    }

    #[test]
    fn batch_chunking_covers_every_record() {
        let records: Vec<SyncRecord> = (0..2500)
            .map(|i| SyncRecord {
                stream_id: i,
                name: format!("ch {}", i),
                stream_icon: None,
                stream_url: None,
                metadata: json!({}),
            })
            .collect();

        let chunks: Vec<_> = records.chunks(1000).collect();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks.iter().map(|c| c.len()).sum::<usize>(), 2500);
        assert_eq!(chunks[2].len(), 500);
    }
}
