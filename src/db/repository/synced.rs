//! Upstream catalog mirror written by the sync job

use serde_json::Value;
use sqlx::PgPool;

use crate::db::models::{SyncRecord, SyncStatusRow};

/// Upsert one batch of mirror rows for a provider.
///
/// A single multi-row statement keyed on (upstream_server_id, stream_id),
/// last write wins on name/icon/metadata. Returns the number of rows touched.
pub async fn upsert_batch(
    pool: &PgPool,
    server_id: i32,
    stream_type: &str,
    records: &[SyncRecord],
) -> Result<u64, sqlx::Error> {
    if records.is_empty() {
        return Ok(0);
    }

    let ids: Vec<i64> = records.iter().map(|r| r.stream_id).collect();
    let names: Vec<String> = records.iter().map(|r| r.name.clone()).collect();
    let icons: Vec<Option<String>> = records.iter().map(|r| r.stream_icon.clone()).collect();
    let urls: Vec<Option<String>> = records.iter().map(|r| r.stream_url.clone()).collect();
    let metadata: Vec<Value> = records.iter().map(|r| r.metadata.clone()).collect();

    let result = sqlx::query(
        r#"
        INSERT INTO synced_content
            (upstream_server_id, stream_id, name, stream_type, stream_icon, stream_url, metadata, synced_at)
        SELECT $1, t.stream_id, t.name, $2, t.stream_icon, t.stream_url, t.metadata, NOW()
        FROM UNNEST($3::bigint[], $4::text[], $5::text[], $6::text[], $7::jsonb[])
            AS t(stream_id, name, stream_icon, stream_url, metadata)
        ON CONFLICT (upstream_server_id, stream_id) DO UPDATE SET
            name = EXCLUDED.name,
            stream_type = EXCLUDED.stream_type,
            stream_icon = EXCLUDED.stream_icon,
            stream_url = EXCLUDED.stream_url,
            metadata = EXCLUDED.metadata,
            synced_at = NOW()
        "#,
    )
    .bind(server_id)
    .bind(stream_type)
    .bind(&ids)
    .bind(&names)
    .bind(&icons)
    .bind(&urls)
    .bind(&metadata)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Per-provider mirror status for the ops surface
pub async fn status(pool: &PgPool) -> Result<Vec<SyncStatusRow>, sqlx::Error> {
    sqlx::query_as::<_, SyncStatusRow>(
        r#"
        SELECT u.id, u.name, u.is_active, u.last_sync_at, COUNT(s.id) AS synced_items
        FROM upstream_servers u
        LEFT JOIN synced_content s ON s.upstream_server_id = u.id
        GROUP BY u.id, u.name, u.is_active, u.last_sync_at
        ORDER BY u.id
        "#,
    )
    .fetch_all(pool)
    .await
}
