//! Upstream server registry

use sqlx::PgPool;

use crate::db::models::{NewUpstream, UpstreamRow};

const COLUMNS: &str = "id, name, server_url, username, password, is_active, \
                       timeout_seconds, last_sync_at, created_at, updated_at";

/// List every registered upstream server
pub async fn list(pool: &PgPool) -> Result<Vec<UpstreamRow>, sqlx::Error> {
    sqlx::query_as::<_, UpstreamRow>(&format!(
        "SELECT {} FROM upstream_servers ORDER BY id",
        COLUMNS
    ))
    .fetch_all(pool)
    .await
}

/// Resolve the admin-designated active server, newest designation first
pub async fn find_active(pool: &PgPool) -> Result<Option<UpstreamRow>, sqlx::Error> {
    sqlx::query_as::<_, UpstreamRow>(&format!(
        "SELECT {} FROM upstream_servers WHERE is_active ORDER BY updated_at DESC LIMIT 1",
        COLUMNS
    ))
    .fetch_optional(pool)
    .await
}

pub async fn find_by_id(pool: &PgPool, id: i32) -> Result<Option<UpstreamRow>, sqlx::Error> {
    sqlx::query_as::<_, UpstreamRow>(&format!(
        "SELECT {} FROM upstream_servers WHERE id = $1",
        COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await
}

/// Register a new upstream server
pub async fn create(pool: &PgPool, upstream: &NewUpstream) -> Result<UpstreamRow, sqlx::Error> {
    sqlx::query_as::<_, UpstreamRow>(&format!(
        r#"
        INSERT INTO upstream_servers (name, server_url, username, password, timeout_seconds)
        VALUES ($1, $2, $3, $4, COALESCE($5, 30))
        RETURNING {}
        "#,
        COLUMNS
    ))
    .bind(&upstream.name)
    .bind(upstream.server_url.trim_end_matches('/'))
    .bind(&upstream.username)
    .bind(&upstream.password)
    .bind(upstream.timeout_seconds)
    .fetch_one(pool)
    .await
}

/// Designate one server as active; every other row is deactivated
pub async fn set_active(pool: &PgPool, id: i32) -> Result<bool, sqlx::Error> {
    let mut tx = pool.begin().await?;

    sqlx::query("UPDATE upstream_servers SET is_active = false WHERE is_active")
        .execute(&mut *tx)
        .await?;

    let updated = sqlx::query(
        "UPDATE upstream_servers SET is_active = true, updated_at = NOW() WHERE id = $1",
    )
    .bind(id)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    tx.commit().await?;
    Ok(updated > 0)
}

/// Delete a server; mirror rows cascade
pub async fn delete(pool: &PgPool, id: i32) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM upstream_servers WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}

/// Servers the sync job should refresh: one by id, or every active one
pub async fn sync_targets(
    pool: &PgPool,
    server_id: Option<i32>,
) -> Result<Vec<UpstreamRow>, sqlx::Error> {
    match server_id {
        Some(id) => {
            let row = find_by_id(pool, id).await?;
            Ok(row.into_iter().collect())
        }
        None => {
            sqlx::query_as::<_, UpstreamRow>(&format!(
                "SELECT {} FROM upstream_servers WHERE is_active ORDER BY id",
                COLUMNS
            ))
            .fetch_all(pool)
            .await
        }
    }
}

/// Stamp a successful catalog sync
pub async fn touch_last_sync(pool: &PgPool, id: i32) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE upstream_servers SET last_sync_at = NOW(), updated_at = NOW() WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(())
}
