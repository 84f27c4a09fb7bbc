//! Channel and category override store
//!
//! Overrides are sparse: a missing row means "serve the upstream value as
//! is". Partial upserts preserve fields the caller did not send (COALESCE),
//! so renaming a channel does not clear its custom logo.

use sqlx::PgPool;

use crate::db::models::{CategoryOverrideRow, ChannelOverrideRow};

/// All channel overrides (the overlay engine builds its map from this)
pub async fn list_channel_overrides(
    pool: &PgPool,
) -> Result<Vec<ChannelOverrideRow>, sqlx::Error> {
    sqlx::query_as::<_, ChannelOverrideRow>(
        "SELECT stream_id, custom_name, logo_url, is_hidden, updated_at FROM channel_overrides",
    )
    .fetch_all(pool)
    .await
}

/// Upsert name/logo for a channel, preserving unspecified fields
pub async fn upsert_channel_override(
    pool: &PgPool,
    stream_id: i64,
    custom_name: Option<&str>,
    logo_url: Option<&str>,
) -> Result<ChannelOverrideRow, sqlx::Error> {
    sqlx::query_as::<_, ChannelOverrideRow>(
        r#"
        INSERT INTO channel_overrides (stream_id, custom_name, logo_url)
        VALUES ($1, $2, $3)
        ON CONFLICT (stream_id) DO UPDATE SET
            custom_name = COALESCE(EXCLUDED.custom_name, channel_overrides.custom_name),
            logo_url = COALESCE(EXCLUDED.logo_url, channel_overrides.logo_url),
            updated_at = NOW()
        RETURNING stream_id, custom_name, logo_url, is_hidden, updated_at
        "#,
    )
    .bind(stream_id)
    .bind(custom_name)
    .bind(logo_url)
    .fetch_one(pool)
    .await
}

/// Hide or unhide a channel
pub async fn set_channel_hidden(
    pool: &PgPool,
    stream_id: i64,
    is_hidden: bool,
) -> Result<ChannelOverrideRow, sqlx::Error> {
    sqlx::query_as::<_, ChannelOverrideRow>(
        r#"
        INSERT INTO channel_overrides (stream_id, is_hidden)
        VALUES ($1, $2)
        ON CONFLICT (stream_id) DO UPDATE SET
            is_hidden = EXCLUDED.is_hidden,
            updated_at = NOW()
        RETURNING stream_id, custom_name, logo_url, is_hidden, updated_at
        "#,
    )
    .bind(stream_id)
    .bind(is_hidden)
    .fetch_one(pool)
    .await
}

/// All category overrides
pub async fn list_category_overrides(
    pool: &PgPool,
) -> Result<Vec<CategoryOverrideRow>, sqlx::Error> {
    sqlx::query_as::<_, CategoryOverrideRow>(
        "SELECT category_id, category_name, is_hidden, updated_at FROM category_overrides",
    )
    .fetch_all(pool)
    .await
}

/// Rename a category, preserving its hidden flag
pub async fn upsert_category_override(
    pool: &PgPool,
    category_id: &str,
    category_name: Option<&str>,
) -> Result<CategoryOverrideRow, sqlx::Error> {
    sqlx::query_as::<_, CategoryOverrideRow>(
        r#"
        INSERT INTO category_overrides (category_id, category_name)
        VALUES ($1, $2)
        ON CONFLICT (category_id) DO UPDATE SET
            category_name = COALESCE(EXCLUDED.category_name, category_overrides.category_name),
            updated_at = NOW()
        RETURNING category_id, category_name, is_hidden, updated_at
        "#,
    )
    .bind(category_id)
    .bind(category_name)
    .fetch_one(pool)
    .await
}

/// Hide or unhide a category, keeping any known display name
pub async fn set_category_hidden(
    pool: &PgPool,
    category_id: &str,
    category_name: Option<&str>,
    is_hidden: bool,
) -> Result<CategoryOverrideRow, sqlx::Error> {
    sqlx::query_as::<_, CategoryOverrideRow>(
        r#"
        INSERT INTO category_overrides (category_id, category_name, is_hidden)
        VALUES ($1, $2, $3)
        ON CONFLICT (category_id) DO UPDATE SET
            is_hidden = EXCLUDED.is_hidden,
            category_name = COALESCE(EXCLUDED.category_name, category_overrides.category_name),
            updated_at = NOW()
        RETURNING category_id, category_name, is_hidden, updated_at
        "#,
    )
    .bind(category_id)
    .bind(category_name)
    .bind(is_hidden)
    .fetch_one(pool)
    .await
}
