//! Local catalog: self-hosted movies, series containers, and episodes

use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::db::models::{LocalContentRow, LocalEpisodeRow, NewLocalContent, NewLocalEpisode};
use crate::error::GatewayError;

const CONTENT_COLUMNS: &str = "id, title, description, content_type, poster_url, stream_url, \
                               subtitle_url, category_id, category_name, stream_id, metadata, \
                               created_at, updated_at";

const EPISODE_COLUMNS: &str = "id, series_id, season_num, episode_num, title, stream_url, \
                               stream_id, container_extension, duration, created_at, updated_at";

/// List local items of one content type, newest first
pub async fn list_by_type(
    pool: &PgPool,
    content_type: &str,
) -> Result<Vec<LocalContentRow>, sqlx::Error> {
    sqlx::query_as::<_, LocalContentRow>(&format!(
        "SELECT {} FROM local_content WHERE content_type = $1 ORDER BY created_at DESC",
        CONTENT_COLUMNS
    ))
    .bind(content_type)
    .fetch_all(pool)
    .await
}

/// Find by the client-facing stream id, falling back to the primary key
pub async fn find_by_stream_key(
    pool: &PgPool,
    key: &str,
) -> Result<Option<LocalContentRow>, sqlx::Error> {
    sqlx::query_as::<_, LocalContentRow>(&format!(
        "SELECT {} FROM local_content WHERE stream_id = $1 OR id::text = $1",
        CONTENT_COLUMNS
    ))
    .bind(key)
    .fetch_optional(pool)
    .await
}

pub async fn find_episode_by_stream_key(
    pool: &PgPool,
    key: &str,
) -> Result<Option<LocalEpisodeRow>, sqlx::Error> {
    sqlx::query_as::<_, LocalEpisodeRow>(&format!(
        "SELECT {} FROM local_episodes WHERE stream_id = $1 OR id::text = $1",
        EPISODE_COLUMNS
    ))
    .bind(key)
    .fetch_optional(pool)
    .await
}

pub async fn episodes_for_series(
    pool: &PgPool,
    series_id: Uuid,
) -> Result<Vec<LocalEpisodeRow>, sqlx::Error> {
    sqlx::query_as::<_, LocalEpisodeRow>(&format!(
        "SELECT {} FROM local_episodes WHERE series_id = $1 ORDER BY season_num, episode_num",
        EPISODE_COLUMNS
    ))
    .bind(series_id)
    .fetch_all(pool)
    .await
}

/// Distinct (category_id, display name) pairs for one content type
pub async fn distinct_categories(
    pool: &PgPool,
    content_type: &str,
) -> Result<Vec<(String, String)>, sqlx::Error> {
    sqlx::query_as::<_, (String, String)>(
        r#"
        SELECT DISTINCT category_id, COALESCE(category_name, category_id)
        FROM local_content
        WHERE content_type = $1 AND category_id IS NOT NULL
        ORDER BY 2
        "#,
    )
    .bind(content_type)
    .fetch_all(pool)
    .await
}

/// Series container lookup for find-or-create episode ingestion
pub async fn find_series_by_title(
    pool: &PgPool,
    title: &str,
) -> Result<Option<LocalContentRow>, sqlx::Error> {
    sqlx::query_as::<_, LocalContentRow>(&format!(
        "SELECT {} FROM local_content WHERE content_type = 'series' AND title = $1",
        CONTENT_COLUMNS
    ))
    .bind(title)
    .fetch_optional(pool)
    .await
}

/// Delete a local item; episodes cascade with their series container
pub async fn delete_content(pool: &PgPool, id: Uuid) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM local_content WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

/// Insert a movie or series container.
///
/// `stream_id` must be unique across BOTH local_content and local_episodes;
/// a collision fails the write. When no stream_id is supplied, an 8-digit
/// numeric one is derived from a fresh UUID.
pub async fn insert_content(
    pool: &PgPool,
    content: &NewLocalContent,
) -> Result<LocalContentRow, GatewayError> {
    if content.content_type != "movie" && content.content_type != "series" {
        return Err(GatewayError::Validation(format!(
            "content_type must be 'movie' or 'series', got '{}'",
            content.content_type
        )));
    }

    let stream_id = match normalized_stream_id(content.stream_id.as_deref()) {
        Some(id) => id,
        None => random_stream_id(),
    };

    let mut tx = pool.begin().await?;
    ensure_stream_id_free(&mut tx, &stream_id).await?;

    let row = sqlx::query_as::<_, LocalContentRow>(&format!(
        r#"
        INSERT INTO local_content
            (title, description, content_type, poster_url, stream_url, subtitle_url,
             category_id, category_name, stream_id, metadata)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, COALESCE($10, '{{}}'::jsonb))
        RETURNING {}
        "#,
        CONTENT_COLUMNS
    ))
    .bind(&content.title)
    .bind(&content.description)
    .bind(&content.content_type)
    .bind(&content.poster_url)
    .bind(&content.stream_url)
    .bind(&content.subtitle_url)
    .bind(&content.category_id)
    .bind(&content.category_name)
    .bind(&stream_id)
    .bind(&content.metadata)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(row)
}

/// Insert or update an episode of a local series.
///
/// (series, season, episode) are upserted in place; stream_id uniqueness is
/// checked across both local tables before a fresh insert.
pub async fn insert_episode(
    pool: &PgPool,
    series_id: Uuid,
    episode: &NewLocalEpisode,
) -> Result<LocalEpisodeRow, GatewayError> {
    let season = episode.season_num.unwrap_or(1);
    let number = episode.episode_num.unwrap_or(1);

    let mut tx = pool.begin().await?;

    let existing: Option<(Uuid,)> = sqlx::query_as(
        "SELECT id FROM local_episodes WHERE series_id = $1 AND season_num = $2 AND episode_num = $3",
    )
    .bind(series_id)
    .bind(season)
    .bind(number)
    .fetch_optional(&mut *tx)
    .await?;

    let stream_id = match normalized_stream_id(episode.stream_id.as_deref()) {
        Some(id) => Some(id),
        None if existing.is_none() => Some(random_stream_id()),
        None => None,
    };
    if existing.is_none() {
        if let Some(id) = stream_id.as_deref() {
            ensure_stream_id_free(&mut tx, id).await?;
        }
    }

    let row = sqlx::query_as::<_, LocalEpisodeRow>(&format!(
        r#"
        INSERT INTO local_episodes
            (series_id, season_num, episode_num, title, stream_url, stream_id,
             container_extension, duration)
        VALUES ($1, $2, $3, $4, $5, $6, COALESCE($7, 'mp4'), COALESCE($8, '00:00:00'))
        ON CONFLICT (series_id, season_num, episode_num) DO UPDATE SET
            title = COALESCE(EXCLUDED.title, local_episodes.title),
            stream_url = EXCLUDED.stream_url,
            container_extension = EXCLUDED.container_extension,
            duration = EXCLUDED.duration,
            updated_at = NOW()
        RETURNING {}
        "#,
        EPISODE_COLUMNS
    ))
    .bind(series_id)
    .bind(season)
    .bind(number)
    .bind(&episode.title)
    .bind(&episode.stream_url)
    .bind(&stream_id)
    .bind(&episode.container_extension)
    .bind(&episode.duration)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(row)
}

async fn ensure_stream_id_free(
    tx: &mut Transaction<'_, Postgres>,
    stream_id: &str,
) -> Result<(), GatewayError> {
    let (in_use,): (bool,) = sqlx::query_as(
        r#"
        SELECT EXISTS (SELECT 1 FROM local_content WHERE stream_id = $1)
            OR EXISTS (SELECT 1 FROM local_episodes WHERE stream_id = $1)
        "#,
    )
    .bind(stream_id)
    .fetch_one(&mut **tx)
    .await?;

    if in_use {
        return Err(GatewayError::Validation(format!(
            "stream_id '{}' is already in use",
            stream_id
        )));
    }
    Ok(())
}

fn normalized_stream_id(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

/// 8-digit numeric id in [100000, 99999999], derived from a fresh UUID
fn random_stream_id() -> String {
    let bytes = *Uuid::new_v4().as_bytes();
    let n = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    format!("{}", 100_000 + (n % 99_900_000))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_stream_id_stays_in_range() {
        for _ in 0..64 {
            let id: u32 = random_stream_id().parse().unwrap();
            assert!((100_000..100_000_000).contains(&id));
        }
    }

    #[test]
    fn normalized_stream_id_drops_blank_input() {
        assert_eq!(normalized_stream_id(None), None);
        assert_eq!(normalized_stream_id(Some("  ")), None);
        assert_eq!(normalized_stream_id(Some(" 77 ")), Some("77".to_string()));
    }
}
