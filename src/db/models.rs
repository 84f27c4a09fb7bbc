//! Database row types for PostgreSQL
//!
//! These types map directly to database rows. Protocol-facing synthesis
//! (Xtream/Stalker shapes) lives next to the adapters in routes/.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::catalog::coerce_i64;

// ============================================================================
// Database Row Types
// ============================================================================

/// Upstream provider row
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct UpstreamRow {
    pub id: i32,
    pub name: String,
    pub server_url: String,
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub is_active: bool,
    pub timeout_seconds: i32,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UpstreamRow {
    /// Base URL without a trailing slash
    pub fn base_url(&self) -> &str {
        self.server_url.trim_end_matches('/')
    }

    pub fn has_credentials(&self) -> bool {
        self.username.as_deref().map_or(false, |u| !u.is_empty())
            && self.password.as_deref().map_or(false, |p| !p.is_empty())
    }
}

/// Per-channel overlay row; absence of a row means "use the upstream value"
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ChannelOverrideRow {
    pub stream_id: i64,
    pub custom_name: Option<String>,
    pub logo_url: Option<String>,
    pub is_hidden: bool,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct CategoryOverrideRow {
    pub category_id: String,
    pub category_name: Option<String>,
    pub is_hidden: bool,
    pub updated_at: DateTime<Utc>,
}

/// Self-hosted movie or series container
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct LocalContentRow {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub content_type: String,
    pub poster_url: Option<String>,
    pub stream_url: Option<String>,
    pub subtitle_url: Option<String>,
    pub category_id: Option<String>,
    pub category_name: Option<String>,
    pub stream_id: Option<String>,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LocalContentRow {
    /// Client-facing numeric id for Xtream surfaces.
    ///
    /// The stored custom `stream_id` wins when it parses as a number. When no
    /// custom id was stored, the first 8 hex digits of the primary key give a
    /// stable fallback. A stored id that is NOT numeric collapses to 0 here;
    /// all such items collide on numeric-only surfaces.
    pub fn client_stream_id(&self) -> i64 {
        match self.stream_id.as_deref() {
            Some(s) => s.trim().parse::<i64>().unwrap_or(0),
            None => {
                let hex: String = self.id.simple().to_string().chars().take(8).collect();
                i64::from(u32::from_str_radix(&hex, 16).unwrap_or(0))
            }
        }
    }

    /// String id used for lookup matching (custom id, else the primary key)
    pub fn lookup_key(&self) -> String {
        self.stream_id
            .clone()
            .unwrap_or_else(|| self.id.to_string())
    }
}

/// Episode belonging to a series `LocalContentRow`
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct LocalEpisodeRow {
    pub id: Uuid,
    pub series_id: Uuid,
    pub season_num: i32,
    pub episode_num: i32,
    pub title: Option<String>,
    pub stream_url: String,
    pub stream_id: Option<String>,
    pub container_extension: String,
    pub duration: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LocalEpisodeRow {
    pub fn client_stream_id(&self) -> i64 {
        match self.stream_id.as_deref() {
            Some(s) => s.trim().parse::<i64>().unwrap_or(0),
            None => {
                let hex: String = self.id.simple().to_string().chars().take(8).collect();
                i64::from(u32::from_str_radix(&hex, 16).unwrap_or(0))
            }
        }
    }
}

/// Per-provider sync status (joined view for the ops surface)
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct SyncStatusRow {
    pub id: i32,
    pub name: String,
    pub is_active: bool,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub synced_items: i64,
}

// ============================================================================
// Insert/Write Types
// ============================================================================

/// New upstream server to register
#[derive(Debug, Clone, Deserialize)]
pub struct NewUpstream {
    pub name: String,
    pub server_url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub timeout_seconds: Option<i32>,
}

/// New local movie/series container
#[derive(Debug, Clone, Deserialize)]
pub struct NewLocalContent {
    pub title: String,
    pub description: Option<String>,
    pub content_type: String,
    pub poster_url: Option<String>,
    pub stream_url: Option<String>,
    pub subtitle_url: Option<String>,
    pub category_id: Option<String>,
    pub category_name: Option<String>,
    pub stream_id: Option<String>,
    pub metadata: Option<Value>,
}

/// New episode for a local series
#[derive(Debug, Clone, Deserialize)]
pub struct NewLocalEpisode {
    pub season_num: Option<i32>,
    pub episode_num: Option<i32>,
    pub title: Option<String>,
    pub stream_url: String,
    pub stream_id: Option<String>,
    pub container_extension: Option<String>,
    pub duration: Option<String>,
}

/// One mirror row for the sync job's batched upsert
#[derive(Debug, Clone)]
pub struct SyncRecord {
    pub stream_id: i64,
    pub name: String,
    pub stream_icon: Option<String>,
    pub stream_url: Option<String>,
    pub metadata: Value,
}

impl SyncRecord {
    /// Extract a mirror record from a raw upstream catalog item.
    ///
    /// Returns `None` when the item has no numeric id (`stream_id` for VOD,
    /// `series_id` for series); such items cannot be keyed in the mirror.
    pub fn from_catalog_item(item: &Value, stream_type: &str) -> Option<Self> {
        let id_field = if stream_type == "series" {
            "series_id"
        } else {
            "stream_id"
        };
        let stream_id = coerce_i64(item.get(id_field)?)?;

        let name = item
            .get("name")
            .or_else(|| item.get("title"))
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();

        let stream_icon = item
            .get("stream_icon")
            .or_else(|| item.get("cover"))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(String::from);

        Some(SyncRecord {
            stream_id,
            name,
            stream_icon,
            stream_url: None,
            metadata: item.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sync_record_accepts_numeric_and_string_ids() {
        let a = SyncRecord::from_catalog_item(&json!({"stream_id": 42, "name": "A"}), "vod");
        assert_eq!(a.unwrap().stream_id, 42);

        let b = SyncRecord::from_catalog_item(&json!({"stream_id": "99", "name": "B"}), "vod");
        assert_eq!(b.unwrap().stream_id, 99);

        let c = SyncRecord::from_catalog_item(&json!({"series_id": 7, "name": "C"}), "series");
        assert_eq!(c.unwrap().stream_id, 7);
    }

    #[test]
    fn sync_record_skips_items_without_numeric_id() {
        assert!(SyncRecord::from_catalog_item(&json!({"name": "no id"}), "vod").is_none());
        assert!(
            SyncRecord::from_catalog_item(&json!({"stream_id": "abc", "name": "bad"}), "vod")
                .is_none()
        );
    }

    #[test]
    fn local_content_stream_id_fallbacks() {
        let mut row = LocalContentRow {
            id: Uuid::parse_str("000000ff-0000-0000-0000-000000000000").unwrap(),
            title: "T".into(),
            description: None,
            content_type: "movie".into(),
            poster_url: None,
            stream_url: None,
            subtitle_url: None,
            category_id: None,
            category_name: None,
            stream_id: Some("12345".into()),
            metadata: json!({}),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert_eq!(row.client_stream_id(), 12345);

        // non-numeric custom ids collapse to 0
        row.stream_id = Some("feature-film".into());
        assert_eq!(row.client_stream_id(), 0);

        // unset ids derive from the primary key, deterministically
        row.stream_id = None;
        assert_eq!(row.client_stream_id(), 0xff);
        assert_eq!(row.client_stream_id(), 0xff);
    }
}
