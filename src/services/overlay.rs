//! Catalog overlay engine
//!
//! Merges an upstream catalog page with the local catalog and the override
//! store. Works over the canonical entry wrappers, so the same rules serve
//! Xtream listings and Stalker ordered lists.
//!
//! Override rows are keyed by numeric stream id. An entry whose wire id is
//! not numeric-coercible simply never matches an override; that asymmetry is
//! deliberate and mirrors how the override store is written.

use std::collections::HashMap;

use url::Url;

use crate::db::models::{CategoryOverrideRow, ChannelOverrideRow};
use crate::models::catalog::{CatalogEntry, CategoryEntry, StreamKey};

/// Everything the merge needs besides the item lists
pub struct OverlayContext {
    channel_overrides: HashMap<i64, ChannelOverrideRow>,
    category_overrides: HashMap<String, CategoryOverrideRow>,
    pub upstream_origin: Option<String>,
    pub public_origin: String,
}

impl OverlayContext {
    pub fn new(
        channels: Vec<ChannelOverrideRow>,
        categories: Vec<CategoryOverrideRow>,
        upstream_origin: Option<String>,
        public_origin: String,
    ) -> Self {
        Self {
            channel_overrides: channels.into_iter().map(|c| (c.stream_id, c)).collect(),
            category_overrides: categories
                .into_iter()
                .map(|c| (c.category_id.clone(), c))
                .collect(),
            upstream_origin,
            public_origin,
        }
    }

    pub fn is_category_hidden(&self, category_id: &str) -> bool {
        self.category_overrides
            .get(category_id)
            .map_or(false, |c| c.is_hidden)
    }

    /// Custom display name for a category, when one is stored
    pub fn renamed_category_name(&self, category_id: &str) -> Option<&str> {
        self.category_overrides
            .get(category_id)
            .and_then(|c| c.category_name.as_deref())
            .filter(|n| !n.is_empty())
    }
}

/// Merge upstream entries with local entries under the override rules.
///
/// Per upstream entry: drop on hidden category, drop on hidden override,
/// apply custom name/logo, absolutize any leftover relative icon against the
/// upstream origin. Local entries are appended afterwards (no dedup; the
/// local catalog is assumed disjoint) and honor hidden categories only.
pub fn merge_entries(
    upstream: Vec<CatalogEntry>,
    local: Vec<CatalogEntry>,
    ctx: &OverlayContext,
) -> Vec<CatalogEntry> {
    let mut merged = Vec::with_capacity(upstream.len() + local.len());

    for mut entry in upstream {
        if let Some(cat) = entry.category_id.as_deref() {
            if ctx.is_category_hidden(cat) {
                continue;
            }
        }

        if let Some(id) = entry.key.as_ref().and_then(StreamKey::as_num) {
            if let Some(ov) = ctx.channel_overrides.get(&id) {
                if ov.is_hidden {
                    continue;
                }
                if let Some(name) = ov.custom_name.as_deref().filter(|n| !n.is_empty()) {
                    entry.set_name(name);
                }
                if let Some(logo) = ov.logo_url.as_deref().filter(|l| !l.is_empty()) {
                    // admin-supplied logos are paths on this system
                    entry.set_icon(&absolutize(logo, &ctx.public_origin));
                }
            }
        }

        if let Some(origin) = ctx.upstream_origin.as_deref() {
            let relative = entry
                .icon()
                .filter(|icon| is_relative(icon))
                .map(String::from);
            if let Some(icon) = relative {
                entry.set_icon(&absolutize(&icon, origin));
            }
        }

        merged.push(entry);
    }

    for entry in local {
        if let Some(cat) = entry.category_id.as_deref() {
            if ctx.is_category_hidden(cat) {
                continue;
            }
        }
        merged.push(entry);
    }

    merged
}

/// Category rename/hide pass; no logo or local-append step here
pub fn merge_categories(
    categories: Vec<CategoryEntry>,
    ctx: &OverlayContext,
) -> Vec<CategoryEntry> {
    categories
        .into_iter()
        .filter_map(|mut category| {
            let Some(id) = category.id.clone() else {
                return Some(category);
            };
            if let Some(ov) = ctx.category_overrides.get(&id) {
                if ov.is_hidden {
                    return None;
                }
                if let Some(name) = ov.category_name.as_deref().filter(|n| !n.is_empty()) {
                    category.set_name(name);
                }
            }
            Some(category)
        })
        .collect()
}

fn is_relative(url: &str) -> bool {
    !url.starts_with("http://") && !url.starts_with("https://") && !url.starts_with("data:")
}

/// Resolve a possibly relative URL against an origin
pub fn absolutize(url: &str, origin: &str) -> String {
    if !is_relative(url) {
        return url.to_string();
    }
    match Url::parse(origin).and_then(|base| base.join(url)) {
        Ok(joined) => joined.to_string(),
        Err(_) => format!(
            "{}/{}",
            origin.trim_end_matches('/'),
            url.trim_start_matches('/')
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::catalog::{XTREAM_CATEGORY_FIELDS, XTREAM_FIELDS};
    use chrono::Utc;
    use serde_json::{json, Value};

    fn channel_override(stream_id: i64, name: Option<&str>, hidden: bool) -> ChannelOverrideRow {
        ChannelOverrideRow {
            stream_id,
            custom_name: name.map(String::from),
            logo_url: None,
            is_hidden: hidden,
            updated_at: Utc::now(),
        }
    }

    fn category_override(id: &str, name: Option<&str>, hidden: bool) -> CategoryOverrideRow {
        CategoryOverrideRow {
            category_id: id.to_string(),
            category_name: name.map(String::from),
            is_hidden: hidden,
            updated_at: Utc::now(),
        }
    }

    fn entries(values: Vec<Value>) -> Vec<CatalogEntry> {
        values
            .into_iter()
            .filter_map(|v| CatalogEntry::from_value(v, XTREAM_FIELDS))
            .collect()
    }

    fn ctx(channels: Vec<ChannelOverrideRow>, categories: Vec<CategoryOverrideRow>) -> OverlayContext {
        OverlayContext::new(
            channels,
            categories,
            Some("http://up.example".to_string()),
            "https://panel.example".to_string(),
        )
    }

    #[test]
    fn hidden_override_and_hidden_category_empty_the_list() {
        let upstream = entries(vec![
            json!({"stream_id": 1, "name": "One", "category_id": "A"}),
            json!({"stream_id": 2, "name": "Two", "category_id": "B"}),
        ]);
        let ctx = ctx(
            vec![channel_override(1, None, true)],
            vec![category_override("B", None, true)],
        );

        let merged = merge_entries(upstream, Vec::new(), &ctx);
        assert!(merged.is_empty());
    }

    #[test]
    fn custom_name_replaces_upstream_name() {
        let upstream = entries(vec![json!({"stream_id": 5, "name": "Old", "category_id": "A"})]);
        let ctx = ctx(vec![channel_override(5, Some("New"), false)], Vec::new());

        let merged = merge_entries(upstream, Vec::new(), &ctx);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].name(), Some("New"));
    }

    #[test]
    fn local_items_surface_without_upstream() {
        let local = entries(vec![json!({
            "stream_id": 12345,
            "name": "Homegrown",
            "category_id": "local_movies"
        })]);
        let ctx = ctx(Vec::new(), Vec::new());

        let merged = merge_entries(Vec::new(), local, &ctx);
        assert_eq!(merged.len(), 1);
        let v = merged.into_iter().next().unwrap().into_value();
        assert_eq!(v["stream_id"], 12345);
    }

    #[test]
    fn hidden_categories_also_filter_local_items() {
        let local = entries(vec![json!({"stream_id": 9, "name": "L", "category_id": "X"})]);
        let ctx = ctx(Vec::new(), vec![category_override("X", None, true)]);

        assert!(merge_entries(Vec::new(), local, &ctx).is_empty());
    }

    #[test]
    fn relative_upstream_icons_absolutize_against_the_upstream() {
        let upstream = entries(vec![json!({
            "stream_id": 3,
            "name": "C",
            "stream_icon": "/logos/c.png"
        })]);
        let ctx = ctx(Vec::new(), Vec::new());

        let merged = merge_entries(upstream, Vec::new(), &ctx);
        assert_eq!(merged[0].icon(), Some("http://up.example/logos/c.png"));
    }

    #[test]
    fn override_logos_absolutize_against_our_origin() {
        let upstream = entries(vec![json!({"stream_id": 4, "name": "D"})]);
        let mut ov = channel_override(4, None, false);
        ov.logo_url = Some("/uploads/d.png".to_string());
        let ctx = ctx(vec![ov], Vec::new());

        let merged = merge_entries(upstream, Vec::new(), &ctx);
        assert_eq!(merged[0].icon(), Some("https://panel.example/uploads/d.png"));
    }

    #[test]
    fn textual_ids_never_match_numeric_overrides() {
        let upstream = entries(vec![json!({"stream_id": "vip-movie", "name": "Kept"})]);
        // override id 0 must not catch a textual key
        let ctx = ctx(vec![channel_override(0, None, true)], Vec::new());

        let merged = merge_entries(upstream, Vec::new(), &ctx);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].name(), Some("Kept"));
    }

    #[test]
    fn categories_rename_and_hide() {
        let cats: Vec<CategoryEntry> = vec![
            json!({"category_id": "1", "category_name": "Sports"}),
            json!({"category_id": "2", "category_name": "Adult"}),
        ]
        .into_iter()
        .filter_map(|v| CategoryEntry::from_value(v, XTREAM_CATEGORY_FIELDS))
        .collect();

        let ctx = ctx(
            Vec::new(),
            vec![
                category_override("1", Some("Live Sports"), false),
                category_override("2", None, true),
            ],
        );

        let merged = merge_categories(cats, &ctx);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].name(), Some("Live Sports"));
    }
}
