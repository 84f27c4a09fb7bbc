//! Canonical catalog shapes shared by both protocol adapters
//!
//! Upstream payloads stay loosely typed JSON. The overlay engine works over
//! these tagged wrappers; each adapter maps its own field convention in and
//! out (Xtream: `stream_id`/`name`/`stream_icon`/`category_id`, Stalker:
//! `id`/`name`/`logo`/`tv_genre_id`), so the merge logic never branches on
//! protocol.

use serde_json::{Map, Value};

/// Field-name convention for one protocol's item shape
#[derive(Debug, Clone, Copy)]
pub struct FieldMap {
    pub id: &'static str,
    pub name: &'static str,
    pub icon: &'static str,
    pub category: &'static str,
}

/// Xtream live and VOD listing items
pub const XTREAM_FIELDS: FieldMap = FieldMap {
    id: "stream_id",
    name: "name",
    icon: "stream_icon",
    category: "category_id",
};

/// Xtream series listing items
pub const XTREAM_SERIES_FIELDS: FieldMap = FieldMap {
    id: "series_id",
    name: "name",
    icon: "cover",
    category: "category_id",
};

/// Stalker rows inside a `{"js":{"data":[...]}}` envelope
pub const STALKER_FIELDS: FieldMap = FieldMap {
    id: "id",
    name: "name",
    icon: "logo",
    category: "tv_genre_id",
};

#[derive(Debug, Clone, Copy)]
pub struct CategoryFieldMap {
    pub id: &'static str,
    pub name: &'static str,
}

pub const XTREAM_CATEGORY_FIELDS: CategoryFieldMap = CategoryFieldMap {
    id: "category_id",
    name: "category_name",
};

pub const STALKER_GENRE_FIELDS: CategoryFieldMap = CategoryFieldMap {
    id: "id",
    name: "title",
};

/// Item identity as it appears on the wire: numeric when coercible, else the
/// raw text. Overrides are keyed numerically, so `Text` keys never match an
/// override row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StreamKey {
    Num(i64),
    Text(String),
}

impl StreamKey {
    pub fn from_value(v: &Value) -> Option<StreamKey> {
        if let Some(n) = coerce_i64(v) {
            return Some(StreamKey::Num(n));
        }
        match v {
            Value::String(s) if !s.is_empty() => Some(StreamKey::Text(s.clone())),
            _ => None,
        }
    }

    pub fn as_num(&self) -> Option<i64> {
        match self {
            StreamKey::Num(n) => Some(*n),
            StreamKey::Text(_) => None,
        }
    }
}

/// Numeric coercion for id fields that arrive as number or string
pub fn coerce_i64(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// One catalog item (live channel, movie, or series) with its raw upstream
/// fields retained so unknown fields survive the round trip.
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub key: Option<StreamKey>,
    pub category_id: Option<String>,
    fields: FieldMap,
    raw: Map<String, Value>,
}

impl CatalogEntry {
    /// Wrap a raw upstream item; `None` when the value is not an object
    pub fn from_value(value: Value, fields: FieldMap) -> Option<CatalogEntry> {
        let raw = match value {
            Value::Object(map) => map,
            _ => return None,
        };
        let key = raw.get(fields.id).and_then(StreamKey::from_value);
        let category_id = raw.get(fields.category).and_then(id_as_string);

        Some(CatalogEntry {
            key,
            category_id,
            fields,
            raw,
        })
    }

    pub fn name(&self) -> Option<&str> {
        self.raw.get(self.fields.name).and_then(Value::as_str)
    }

    pub fn set_name(&mut self, name: &str) {
        self.raw
            .insert(self.fields.name.to_string(), Value::String(name.to_string()));
    }

    pub fn icon(&self) -> Option<&str> {
        self.raw.get(self.fields.icon).and_then(Value::as_str)
    }

    pub fn set_icon(&mut self, icon: &str) {
        self.raw
            .insert(self.fields.icon.to_string(), Value::String(icon.to_string()));
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.raw)
    }
}

/// One category/genre row
#[derive(Debug, Clone)]
pub struct CategoryEntry {
    pub id: Option<String>,
    fields: CategoryFieldMap,
    raw: Map<String, Value>,
}

impl CategoryEntry {
    pub fn from_value(value: Value, fields: CategoryFieldMap) -> Option<CategoryEntry> {
        let raw = match value {
            Value::Object(map) => map,
            _ => return None,
        };
        let id = raw.get(fields.id).and_then(id_as_string);

        Some(CategoryEntry { id, fields, raw })
    }

    pub fn name(&self) -> Option<&str> {
        self.raw.get(self.fields.name).and_then(Value::as_str)
    }

    pub fn set_name(&mut self, name: &str) {
        self.raw
            .insert(self.fields.name.to_string(), Value::String(name.to_string()));
    }

    /// Protocol-specific extras the generic merge does not know about
    /// (Stalker genres carry an `alias` mirror of the title)
    pub fn set_field(&mut self, key: &str, value: Value) {
        self.raw.insert(key.to_string(), value);
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.raw)
    }
}

/// Category ids compare as strings even when upstream sends numbers
fn id_as_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Unwrap an upstream JSON array into entries; anything else yields nothing
pub fn entries_from_value(value: Value, fields: FieldMap) -> Vec<CatalogEntry> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|v| CatalogEntry::from_value(v, fields))
            .collect(),
        _ => Vec::new(),
    }
}

pub fn entries_to_value(entries: Vec<CatalogEntry>) -> Value {
    Value::Array(entries.into_iter().map(CatalogEntry::into_value).collect())
}

pub fn categories_from_value(value: Value, fields: CategoryFieldMap) -> Vec<CategoryEntry> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|v| CategoryEntry::from_value(v, fields))
            .collect(),
        _ => Vec::new(),
    }
}

pub fn categories_to_value(categories: Vec<CategoryEntry>) -> Value {
    Value::Array(categories.into_iter().map(CategoryEntry::into_value).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn stream_key_coerces_numbers_and_numeric_strings() {
        assert_eq!(
            StreamKey::from_value(&json!(42)),
            Some(StreamKey::Num(42))
        );
        assert_eq!(
            StreamKey::from_value(&json!("42")),
            Some(StreamKey::Num(42))
        );
        assert_eq!(
            StreamKey::from_value(&json!("premium-a")),
            Some(StreamKey::Text("premium-a".into()))
        );
        assert_eq!(StreamKey::from_value(&json!(null)), None);
    }

    #[test]
    fn entry_reads_protocol_fields() {
        let xtream = CatalogEntry::from_value(
            json!({"stream_id": 7, "name": "News", "stream_icon": "/n.png", "category_id": 3}),
            XTREAM_FIELDS,
        )
        .unwrap();
        assert_eq!(xtream.key, Some(StreamKey::Num(7)));
        assert_eq!(xtream.category_id.as_deref(), Some("3"));
        assert_eq!(xtream.name(), Some("News"));

        let stalker = CatalogEntry::from_value(
            json!({"id": "9", "name": "Sports", "logo": "s.png", "tv_genre_id": "2"}),
            STALKER_FIELDS,
        )
        .unwrap();
        assert_eq!(stalker.key, Some(StreamKey::Num(9)));
        assert_eq!(stalker.category_id.as_deref(), Some("2"));
    }

    #[test]
    fn mutation_preserves_unknown_fields() {
        let mut entry = CatalogEntry::from_value(
            json!({"stream_id": 1, "name": "Old", "direct_source": "x"}),
            XTREAM_FIELDS,
        )
        .unwrap();
        entry.set_name("New");
        entry.set_icon("http://example.com/logo.png");

        let v = entry.into_value();
        assert_eq!(v["name"], "New");
        assert_eq!(v["stream_icon"], "http://example.com/logo.png");
        assert_eq!(v["direct_source"], "x");
    }
}
