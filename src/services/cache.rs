//! Response cache over Redis
//!
//! Caches catalog-shaped upstream payloads so one slow upstream call serves
//! every client. Keys hash the action plus its non-credential parameters:
//! the upstream catalog is identical across authenticated users, so
//! credentials must NOT split the key space. Authentication responses are the
//! one exception; their callers bake the credentials into the key on purpose.
//!
//! Every cache failure is non-fatal: a broken Redis degrades to slower
//! responses, never to errors.

use std::future::Future;

use anyhow::Result;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Serialize};
use sha1::{Digest, Sha1};
use tracing::debug;

/// Query parameters that never participate in cache keys
const CREDENTIAL_PARAMS: &[&str] = &["username", "password", "mac", "token"];

#[derive(Clone)]
pub struct ResponseCache {
    conn: ConnectionManager,
}

impl ResponseCache {
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }

    /// Set a key with expiration (seconds)
    pub async fn set_ex<T: Serialize>(&self, key: &str, value: &T, ttl_seconds: u64) -> Result<()> {
        let mut conn = self.conn.clone();
        let serialized = serde_json::to_string(value)?;
        conn.set_ex::<_, _, ()>(key, serialized, ttl_seconds).await?;
        Ok(())
    }

    /// Get a key and deserialize
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        match value {
            Some(v) => Ok(Some(serde_json::from_str(&v)?)),
            None => Ok(None),
        }
    }

    /// Delete a key
    pub async fn del(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    /// Ping Redis to check connection
    pub async fn ping(&self) -> Result<bool> {
        let mut conn = self.conn.clone();
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(pong == "PONG")
    }

    /// Serve `key` from cache, or run `fetch` and store its success.
    ///
    /// Cache get/set failures fall through to the fetch path; only the fetch
    /// error itself propagates.
    pub async fn get_or_fetch<T, E, F, Fut>(
        &self,
        key: &str,
        ttl_seconds: u64,
        fetch: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        match self.get::<T>(key).await {
            Ok(Some(hit)) => {
                debug!("Cache hit: {}", key);
                return Ok(hit);
            }
            Ok(None) => {}
            Err(e) => debug!("Cache read failed for {}: {}", key, e),
        }

        let fresh = fetch().await?;
        if let Err(e) = self.set_ex(key, &fresh, ttl_seconds).await {
            debug!("Cache write failed for {}: {}", key, e);
        }
        Ok(fresh)
    }
}

/// Cache key for an auth handshake. Auth responses are per-subscriber, so
/// unlike `cache_key` this one hashes the credentials in.
pub fn auth_cache_key(server_id: i32, username: &str, password: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(server_id.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(username.as_bytes());
    hasher.update(b"|");
    hasher.update(password.as_bytes());
    format!("auth:{:x}", hasher.finalize())
}

/// Cache key for an upstream action: sha1 over the action and its sorted
/// non-credential parameters.
pub fn cache_key(action: &str, params: &[(&str, &str)]) -> String {
    let mut kept: Vec<(&str, &str)> = params
        .iter()
        .filter(|(k, _)| !CREDENTIAL_PARAMS.iter().any(|c| c.eq_ignore_ascii_case(k)))
        .copied()
        .collect();
    kept.sort_unstable();

    let mut hasher = Sha1::new();
    hasher.update(action.as_bytes());
    for (k, v) in kept {
        hasher.update(b"|");
        hasher.update(k.as_bytes());
        hasher.update(b"=");
        hasher.update(v.as_bytes());
    }
    format!("resp:{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_do_not_split_the_key() {
        let a = cache_key(
            "get_live_streams",
            &[
                ("username", "alice"),
                ("password", "s3cret"),
                ("category_id", "5"),
            ],
        );
        let b = cache_key(
            "get_live_streams",
            &[
                ("username", "bob"),
                ("password", "hunter2"),
                ("category_id", "5"),
            ],
        );
        assert_eq!(a, b);
    }

    #[test]
    fn parameter_order_is_irrelevant() {
        let a = cache_key("get_short_epg", &[("stream_id", "9"), ("limit", "10")]);
        let b = cache_key("get_short_epg", &[("limit", "10"), ("stream_id", "9")]);
        assert_eq!(a, b);
    }

    #[test]
    fn action_and_parameters_separate_keys() {
        let a = cache_key("get_live_streams", &[("category_id", "5")]);
        let b = cache_key("get_vod_streams", &[("category_id", "5")]);
        let c = cache_key("get_live_streams", &[("category_id", "6")]);
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn auth_keys_are_per_subscriber_and_per_server() {
        let key = auth_cache_key(1, "alice", "pw");
        assert!(key.starts_with("auth:"));
        assert_eq!(key, auth_cache_key(1, "alice", "pw"));
        assert_ne!(key, auth_cache_key(1, "bob", "pw"));
        assert_ne!(key, auth_cache_key(2, "alice", "pw"));
    }
}
