//! Upstream selection
//!
//! Two independent lookup paths:
//! - sticky: hash a client identifier onto a fixed pool of base URLs so the
//!   same client always lands on the same upstream. Stalker tokens are only
//!   valid on the panel that issued them, so mid-session switches break
//!   playback.
//! - active: the single admin-designated server row, behind a short
//!   in-process TTL cache with explicit invalidation on admin writes.

use std::time::{Duration, Instant};

use sqlx::PgPool;
use tokio::sync::RwLock;

use crate::db::models::UpstreamRow;
use crate::db::repository::upstreams;

/// Stable 32-bit string hash (h = h*31 + byte, wrapping)
fn identity_hash(identifier: &str) -> u32 {
    let mut h: i32 = 0;
    for b in identifier.bytes() {
        h = h.wrapping_mul(31).wrapping_add(b as i32);
    }
    h.unsigned_abs()
}

/// Map a client identifier onto the sticky pool.
///
/// Pure over (identifier, pool): the same inputs always yield the same base
/// URL. Returns `None` when the pool is empty, in which case callers fall
/// back to the active server.
pub fn pick<'a>(pool: &'a [String], identifier: &str) -> Option<&'a str> {
    if pool.is_empty() {
        return None;
    }
    let idx = identity_hash(identifier) as usize % pool.len();
    Some(pool[idx].trim_end_matches('/'))
}

struct CachedDesignation {
    row: Option<UpstreamRow>,
    fetched_at: Instant,
}

/// TTL cache over the admin-designated active upstream.
///
/// The designation changes rarely but is read on every request, so a ~60s
/// cache keeps the hot path off the database. Admin writes call
/// `invalidate()` so a new designation takes effect immediately.
pub struct ActiveUpstreamCache {
    slot: RwLock<Option<CachedDesignation>>,
    ttl: Duration,
}

impl ActiveUpstreamCache {
    pub fn new(ttl_seconds: u64) -> Self {
        Self {
            slot: RwLock::new(None),
            ttl: Duration::from_secs(ttl_seconds),
        }
    }

    /// Resolve the active server, serving the cached row within the TTL
    pub async fn resolve(&self, pool: &PgPool) -> Result<Option<UpstreamRow>, sqlx::Error> {
        {
            let slot = self.slot.read().await;
            if let Some(cached) = slot.as_ref() {
                if cached.fetched_at.elapsed() < self.ttl {
                    return Ok(cached.row.clone());
                }
            }
        }

        let row = upstreams::find_active(pool).await?;
        let mut slot = self.slot.write().await;
        *slot = Some(CachedDesignation {
            row: row.clone(),
            fetched_at: Instant::now(),
        });
        Ok(row)
    }

    /// Drop the cached designation; the next resolve hits the database
    pub async fn invalidate(&self) {
        *self.slot.write().await = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool3() -> Vec<String> {
        vec![
            "http://one.example".to_string(),
            "http://two.example/".to_string(),
            "http://three.example".to_string(),
        ]
    }

    #[test]
    fn hash_is_the_31_multiplier_scheme() {
        assert_eq!(identity_hash("a"), 97);
        assert_eq!(identity_hash("ab"), 97 * 31 + 98);
    }

    #[test]
    fn same_identifier_same_upstream() {
        let pool = pool3();
        let first = pick(&pool, "00:1A:79:B2:C3:D4").unwrap();
        for _ in 0..10 {
            assert_eq!(pick(&pool, "00:1A:79:B2:C3:D4").unwrap(), first);
        }
    }

    #[test]
    fn picked_urls_lose_their_trailing_slash() {
        let pool = pool3();
        for id in ["x", "y", "z", "192.168.1.50", "00:1A:79:00:00:01"] {
            let base = pick(&pool, id).unwrap();
            assert!(!base.ends_with('/'));
            assert!(pool.iter().any(|p| p.trim_end_matches('/') == base));
        }
    }

    #[test]
    fn empty_pool_yields_none() {
        assert_eq!(pick(&[], "anything"), None);
    }
}
