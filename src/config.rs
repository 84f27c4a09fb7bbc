use std::env;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub port: u16,
    pub app_env: String,
    pub public_base_url: String,

    // Redis
    pub redis_url: String,

    // PostgreSQL
    pub database_url: String,
    pub db_max_connections: u32,

    // Upstream selection
    pub sticky_upstreams: Vec<String>,
    pub active_cache_ttl_secs: u64,

    // Outbound fetching
    pub upstream_timeout_secs: u64,
    pub document_timeout_secs: u64,
    pub upstream_proxy: Option<String>,
    pub curl_fallback: bool,
    pub user_agent: String,
    pub stb_user_agent: String,

    // Stalker portal
    pub stalker_candidates: Vec<String>,

    // Response cache
    pub catalog_cache_ttl_secs: u64,
    pub auth_cache_ttl_secs: u64,

    // Catalog sync
    pub sync_batch_size: usize,
    pub sync_interval_secs: u64,
}

fn env_list(name: &str, default: &str) -> Vec<String> {
    env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

impl Config {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        Self {
            // Server
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .unwrap_or(8080),
            app_env: env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
            public_base_url: env::var("PUBLIC_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8080".to_string()),

            // Redis
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),

            // PostgreSQL
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost/panelgate".to_string()),
            db_max_connections: env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "50".to_string())
                .parse()
                .unwrap_or(50),

            // Upstream selection
            // Stalker sessions are affine to one upstream, so the sticky pool
            // maps a client identifier to a fixed base URL. Empty pool means
            // every route falls back to the admin-designated active server.
            sticky_upstreams: env_list("STICKY_UPSTREAMS", ""),
            active_cache_ttl_secs: env::var("ACTIVE_CACHE_TTL_SECS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .unwrap_or(60),

            // Outbound fetching
            upstream_timeout_secs: env::var("UPSTREAM_TIMEOUT_SECS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .unwrap_or(60),
            document_timeout_secs: env::var("DOCUMENT_TIMEOUT_SECS")
                .unwrap_or_else(|_| "120".to_string())
                .parse()
                .unwrap_or(120), // full M3U/EPG documents are slow to generate
            upstream_proxy: env::var("UPSTREAM_PROXY").ok().filter(|v| !v.is_empty()),
            curl_fallback: env::var("CURL_FALLBACK")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),

            // Browser user agent avoids blocks on panels fronted by WAFs
            user_agent: env::var("USER_AGENT").unwrap_or_else(|_| {
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"
                    .to_string()
            }),
            stb_user_agent: env::var("STB_USER_AGENT").unwrap_or_else(|_| {
                "Mozilla/5.0 (QtEmbedded; U; Linux; C) AppleWebKit/533.3 \
                 (KHTML, like Gecko) MAG200 stbapp ver: 2 rev: 250 Safari/533.3"
                    .to_string()
            }),

            // Stalker portal
            // Different panel builds expose the portal surface at different
            // paths; candidates are tried in order.
            stalker_candidates: env_list(
                "STALKER_CANDIDATES",
                "portal.php,stalker_portal/server/load.php,server/load.php",
            ),

            // Response cache
            catalog_cache_ttl_secs: env::var("CATALOG_CACHE_TTL_SECS")
                .unwrap_or_else(|_| "300".to_string())
                .parse()
                .unwrap_or(300), // 5 minutes
            auth_cache_ttl_secs: env::var("AUTH_CACHE_TTL_SECS")
                .unwrap_or_else(|_| "600".to_string())
                .parse()
                .unwrap_or(600), // 10 minutes

            // Catalog sync
            sync_batch_size: env::var("SYNC_BATCH_SIZE")
                .unwrap_or_else(|_| "1000".to_string())
                .parse()
                .unwrap_or(1000),
            sync_interval_secs: env::var("SYNC_INTERVAL_SECS")
                .unwrap_or_else(|_| "0".to_string())
                .parse()
                .unwrap_or(0), // 0 = no background sync, trigger via the API
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}
