//! Outbound protocol client
//!
//! All upstream traffic funnels through `FetchClient`. Upstream panels sit
//! behind anti-bot defenses, so requests carry realistic headers, disable
//! compression negotiation, skip TLS verification, and can optionally fall
//! back to an external curl subprocess when the primary client is blocked.
//!
//! Two pooled reqwest clients: one follows redirects (JSON APIs, playlist
//! documents), one never does (the Stalker portal/asset passthrough must see
//! upstream Location headers to rewrite them).

use std::future::Future;
use std::time::Duration;

use lazy_static::lazy_static;
use prometheus::{register_int_counter_vec, IntCounterVec};
use reqwest::{redirect, Client, Method, Proxy};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::GatewayError;

lazy_static! {
    static ref UPSTREAM_REQUESTS: IntCounterVec = register_int_counter_vec!(
        "panelgate_upstream_requests_total",
        "Outbound upstream requests by outcome",
        &["outcome"]
    )
    .unwrap();
}

/// Statuses WAFs answer with when they dislike the client
fn looks_blocked(status: u16) -> bool {
    matches!(status, 403 | 520 | 521)
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("upstream returned HTTP {0}")]
    Http(u16),

    #[error("unparseable upstream body: {0}")]
    Parse(String),

    #[error("all candidate paths failed: {0}")]
    CandidatesExhausted(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout
        } else {
            FetchError::Network(e.to_string())
        }
    }
}

impl From<FetchError> for GatewayError {
    fn from(e: FetchError) -> Self {
        match e {
            FetchError::Parse(msg) => GatewayError::MalformedUpstreamResponse(msg),
            other => GatewayError::UpstreamUnreachable(other.to_string()),
        }
    }
}

#[derive(Clone)]
pub struct FetchClient {
    follow: Client,
    raw: Client,
    default_timeout: Duration,
    user_agent: String,
    proxy: Option<String>,
    curl_fallback: bool,
}

impl FetchClient {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let default_timeout = Duration::from_secs(config.upstream_timeout_secs);

        let mut follow = Client::builder()
            .pool_max_idle_per_host(16)
            .connect_timeout(Duration::from_secs(10))
            .timeout(default_timeout)
            .redirect(redirect::Policy::limited(10))
            .danger_accept_invalid_certs(true);
        let mut raw = Client::builder()
            .pool_max_idle_per_host(16)
            .connect_timeout(Duration::from_secs(10))
            .timeout(default_timeout)
            .redirect(redirect::Policy::none())
            .danger_accept_invalid_certs(true);

        if let Some(proxy_url) = &config.upstream_proxy {
            let proxy = Proxy::all(proxy_url)?;
            follow = follow.proxy(proxy.clone());
            raw = raw.proxy(proxy);
        }

        Ok(Self {
            follow: follow.build()?,
            raw: raw.build()?,
            default_timeout,
            user_agent: config.user_agent.clone(),
            proxy: config.upstream_proxy.clone(),
            curl_fallback: config.curl_fallback,
        })
    }

    /// GET a JSON payload, falling back to curl when the WAF blocks us
    pub async fn get_json(
        &self,
        url: &str,
        params: &[(&str, &str)],
        timeout: Option<Duration>,
    ) -> Result<Value, FetchError> {
        let timeout = timeout.unwrap_or(self.default_timeout);
        let result = self
            .follow
            .get(url)
            .query(params)
            .header("User-Agent", &self.user_agent)
            .header("Accept", "application/json, text/plain, */*")
            .header("Accept-Encoding", "identity")
            .timeout(timeout)
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => {
                let text = resp.text().await.map_err(FetchError::from)?;
                UPSTREAM_REQUESTS.with_label_values(&["success"]).inc();
                serde_json::from_str(&text).map_err(|e| {
                    FetchError::Parse(format!("{} ({} bytes)", e, text.len()))
                })
            }
            Ok(resp) => {
                let status = resp.status().as_u16();
                if self.curl_fallback && looks_blocked(status) {
                    UPSTREAM_REQUESTS.with_label_values(&["curl_fallback"]).inc();
                    return self.curl_json(url, params, timeout).await;
                }
                UPSTREAM_REQUESTS.with_label_values(&["http_error"]).inc();
                Err(FetchError::Http(status))
            }
            Err(e) => {
                if self.curl_fallback && e.is_connect() {
                    UPSTREAM_REQUESTS.with_label_values(&["curl_fallback"]).inc();
                    return self.curl_json(url, params, timeout).await;
                }
                UPSTREAM_REQUESTS.with_label_values(&["network_error"]).inc();
                Err(e.into())
            }
        }
    }

    /// GET a text document (M3U playlists, EPG XML, bouquets)
    pub async fn get_text(
        &self,
        url: &str,
        params: &[(&str, &str)],
        timeout: Option<Duration>,
    ) -> Result<(String, Option<String>), FetchError> {
        let resp = self
            .follow
            .get(url)
            .query(params)
            .header("User-Agent", &self.user_agent)
            .header("Accept", "*/*")
            .header("Accept-Encoding", "identity")
            .timeout(timeout.unwrap_or(self.default_timeout))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            UPSTREAM_REQUESTS.with_label_values(&["http_error"]).inc();
            return Err(FetchError::Http(status.as_u16()));
        }

        let content_type = resp
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let body = resp.text().await.map_err(FetchError::from)?;
        UPSTREAM_REQUESTS.with_label_values(&["success"]).inc();
        Ok((body, content_type))
    }

    /// Forward a request as-is and hand back the live response.
    ///
    /// Uses the no-redirect client so callers see upstream Location headers.
    /// Headers travel as strings because the inbound and outbound HTTP stacks
    /// disagree on header types.
    pub async fn send_raw(
        &self,
        method: Method,
        url: &str,
        headers: &[(String, String)],
        body: Option<Vec<u8>>,
        timeout: Option<Duration>,
    ) -> Result<reqwest::Response, FetchError> {
        let mut req = self
            .raw
            .request(method, url)
            .timeout(timeout.unwrap_or(self.default_timeout));
        for (name, value) in headers {
            req = req.header(name, value);
        }
        if let Some(bytes) = body {
            req = req.body(bytes);
        }

        let resp = req.send().await.map_err(|e| {
            UPSTREAM_REQUESTS.with_label_values(&["network_error"]).inc();
            FetchError::from(e)
        })?;
        UPSTREAM_REQUESTS.with_label_values(&["success"]).inc();
        Ok(resp)
    }

    /// Shell out to curl. Some WAF configurations block every HTTP library
    /// but admit curl's TLS fingerprint.
    async fn curl_json(
        &self,
        url: &str,
        params: &[(&str, &str)],
        timeout: Duration,
    ) -> Result<Value, FetchError> {
        let full_url = append_params(url, params);
        debug!("curl fallback for {}", url);

        let mut cmd = tokio::process::Command::new("curl");
        cmd.arg("-s")
            .arg("-L")
            .arg("--insecure")
            .arg("--max-time")
            .arg(timeout.as_secs().max(1).to_string())
            .arg("-A")
            .arg(&self.user_agent)
            .arg("-H")
            .arg("Accept: application/json")
            .arg("-w")
            .arg("\n%{http_code}");
        if let Some(proxy) = &self.proxy {
            cmd.arg("--proxy").arg(proxy);
        }
        cmd.arg(&full_url);

        let output = cmd
            .output()
            .await
            .map_err(|e| FetchError::Network(format!("curl spawn failed: {}", e)))?;
        let stdout = String::from_utf8_lossy(&output.stdout);

        let (body, code) = stdout
            .trim_end()
            .rsplit_once('\n')
            .ok_or_else(|| FetchError::Parse("curl output missing status line".to_string()))?;
        let status: u16 = code
            .trim()
            .parse()
            .map_err(|_| FetchError::Parse(format!("curl status line '{}'", code.trim())))?;

        if !(200..300).contains(&status) {
            return Err(FetchError::Http(status));
        }
        serde_json::from_str(body.trim()).map_err(|e| FetchError::Parse(e.to_string()))
    }
}

/// Append query parameters to a URL, percent-encoding values
pub fn append_params(url: &str, params: &[(&str, &str)]) -> String {
    if params.is_empty() {
        return url.to_string();
    }
    let query: Vec<String> = params
        .iter()
        .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
        .collect();
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{}{}{}", url, separator, query.join("&"))
}

/// Convert a reqwest header map into plain string pairs
pub fn header_pairs(headers: &reqwest::header::HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}

/// Try candidate paths in order until one answers acceptably.
///
/// Advances to the next candidate on transport errors and on statuses the
/// predicate names; any other response wins, even a server error, because it
/// proves the path exists. Exhausting the list is the only error this
/// function itself produces.
pub async fn first_success<T, F, Fut>(
    candidates: &[String],
    max_attempts: usize,
    should_advance: impl Fn(u16) -> bool,
    mut send: F,
) -> Result<T, FetchError>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<(u16, T), FetchError>>,
{
    let mut last_failure = String::from("no candidates configured");

    for candidate in candidates.iter().take(max_attempts) {
        match send(candidate.clone()).await {
            Ok((status, response)) => {
                if should_advance(status) {
                    debug!("Candidate '{}' answered HTTP {}, advancing", candidate, status);
                    last_failure = format!("'{}' -> HTTP {}", candidate, status);
                    continue;
                }
                return Ok(response);
            }
            Err(e) => {
                warn!("Candidate '{}' failed: {}", candidate, e);
                last_failure = format!("'{}' -> {}", candidate, e);
            }
        }
    }

    Err(FetchError::CandidatesExhausted(last_failure))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn advance_on(status: u16) -> bool {
        matches!(status, 404 | 403 | 520)
    }

    #[tokio::test]
    async fn stops_at_the_first_acceptable_candidate() {
        let candidates: Vec<String> = ["one", "two", "three", "four"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let calls = AtomicUsize::new(0);

        let result = first_success(&candidates, candidates.len(), advance_on, |path| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                match path.as_str() {
                    "one" | "two" => Ok((404, path)),
                    _ => Ok((200, path)),
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(result, "three");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_status_is_returned_not_skipped() {
        let candidates: Vec<String> = vec!["a".into(), "b".into()];
        let result = first_success(&candidates, candidates.len(), advance_on, |path| async move {
            match path.as_str() {
                "a" => Ok((500, path)),
                _ => Ok((200, path)),
            }
        })
        .await
        .unwrap();

        // 500 proves the path exists; it must pass through to the client
        assert_eq!(result, "a");
    }

    #[tokio::test]
    async fn transport_errors_advance_and_exhaustion_is_an_error() {
        let candidates: Vec<String> = vec!["a".into(), "b".into()];
        let result: Result<String, _> =
            first_success(&candidates, candidates.len(), advance_on, |_| async {
                Err(FetchError::Network("refused".into()))
            })
            .await;

        assert!(matches!(result, Err(FetchError::CandidatesExhausted(_))));
    }

    #[test]
    fn append_params_encodes_values() {
        let url = append_params(
            "http://up.example/player_api.php",
            &[("username", "a b"), ("action", "get_live_streams")],
        );
        assert_eq!(
            url,
            "http://up.example/player_api.php?username=a%20b&action=get_live_streams"
        );

        let url = append_params("http://up.example/portal.php?type=stb", &[("mac", "00:1A")]);
        assert!(url.starts_with("http://up.example/portal.php?type=stb&mac=00%3A1A"));
    }
}
