//! Stalker portal protocol helpers
//!
//! Pure functions shared by the portal and asset routes: extracting the STB
//! MAC from a request, assembling the set-top-box header profile for upstream
//! calls, building the ordered candidate URLs, and the markers we splice into
//! catalog payloads so locally hosted items survive the `create_link` round
//! trip.

use std::fmt::Write as _;

use serde_json::{json, Value};

/// Marker prefix for `cmd` values that point at our own catalog instead of
/// an upstream stream.
pub const LOCAL_CMD_PREFIX: &str = "local:";

/// Prefix for synthetic genre ids carved out for local categories. Upstream
/// portals hand out small decimal ids, so a hex-looking `ff...` id never
/// collides.
const LOCAL_GENRE_PREFIX: &str = "ff";

/// Category key for the catch-all "Local" genre (every local VOD item).
pub const LOCAL_ALL_KEY: &str = "*";

/// Setup page for browsers that open the portal without a MAC. Stores the
/// MAC in the cookie real boxes use, then reloads so the request goes through
/// the normal path.
pub const MAC_PROMPT_HTML: &str = r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>Portal setup</title></head>
<body style="font-family:sans-serif;max-width:32em;margin:4em auto">
<h3>Device MAC required</h3>
<p>This portal identifies devices by MAC address. Enter the MAC of the box
you want to emulate (format <code>00:1A:79:XX:XX:XX</code>).</p>
<form onsubmit="return save()">
<input id="mac" placeholder="00:1A:79:00:00:00" size="20" autofocus>
<button type="submit">Save</button>
</form>
<script>
function save() {
  var mac = document.getElementById('mac').value.trim().toUpperCase();
  if (!/^[0-9A-F]{2}(:[0-9A-F]{2}){5}$/.test(mac)) { alert('Invalid MAC'); return false; }
  document.cookie = 'mac=' + encodeURIComponent(mac) + '; path=/; max-age=31536000';
  location.reload();
  return false;
}
</script>
</body>
</html>
"#;

/// Pull the device MAC out of a portal request. Boxes are inconsistent about
/// where they put it, so check the query string first, then a bearer token,
/// then the session cookie.
pub fn extract_mac(
    query_mac: Option<&str>,
    authorization: Option<&str>,
    cookie: Option<&str>,
) -> Option<String> {
    if let Some(mac) = query_mac.map(str::trim).filter(|m| !m.is_empty()) {
        return Some(normalize_mac(mac));
    }

    if let Some(token) = authorization
        .and_then(|a| a.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
    {
        return Some(normalize_mac(token));
    }

    if let Some(cookie) = cookie {
        for part in cookie.split(';') {
            if let Some(value) = part.trim().strip_prefix("mac=") {
                let decoded = urlencoding::decode(value)
                    .map(|c| c.into_owned())
                    .unwrap_or_else(|_| value.to_string());
                let decoded = decoded.trim();
                if !decoded.is_empty() {
                    return Some(normalize_mac(decoded));
                }
            }
        }
    }

    None
}

fn normalize_mac(mac: &str) -> String {
    mac.trim().to_uppercase()
}

/// A real browser landed on the portal path instead of a box
pub fn wants_html(accept: Option<&str>) -> bool {
    accept.map_or(false, |a| a.to_ascii_lowercase().contains("text/html"))
}

/// Header profile a MAG box would present, pointed at the upstream portal.
/// The inbound Authorization header is forwarded verbatim when present.
pub fn stb_headers(
    base_url: &str,
    mac: Option<&str>,
    authorization: Option<&str>,
    stb_user_agent: &str,
) -> Vec<(String, String)> {
    let base = base_url.trim_end_matches('/');
    let cookie = match mac {
        Some(mac) => format!(
            "mac={}; stb_lang=en; timezone=Europe%2FParis",
            urlencoding::encode(mac)
        ),
        None => "stb_lang=en; timezone=Europe%2FParis".to_string(),
    };

    let mut headers = vec![
        ("User-Agent".to_string(), stb_user_agent.to_string()),
        (
            "X-User-Agent".to_string(),
            "Model: MAG250; Link: Ethernet".to_string(),
        ),
        ("Referer".to_string(), format!("{base}/c/")),
        ("Accept".to_string(), "*/*".to_string()),
        ("Cookie".to_string(), cookie),
    ];
    if let Some(auth) = authorization {
        headers.push(("Authorization".to_string(), auth.to_string()));
    }
    headers
}

/// Expand the configured portal endpoint paths into full candidate URLs,
/// carrying the inbound query string through untouched.
pub fn candidate_urls(base_url: &str, paths: &[String], raw_query: &str) -> Vec<String> {
    let base = base_url.trim_end_matches('/');
    paths
        .iter()
        .map(|p| {
            let path = p.trim_start_matches('/');
            if raw_query.is_empty() {
                format!("{base}/{path}")
            } else {
                format!("{base}/{path}?{raw_query}")
            }
        })
        .collect()
}

/// Wrap a payload in the `{"js": ...}` envelope portal clients expect
pub fn js_envelope(payload: Value) -> Value {
    json!({ "js": payload })
}

pub fn local_cmd(stream_key: &str) -> String {
    format!("{LOCAL_CMD_PREFIX}{stream_key}")
}

/// Recognize a `cmd` we minted ourselves. Boxes resend it as-is or with an
/// `ffmpeg ` prefix tacked on.
pub fn parse_local_cmd(cmd: &str) -> Option<&str> {
    let trimmed = cmd.trim();
    let trimmed = trimmed.strip_prefix("ffmpeg ").unwrap_or(trimmed).trim();
    trimmed
        .strip_prefix(LOCAL_CMD_PREFIX)
        .map(str::trim)
        .filter(|k| !k.is_empty())
}

pub fn encode_local_genre(category_id: &str) -> String {
    let mut out = String::with_capacity(LOCAL_GENRE_PREFIX.len() + category_id.len() * 2);
    out.push_str(LOCAL_GENRE_PREFIX);
    for b in category_id.bytes() {
        let _ = write!(out, "{b:02x}");
    }
    out
}

pub fn decode_local_genre(genre_id: &str) -> Option<String> {
    let hex = genre_id.strip_prefix(LOCAL_GENRE_PREFIX)?;
    if hex.is_empty() || hex.len() % 2 != 0 {
        return None;
    }
    let mut bytes = Vec::with_capacity(hex.len() / 2);
    for pair in hex.as_bytes().chunks(2) {
        let digits = std::str::from_utf8(pair).ok()?;
        bytes.push(u8::from_str_radix(digits, 16).ok()?);
    }
    String::from_utf8(bytes).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mac_lookup_order_is_query_then_bearer_then_cookie() {
        assert_eq!(
            extract_mac(Some("00:1a:79:aa:bb:cc"), Some("Bearer 11:11"), Some("mac=22%3A22")),
            Some("00:1A:79:AA:BB:CC".to_string())
        );
        assert_eq!(
            extract_mac(None, Some("Bearer 00:1A:79:11:22:33"), Some("mac=22%3A22")),
            Some("00:1A:79:11:22:33".to_string())
        );
        assert_eq!(
            extract_mac(None, None, Some("stb_lang=en; mac=00%3A1A%3A79%3A44%3A55%3A66")),
            Some("00:1A:79:44:55:66".to_string())
        );
        assert_eq!(extract_mac(None, None, None), None);
        assert_eq!(extract_mac(Some("  "), None, Some("other=1")), None);
    }

    #[test]
    fn stb_headers_carry_the_box_identity() {
        let headers = stb_headers(
            "http://portal.example/",
            Some("00:1A:79:AA:BB:CC"),
            Some("Bearer tok"),
            "MAG200 stbapp",
        );
        let get = |name: &str| {
            headers
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.as_str())
        };
        assert_eq!(get("Referer"), Some("http://portal.example/c/"));
        assert_eq!(get("Authorization"), Some("Bearer tok"));
        assert!(get("Cookie").unwrap().contains("mac=00%3A1A%3A79%3AAA%3ABB%3ACC"));
        assert!(get("X-User-Agent").unwrap().contains("MAG250"));

        let anonymous = stb_headers("http://portal.example", None, None, "MAG200 stbapp");
        let cookie = anonymous
            .iter()
            .find(|(k, _)| k == "Cookie")
            .map(|(_, v)| v.as_str())
            .unwrap();
        assert!(!cookie.contains("mac="));
        assert!(cookie.contains("stb_lang=en"));
    }

    #[test]
    fn candidate_urls_join_cleanly() {
        let paths = vec![
            "portal.php".to_string(),
            "/stalker_portal/server/load.php".to_string(),
        ];
        let urls = candidate_urls("http://p.example/", &paths, "type=stb&action=handshake");
        assert_eq!(
            urls,
            vec![
                "http://p.example/portal.php?type=stb&action=handshake",
                "http://p.example/stalker_portal/server/load.php?type=stb&action=handshake",
            ]
        );

        let bare = candidate_urls("http://p.example", &paths[..1], "");
        assert_eq!(bare, vec!["http://p.example/portal.php"]);
    }

    #[test]
    fn local_cmd_round_trips_through_client_resend() {
        let cmd = local_cmd("12345");
        assert_eq!(parse_local_cmd(&cmd), Some("12345"));
        assert_eq!(parse_local_cmd(&format!("ffmpeg {cmd}")), Some("12345"));
        assert_eq!(parse_local_cmd("ffmpeg http://up.example/s/1"), None);
        assert_eq!(parse_local_cmd("local:"), None);
    }

    #[test]
    fn local_genre_ids_round_trip_and_reject_upstream_ids() {
        let encoded = encode_local_genre("local_movies");
        assert_eq!(decode_local_genre(&encoded), Some("local_movies".to_string()));
        assert_eq!(decode_local_genre("7"), None);
        assert_eq!(decode_local_genre("ff123"), None);
    }

    #[test]
    fn browser_detection_keys_off_accept() {
        assert!(wants_html(Some("text/html,application/xhtml+xml")));
        assert!(!wants_html(Some("*/*")));
        assert!(!wants_html(None));
    }
}
