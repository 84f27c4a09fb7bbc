//! Domain-reference rewriting
//!
//! Everything that turns upstream-addressed text into gateway-addressed text
//! lives here: portal asset bodies, redirect Location headers, Set-Cookie
//! scoping, and playlist/EPG documents. Substring rewriting is inherently
//! fragile, so each function is small and pinned by tests below.

use lazy_static::lazy_static;
use regex::{NoExpand, Regex};
use url::Url;

lazy_static! {
    static ref HEAD_TAG: Regex = Regex::new(r"(?i)<head[^>]*>").unwrap();
    static ref COOKIE_DOMAIN: Regex = Regex::new(r"(?i);\s*domain=[^;]*").unwrap();
}

/// host[:port] of a base URL, as it would appear inside response bodies
pub fn host_of(base_url: &str) -> Option<String> {
    let parsed = Url::parse(base_url).ok()?;
    let host = parsed.host_str()?;
    Some(match parsed.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

/// Rewrite every reference to the upstream portal into our own `/c` root.
///
/// Three passes: absolute URLs already under `/c`, absolute URLs to the bare
/// origin, and bare hostname mentions (portal JS builds URLs by string
/// concatenation). A final fixup normalizes the `../server/api` form some
/// portal builds emit for their own API root.
pub fn rewrite_portal_references(body: &str, upstream_host: &str, public_origin: &str) -> String {
    let public_root = format!("{}/c", public_origin.trim_end_matches('/'));
    let host = regex::escape(upstream_host);

    let abs_with_c = Regex::new(&format!(r"(?i)https?://{}(?::\d+)?/c", host))
        .expect("escaped host regex");
    let abs = Regex::new(&format!(r"(?i)https?://{}(?::\d+)?", host))
        .expect("escaped host regex");
    let bare = Regex::new(&format!(r"(?i){}(?::\d+)?", host)).expect("escaped host regex");

    let out = abs_with_c.replace_all(body, NoExpand(&public_root));
    let out = abs.replace_all(&out, NoExpand(&public_root));
    let out = bare.replace_all(&out, NoExpand(&public_root));

    out.replace("../server/api", "server/api")
}

/// Insert a `<base>` tag right after `<head>` so residual relative links
/// resolve under `/c/`. Documents without a head are left alone.
pub fn inject_base_href(html: &str, public_origin: &str) -> String {
    if !HEAD_TAG.is_match(html) {
        return html.to_string();
    }
    let base_tag = format!(
        "<base href=\"{}/c/\">",
        public_origin.trim_end_matches('/')
    );
    HEAD_TAG
        .replacen(html, 1, |caps: &regex::Captures| {
            format!("{}{}", &caps[0], base_tag)
        })
        .into_owned()
}

/// Rewrite a redirect target so the client never leaves the gateway.
///
/// The final check is a safety net: any location still naming the upstream
/// host after the structured passes gets forced to our `/c/` root.
pub fn rewrite_location(location: &str, upstream_host: &str, public_origin: &str) -> String {
    let public = public_origin.trim_end_matches('/');

    let mut rewritten = if location.starts_with("http://") || location.starts_with("https://") {
        rewrite_portal_references(location, upstream_host, public)
    } else {
        location.to_string()
    };

    if rewritten.starts_with("/c/") || rewritten == "/c" {
        rewritten = format!("{}{}", public, rewritten);
    } else if rewritten.starts_with('/') {
        rewritten = format!("{}/c{}", public, rewritten);
    }

    if rewritten.contains(upstream_host) {
        return format!("{}/c/", public);
    }
    rewritten
}

/// Drop the Domain attribute so the cookie binds to our own host
pub fn strip_cookie_domain(set_cookie: &str) -> String {
    COOKIE_DOMAIN.replace_all(set_cookie, "").into_owned()
}

/// Replace every occurrence of the upstream base URL (either scheme) with
/// our public origin. Used on M3U/EPG/bouquet documents, where the upstream
/// writes absolute playback and logo URLs.
pub fn rewrite_base_urls(body: &str, upstream_base: &str, public_origin: &str) -> String {
    let base = upstream_base.trim_end_matches('/');
    let public = public_origin.trim_end_matches('/');

    let mut out = body.replace(base, public);
    if let Some(rest) = base.strip_prefix("http://") {
        out = out.replace(&format!("https://{}", rest), public);
    } else if let Some(rest) = base.strip_prefix("https://") {
        out = out.replace(&format!("http://{}", rest), public);
    }
    out
}

/// Whether a response body is text we should rewrite. Unknown content types
/// pass through untouched.
pub fn is_text_body(content_type: Option<&str>) -> bool {
    let Some(ct) = content_type else {
        return false;
    };
    let ct = ct.to_ascii_lowercase();
    ct.starts_with("text/")
        || ct.contains("javascript")
        || ct.contains("ecmascript")
        || ct.contains("json")
        || ct.contains("xml")
        || ct.contains("x-www-form-urlencoded")
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOST: &str = "upstream.example";
    const ORIGIN: &str = "https://panel.example";

    #[test]
    fn rewrites_absolute_and_bare_references() {
        let body = r#"<script src="http://upstream.example/c/a.js"></script> var portal = "upstream.example";"#;
        let out = rewrite_portal_references(body, HOST, ORIGIN);

        assert!(out.contains("https://panel.example/c/a.js"));
        assert!(!out.contains("upstream.example"));
    }

    #[test]
    fn absolute_urls_outside_c_move_under_c() {
        let out = rewrite_portal_references(
            "url(https://upstream.example/misc/logo.png)",
            HOST,
            ORIGIN,
        );
        assert_eq!(out, "url(https://panel.example/c/misc/logo.png)");
    }

    #[test]
    fn ports_are_swallowed() {
        let out = rewrite_portal_references(
            "fetch('http://upstream.example:8080/c/xpcom.common.js')",
            HOST,
            ORIGIN,
        );
        assert_eq!(out, "fetch('https://panel.example/c/xpcom.common.js')");
    }

    #[test]
    fn server_api_residue_is_normalized() {
        let out = rewrite_portal_references("load('../server/api/load.php')", HOST, ORIGIN);
        assert_eq!(out, "load('server/api/load.php')");
    }

    #[test]
    fn base_href_lands_after_head() {
        let html = "<html><head><title>p</title></head></html>";
        let out = inject_base_href(html, ORIGIN);
        assert!(out.starts_with("<html><head><base href=\"https://panel.example/c/\">"));

        // headless documents are untouched
        let fragment = "<div>x</div>";
        assert_eq!(inject_base_href(fragment, ORIGIN), fragment);
    }

    #[test]
    fn location_rewrites() {
        assert_eq!(
            rewrite_location("http://upstream.example/c/index.html", HOST, ORIGIN),
            "https://panel.example/c/index.html"
        );
        assert_eq!(
            rewrite_location("http://upstream.example/auth", HOST, ORIGIN),
            "https://panel.example/c/auth"
        );
        assert_eq!(
            rewrite_location("/stalker_portal/c/", HOST, ORIGIN),
            "https://panel.example/c/stalker_portal/c/"
        );
        // safety net for anything still leaking the upstream host
        assert_eq!(
            rewrite_location("ftp://upstream.example/x", HOST, ORIGIN),
            "https://panel.example/c/"
        );
    }

    #[test]
    fn cookie_domain_is_stripped() {
        assert_eq!(
            strip_cookie_domain("PHPSESSID=abc123; Domain=upstream.example; Path=/; HttpOnly"),
            "PHPSESSID=abc123; Path=/; HttpOnly"
        );
        assert_eq!(
            strip_cookie_domain("token=1; Path=/"),
            "token=1; Path=/"
        );
    }

    #[test]
    fn document_base_url_rewrite_covers_both_schemes() {
        let m3u = "#EXTM3U\nhttp://up.example:8000/live/u/p/1.ts\nhttps://up.example:8000/movie/u/p/2.mp4\n";
        let out = rewrite_base_urls(m3u, "http://up.example:8000", ORIGIN);
        assert_eq!(
            out,
            "#EXTM3U\nhttps://panel.example/live/u/p/1.ts\nhttps://panel.example/movie/u/p/2.mp4\n"
        );
    }

    #[test]
    fn text_detection() {
        assert!(is_text_body(Some("text/html; charset=utf-8")));
        assert!(is_text_body(Some("application/javascript")));
        assert!(is_text_body(Some("application/json")));
        assert!(is_text_body(Some("application/xml")));
        assert!(!is_text_body(Some("image/png")));
        assert!(!is_text_body(Some("application/octet-stream")));
        assert!(!is_text_body(None));
    }

    #[test]
    fn host_extraction() {
        assert_eq!(host_of("http://up.example/"), Some("up.example".into()));
        assert_eq!(
            host_of("http://up.example:8080/base"),
            Some("up.example:8080".into())
        );
        assert_eq!(host_of("not a url"), None);
    }
}
