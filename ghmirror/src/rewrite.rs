//! The response rewriter (spec §4.5): sanitizes outbound headers down to a
//! whitelist and substitutes the upstream base URL for the mirror's own
//! base URL in both the `Link` header and the body, so pagination never
//! leaks clients outside the mirror.

use std::collections::HashMap;

use bytes::Bytes;

/// Headers forwarded to the client; anything else upstream sent is
/// discarded.
const HEADER_WHITELIST: [&str; 5] = ["X-Cache", "Link", "Content-Type", "Last-Modified", "ETag"];

pub struct RewrittenResponse {
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

/// Rewrites `headers`/`body` captured from upstream (or cache) so that
/// every occurrence of `upstream_base` is replaced by `mirror_base`, and
/// only whitelisted headers survive.
#[must_use]
pub fn rewrite(
    headers: &HashMap<String, String>,
    body: &Bytes,
    mirror_base: &str,
    upstream_base: &str,
) -> RewrittenResponse {
    let mirror_base = mirror_base.trim_end_matches('/');
    let upstream_base = upstream_base.trim_end_matches('/');

    let mut rewritten_headers = HashMap::new();
    for name in HEADER_WHITELIST {
        if let Some(value) = headers.iter().find(|(k, _)| k.eq_ignore_ascii_case(name)) {
            let rewritten = if name.eq_ignore_ascii_case("Link") {
                value.1.replace(upstream_base, mirror_base)
            } else {
                value.1.clone()
            };
            rewritten_headers.insert(name.to_string(), rewritten);
        }
    }

    let body = if body.is_empty() {
        body.clone()
    } else {
        match std::str::from_utf8(body) {
            Ok(text) if text.contains(upstream_base) => {
                Bytes::from(text.replace(upstream_base, mirror_base))
            }
            _ => body.clone(),
        }
    };

    RewrittenResponse {
        headers: rewritten_headers,
        body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discards_non_whitelisted_headers() {
        let mut headers = HashMap::new();
        headers.insert("ETag".to_string(), "\"abc\"".to_string());
        headers.insert("X-RateLimit-Remaining".to_string(), "42".to_string());
        let result = rewrite(&headers, &Bytes::new(), "https://mirror.example", "https://api.github.com");
        assert!(result.headers.contains_key("ETag"));
        assert!(!result.headers.contains_key("X-RateLimit-Remaining"));
    }

    #[test]
    fn rewrites_upstream_url_in_link_header() {
        let mut headers = HashMap::new();
        headers.insert(
            "Link".to_string(),
            r#"<https://api.github.com/repos/a/b?page=2>; rel="next""#.to_string(),
        );
        let result = rewrite(&headers, &Bytes::new(), "https://mirror.example", "https://api.github.com");
        assert_eq!(
            result.headers.get("Link").unwrap(),
            r#"<https://mirror.example/repos/a/b?page=2>; rel="next""#
        );
    }

    #[test]
    fn rewrites_upstream_url_in_body() {
        let body = Bytes::from_static(br#"{"url":"https://api.github.com/repos/a/b"}"#);
        let result = rewrite(&HashMap::new(), &body, "https://mirror.example", "https://api.github.com");
        assert_eq!(
            result.body,
            Bytes::from_static(br#"{"url":"https://mirror.example/repos/a/b"}"#)
        );
    }

    #[test]
    fn absent_body_stays_absent() {
        let result = rewrite(&HashMap::new(), &Bytes::new(), "https://mirror.example", "https://api.github.com");
        assert!(result.body.is_empty());
    }

    #[test]
    fn trailing_slashes_are_stripped_before_comparison() {
        let mut headers = HashMap::new();
        headers.insert(
            "Link".to_string(),
            r#"<https://api.github.com/repos>; rel="next""#.to_string(),
        );
        let result = rewrite(&headers, &Bytes::new(), "https://mirror.example/", "https://api.github.com/");
        assert_eq!(
            result.headers.get("Link").unwrap(),
            r#"<https://mirror.example/repos>; rel="next""#
        );
    }
}
