//! Client identification from proxy headers.

use axum::http::HeaderMap;

/// Header set by a CDN edge with the connecting client's address.
pub const CONNECTING_IP_HEADER: &str = "cf-connecting-ip";
/// Header set by a generic reverse proxy.
pub const REAL_IP_HEADER: &str = "x-real-ip";
/// Comma separated proxy chain; the first entry is the original client.
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";
/// Identifier shared by every request that carries none of the headers above.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Resolve the identifier a request is rate limited under.
///
/// The first non-empty header wins, in order: `cf-connecting-ip`,
/// `x-real-ip`, then the first entry of `x-forwarded-for`. Requests without
/// any of them all share the [`UNKNOWN_CLIENT`] bucket.
pub fn resolve_client_id(headers: &HeaderMap) -> String {
    header_value(headers, CONNECTING_IP_HEADER)
        .or_else(|| header_value(headers, REAL_IP_HEADER))
        .or_else(|| {
            header_value(headers, FORWARDED_FOR_HEADER)
                .and_then(|chain| chain.split(',').next())
                .map(str::trim)
                .filter(|first| !first.is_empty())
        })
        .unwrap_or(UNKNOWN_CLIENT)
        .to_string()
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn test_connecting_ip_wins() {
        let map = headers(&[
            ("x-forwarded-for", "198.51.100.1, 10.0.0.1"),
            ("x-real-ip", "198.51.100.2"),
            ("cf-connecting-ip", "198.51.100.3"),
        ]);
        assert_eq!(resolve_client_id(&map), "198.51.100.3");
    }

    #[test]
    fn test_real_ip_before_forwarded_for() {
        let map = headers(&[
            ("x-forwarded-for", "198.51.100.1"),
            ("x-real-ip", "198.51.100.2"),
        ]);
        assert_eq!(resolve_client_id(&map), "198.51.100.2");
    }

    #[test]
    fn test_first_forwarded_for_entry() {
        let map = headers(&[("x-forwarded-for", " 203.0.113.9 , 10.0.0.1, 10.0.0.2")]);
        assert_eq!(resolve_client_id(&map), "203.0.113.9");
    }

    #[test]
    fn test_empty_headers_are_skipped() {
        let map = headers(&[("cf-connecting-ip", ""), ("x-real-ip", "203.0.113.4")]);
        assert_eq!(resolve_client_id(&map), "203.0.113.4");
    }

    #[test]
    fn test_unknown_without_headers() {
        assert_eq!(resolve_client_id(&HeaderMap::new()), UNKNOWN_CLIENT);

        let map = headers(&[("x-forwarded-for", ", 10.0.0.1")]);
        assert_eq!(resolve_client_id(&map), UNKNOWN_CLIENT);
    }
}
