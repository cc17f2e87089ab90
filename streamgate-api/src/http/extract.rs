// Request helpers: viewer token lookup, client IP, path validation, cookies

use std::collections::HashMap;
use std::net::SocketAddr;

use axum::http::{header, HeaderMap};
use streamgate_core::models::StreamId;

use super::error::AppError;

pub const ACCESS_TOKEN_COOKIE: &str = "access_token";

/// Read a single cookie value from the Cookie header.
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let header = headers.get(header::COOKIE)?.to_str().ok()?;
    header.split(';').find_map(|pair| {
        let (key, value) = pair.trim().split_once('=')?;
        (key == name).then(|| value.to_string())
    })
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let auth = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    auth.strip_prefix("Bearer ")
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}

/// The viewer's access token: first non-empty of cookie, bearer header,
/// `token` query parameter.
pub fn viewer_token(headers: &HeaderMap, query: &HashMap<String, String>) -> Option<String> {
    cookie_value(headers, ACCESS_TOKEN_COOKIE)
        .filter(|token| !token.is_empty())
        .or_else(|| bearer_token(headers))
        .or_else(|| {
            query
                .get("token")
                .filter(|token| !token.is_empty())
                .cloned()
        })
}

/// Client IP for rate limiting and device bindings: first hop of
/// X-Forwarded-For, then X-Real-IP, then the socket peer.
pub fn client_ip(headers: &HeaderMap, peer: SocketAddr) -> String {
    if let Some(forwarded) = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
    {
        let first = forwarded.split(',').next().unwrap_or("").trim();
        if !first.is_empty() {
            return first.to_string();
        }
    }

    if let Some(real_ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        let real_ip = real_ip.trim();
        if !real_ip.is_empty() {
            return real_ip.to_string();
        }
    }

    peer.ip().to_string()
}

/// Validate the shape of a stream identifier from the URL path.
pub fn parse_stream_id(raw: &str) -> Result<StreamId, AppError> {
    let valid = !raw.is_empty()
        && raw.len() <= 64
        && raw
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
    if !valid {
        return Err(AppError::bad_request("Invalid stream ID"));
    }
    Ok(StreamId::from_string(raw.to_string()))
}

/// Build the Set-Cookie value carrying the access token.
pub fn access_cookie(token: &str, max_age_seconds: u64, secure: bool) -> String {
    let mut cookie = format!(
        "{ACCESS_TOKEN_COOKIE}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age_seconds}"
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with(name: header::HeaderName, value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(name, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn cookie_parsing_handles_multiple_pairs() {
        let headers = headers_with(header::COOKIE, "theme=dark; access_token=tok123; lang=fi");
        assert_eq!(
            cookie_value(&headers, ACCESS_TOKEN_COOKIE),
            Some("tok123".to_string())
        );
        assert_eq!(cookie_value(&headers, "missing"), None);
    }

    #[test]
    fn token_precedence_is_cookie_bearer_query() {
        let mut query = HashMap::new();
        query.insert("token".to_string(), "from-query".to_string());

        let mut headers = headers_with(header::COOKIE, "access_token=from-cookie");
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer from-bearer"),
        );
        assert_eq!(
            viewer_token(&headers, &query),
            Some("from-cookie".to_string())
        );

        let headers = headers_with(header::AUTHORIZATION, "Bearer from-bearer");
        assert_eq!(
            viewer_token(&headers, &query),
            Some("from-bearer".to_string())
        );

        assert_eq!(
            viewer_token(&HeaderMap::new(), &query),
            Some("from-query".to_string())
        );
        assert_eq!(viewer_token(&HeaderMap::new(), &HashMap::new()), None);
    }

    #[test]
    fn client_ip_prefers_forwarded_chain() {
        let peer: SocketAddr = "192.0.2.1:4242".parse().unwrap();

        let headers = headers_with(
            "x-forwarded-for".parse::<header::HeaderName>().unwrap(),
            "203.0.113.9, 10.0.0.1",
        );
        assert_eq!(client_ip(&headers, peer), "203.0.113.9");

        let headers = headers_with(
            "x-real-ip".parse::<header::HeaderName>().unwrap(),
            "198.51.100.4",
        );
        assert_eq!(client_ip(&headers, peer), "198.51.100.4");

        assert_eq!(client_ip(&HeaderMap::new(), peer), "192.0.2.1");
    }

    #[test]
    fn stream_id_shape_is_enforced() {
        assert!(parse_stream_id("V1StGXR8_Z5j").is_ok());
        assert!(parse_stream_id("s1").is_ok());
        assert!(parse_stream_id("").is_err());
        assert!(parse_stream_id("has spaces").is_err());
        assert!(parse_stream_id("semi;colon").is_err());
        assert!(parse_stream_id(&"x".repeat(65)).is_err());
    }

    #[test]
    fn access_cookie_flags() {
        let cookie = access_cookie("tok", 3600, false);
        assert!(cookie.starts_with("access_token=tok; "));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("Max-Age=3600"));
        assert!(!cookie.contains("Secure"));

        assert!(access_cookie("tok", 3600, true).ends_with("; Secure"));
    }
}
