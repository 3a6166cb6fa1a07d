// src/keys.rs

// Strategies mapping an HTTP request to the key it is counted under
use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::header::HeaderName;
use axum::http::Request;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

/// Maps a request to a limiter key. An empty (or whitespace) key exempts the
/// request from the limiter that uses this extractor.
pub type KeyExtractor = Arc<dyn Fn(&Request<Body>) -> String + Send + Sync>;

/// Header carrying a client's API token.
pub const DEFAULT_TOKEN_HEADER: HeaderName = HeaderName::from_static("api_key");

/// Peer address recorded by `into_make_service_with_connect_info`.
///
/// Forwarding headers are deliberately not consulted.
pub fn client_ip(request: &Request<Body>) -> Option<IpAddr> {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
}

/// Trimmed token header value, if any.
pub fn token(request: &Request<Body>) -> Option<String> {
    request
        .headers()
        .get(DEFAULT_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn ip_key(request: &Request<Body>) -> String {
    client_ip(request)
        .map(|ip| ip.to_string())
        .unwrap_or_default()
}

/// Counts every request under the client address.
pub fn by_ip() -> KeyExtractor {
    Arc::new(ip_key)
}

/// Counts under the client address, skipping requests that carry a token so
/// they are only charged against the token quota.
pub fn by_ip_without_token() -> KeyExtractor {
    Arc::new(|request: &Request<Body>| match token(request) {
        Some(_) => String::new(),
        None => ip_key(request),
    })
}

/// Counts under the token; requests without one are not limited.
pub fn by_token() -> KeyExtractor {
    Arc::new(|request: &Request<Body>| token(request).unwrap_or_default())
}

/// Counts under the token when present, the client address otherwise.
pub fn by_token_or_ip() -> KeyExtractor {
    Arc::new(|request: &Request<Body>| token(request).unwrap_or_else(|| ip_key(request)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(addr: Option<&str>, api_key: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri("/");
        if let Some(key) = api_key {
            builder = builder.header("API_KEY", key);
        }
        let mut request = builder.body(Body::empty()).unwrap();
        if let Some(addr) = addr {
            let addr: SocketAddr = addr.parse().unwrap();
            request.extensions_mut().insert(ConnectInfo(addr));
        }
        request
    }

    #[test]
    fn header_lookup_ignores_case() {
        let request = request(None, Some("  secret "));
        assert_eq!(token(&request).as_deref(), Some("secret"));
        assert_eq!(by_token()(&request), "secret");
    }

    #[test]
    fn ip_comes_from_connect_info() {
        let v4 = request(Some("10.1.2.3:5555"), None);
        let v6 = request(Some("[::1]:8080"), None);

        assert_eq!(by_ip()(&v4), "10.1.2.3");
        assert_eq!(by_ip()(&v6), "::1");
        assert_eq!(by_ip()(&request(None, None)), "");
    }

    #[test]
    fn token_traffic_is_exempt_from_the_ip_key() {
        let with_token = request(Some("10.1.2.3:5555"), Some("abc"));
        let without = request(Some("10.1.2.3:5555"), None);

        assert_eq!(by_ip_without_token()(&with_token), "");
        assert_eq!(by_ip_without_token()(&without), "10.1.2.3");
        assert_eq!(by_ip()(&with_token), "10.1.2.3");
    }

    #[test]
    fn token_or_ip_prefers_the_token() {
        let with_token = request(Some("10.1.2.3:5555"), Some("abc"));
        let blank_token = request(Some("10.1.2.3:5555"), Some("   "));

        assert_eq!(by_token_or_ip()(&with_token), "abc");
        assert_eq!(by_token_or_ip()(&blank_token), "10.1.2.3");
        assert_eq!(by_token()(&blank_token), "");
    }
}
