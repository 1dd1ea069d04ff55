//! Caller identification and store key derivation.

use axum::extract::ConnectInfo;
use axum::http::Request;
use std::net::SocketAddr;

/// Header carrying the caller's API key.
pub const API_KEY_HEADER: &str = "api_key";

const REQUESTS_PREFIX: &str = "requests@";
const BLACKLIST_PREFIX: &str = "blacklist@";

/// The raw credentials a request presents.
///
/// Either field may be empty. The API key, when present, identifies the
/// caller; otherwise the client IP does.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Credentials {
    pub api_key: String,
    pub client_ip: String,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>, client_ip: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            client_ip: client_ip.into(),
        }
    }

    /// Extract credentials from a request.
    ///
    /// Reads the `API_KEY` header and the peer address recorded by
    /// `into_make_service_with_connect_info`. Header bytes outside visible
    /// ASCII are kept (lossily decoded), so any non-empty header is a key.
    /// A missing header and missing connection info read as empty strings.
    pub fn from_request<B>(request: &Request<B>) -> Self {
        let api_key = request
            .headers()
            .get(API_KEY_HEADER)
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
            .unwrap_or_default();

        let client_ip = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
            .unwrap_or_default();

        Self::new(api_key, client_ip)
    }

    pub fn has_api_key(&self) -> bool {
        !self.api_key.is_empty()
    }

    /// The same caller, identified by client IP only.
    pub fn without_api_key(self) -> Self {
        Self {
            api_key: String::new(),
            client_ip: self.client_ip,
        }
    }

    /// The string that namespaces this caller's store keys.
    pub fn identity(&self) -> &str {
        if self.has_api_key() {
            &self.api_key
        } else {
            &self.client_ip
        }
    }

    pub fn requests_key(&self) -> String {
        requests_key(&self.api_key, &self.client_ip)
    }

    pub fn blacklist_key(&self) -> String {
        blacklist_key(&self.api_key, &self.client_ip)
    }
}

impl std::fmt::Display for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = if self.has_api_key() { "api_key" } else { "ip" };
        write!(f, "{}:{}", kind, self.identity())
    }
}

/// Key of the per-window request counter.
///
/// With both inputs empty this is the bare prefix, a shared bucket for
/// requests that carry no identity at all.
pub fn requests_key(api_key: &str, client_ip: &str) -> String {
    prefixed(REQUESTS_PREFIX, api_key, client_ip)
}

/// Key of the blacklist marker.
pub fn blacklist_key(api_key: &str, client_ip: &str) -> String {
    prefixed(BLACKLIST_PREFIX, api_key, client_ip)
}

fn prefixed(prefix: &str, api_key: &str, client_ip: &str) -> String {
    let id = if api_key.is_empty() { client_ip } else { api_key };
    format!("{}{}", prefix, id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::HeaderValue;

    fn request(api_key: Option<&str>, peer: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri("http://example.com/ip");
        if let Some(key) = api_key {
            builder = builder.header("API_KEY", key);
        }
        let mut request = builder.body(Body::empty()).unwrap();
        if let Some(peer) = peer {
            let addr: SocketAddr = peer.parse().unwrap();
            request.extensions_mut().insert(ConnectInfo(addr));
        }
        request
    }

    #[test]
    fn test_credentials_from_request() {
        let cases = [
            (Some("test-api-key"), Some("192.168.1.1:5555"), "test-api-key", "192.168.1.1"),
            (None, Some("192.168.1.1:5555"), "", "192.168.1.1"),
            (Some("test-api-key"), None, "test-api-key", ""),
            (None, None, "", ""),
        ];

        for (api_key, peer, expected_key, expected_ip) in cases {
            let creds = Credentials::from_request(&request(api_key, peer));
            assert_eq!(creds.api_key, expected_key, "api key for {:?}/{:?}", api_key, peer);
            assert_eq!(creds.client_ip, expected_ip, "client ip for {:?}/{:?}", api_key, peer);
        }
    }

    #[test]
    fn test_non_ascii_api_key_is_kept() {
        let request = Request::builder()
            .header("API_KEY", HeaderValue::from_bytes(b"cl\xc3\xa9").unwrap())
            .body(Body::empty())
            .unwrap();
        let creds = Credentials::from_request(&request);

        assert!(creds.has_api_key());
        assert_eq!(creds.api_key, "cl\u{e9}");
        assert_eq!(creds.requests_key(), "requests@cl\u{e9}");
    }

    #[test]
    fn test_port_is_not_part_of_identity() {
        let a = Credentials::from_request(&request(None, Some("10.0.0.7:1000")));
        let b = Credentials::from_request(&request(None, Some("10.0.0.7:2000")));
        assert_eq!(a.requests_key(), b.requests_key());
    }

    #[test]
    fn test_ipv6_peer() {
        let creds = Credentials::from_request(&request(None, Some("[::1]:8080")));
        assert_eq!(creds.client_ip, "::1");
        assert_eq!(creds.requests_key(), "requests@::1");
    }

    #[test]
    fn test_header_name_is_case_insensitive() {
        let request = Request::builder()
            .header("api_key", "lower")
            .body(Body::empty())
            .unwrap();
        assert_eq!(Credentials::from_request(&request).api_key, "lower");
    }

    #[test]
    fn test_requests_key() {
        assert_eq!(requests_key("test-api-key", "192.168.1.1"), "requests@test-api-key");
        assert_eq!(requests_key("", "192.168.1.1"), "requests@192.168.1.1");
        assert_eq!(requests_key("test-api-key", ""), "requests@test-api-key");
        assert_eq!(requests_key("", ""), "requests@");
    }

    #[test]
    fn test_blacklist_key() {
        assert_eq!(blacklist_key("test-api-key", "192.168.1.1"), "blacklist@test-api-key");
        assert_eq!(blacklist_key("", "192.168.1.1"), "blacklist@192.168.1.1");
        assert_eq!(blacklist_key("test-api-key", ""), "blacklist@test-api-key");
        assert_eq!(blacklist_key("", ""), "blacklist@");
    }

    #[test]
    fn test_key_derivation_is_stable_and_ignores_ip_with_api_key() {
        let first = Credentials::new("abc", "1.2.3.4");
        let again = Credentials::new("abc", "1.2.3.4");
        let moved = Credentials::new("abc", "5.6.7.8");

        assert_eq!(first.requests_key(), again.requests_key());
        assert_eq!(first.requests_key(), moved.requests_key());
        assert_eq!(first.blacklist_key(), moved.blacklist_key());
    }

    #[test]
    fn test_key_and_ip_variants_are_separate_counters() {
        let with_key = Credentials::new("abc", "1.2.3.4");
        let without_key = with_key.clone().without_api_key();
        assert_ne!(with_key.requests_key(), without_key.requests_key());
        assert_eq!(without_key.identity(), "1.2.3.4");
    }

    #[test]
    fn test_display() {
        assert_eq!(Credentials::new("abc", "1.2.3.4").to_string(), "api_key:abc");
        assert_eq!(Credentials::new("", "1.2.3.4").to_string(), "ip:1.2.3.4");
    }
}
